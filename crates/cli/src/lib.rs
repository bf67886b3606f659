pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "factory",
    about = "Agent factory operator CLI",
    long_about = "Apply migrations, inspect effective configuration, and mint API tokens for the agent factory server.",
    after_help = "Examples:\n  factory migrate\n  factory config\n  factory token --user 6f1c2a"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Mint a bearer token the server will accept for the given user")]
    Token {
        #[arg(long, help = "User id the token authenticates as")]
        user: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Token { user } => commands::token::run(&user),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
