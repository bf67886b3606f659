use std::process::ExitCode;

fn main() -> ExitCode {
    factory_cli::run()
}
