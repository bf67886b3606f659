use factory_core::auth::HmacTokenVerifier;
use factory_core::config::{AppConfig, LoadOptions};
use factory_core::domain::project::UserId;

use crate::commands::CommandResult;

pub fn run(user: &str) -> CommandResult {
    let user = user.trim();
    if user.is_empty() {
        return CommandResult::failure("token", "invalid_user", "user id must not be empty", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "token",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    match HmacTokenVerifier::from_config(&config.auth).issue(&UserId(user.to_string())) {
        Ok(token) => CommandResult::success("token", token),
        Err(error) => CommandResult::failure("token", "token_signing", error.to_string(), 3),
    }
}
