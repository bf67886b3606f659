use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

use crate::config::AuthConfig;
use crate::domain::project::UserId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("malformed bearer token")]
    Malformed,
    #[error("bearer token signature does not match")]
    InvalidSignature,
    #[error("token secret cannot key hmac-sha256")]
    InvalidKey,
}

/// Maps a bearer token to the authenticated user.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Tokens of the form `<user_id>.<hex hmac-sha256(user_id)>`.
#[derive(Clone, Debug)]
pub struct HmacTokenVerifier {
    secret: SecretString,
}

impl HmacTokenVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.token_secret.clone())
    }

    /// Mints a token for operators and tests.
    pub fn issue(&self, user_id: &UserId) -> Result<String, AuthError> {
        let mut mac = self.mac()?;
        mac.update(user_id.0.as_bytes());
        Ok(format!("{}.{}", user_id.0, encode_hex(mac.finalize().into_bytes().as_slice())))
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| AuthError::InvalidKey)
    }
}

#[async_trait]
impl TokenVerifier for HmacTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let (user_id, signature) = token.rsplit_once('.').ok_or(AuthError::Malformed)?;
        if user_id.is_empty() {
            return Err(AuthError::Malformed);
        }
        let signature = decode_hex(signature).ok_or(AuthError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(user_id.as_bytes());
        mac.verify_slice(&signature).map_err(|_| AuthError::InvalidSignature)?;

        Ok(UserId(user_id.to_string()))
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.is_empty() || input.len() % 2 != 0 || !input.is_ascii() {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&input[index..index + 2], 16).ok())
        .collect()
}
