// signature.rs
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{env, fmt};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SHA256_PREFIX: &str = "sha256=";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("webhook secret is empty")]
    Empty,
    #[error("webhook secret is not a valid HMAC key")]
    InvalidKey,
}

pub trait SecretProvider: Send + Sync {
    fn secret(&self) -> Result<Vec<u8>, SecretError>;
}

pub struct StaticSecret {
    secret: Vec<u8>,
}

impl StaticSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSecret")
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

impl SecretProvider for StaticSecret {
    fn secret(&self) -> Result<Vec<u8>, SecretError> {
        if self.secret.is_empty() {
            return Err(SecretError::Empty);
        }
        Ok(self.secret.clone())
    }
}

/// Reads the secret from a named environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvSecret {
    var: String,
}

impl EnvSecret {
    pub fn new(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }
}

impl SecretProvider for EnvSecret {
    fn secret(&self) -> Result<Vec<u8>, SecretError> {
        match env::var(&self.var) {
            Ok(value) if !value.is_empty() => Ok(value.into_bytes()),
            Ok(_) => Err(SecretError::Empty),
            Err(_) => Err(SecretError::MissingEnv(self.var.clone())),
        }
    }
}

/// Message id, then timestamp as received, then raw body; no separators.
pub fn build_signing_message(message_id: &str, timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(message_id.len() + timestamp.len() + body.len());
    message.extend_from_slice(message_id.as_bytes());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);
    message
}

/// Lowercase hex HMAC-SHA256 of `message` keyed by `secret`.
pub fn compute_digest(secret: &[u8], message: &[u8]) -> Result<String, SecretError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SecretError::InvalidKey)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Length check first, then a constant-time comparison.
pub fn verify(computed: &str, received: &str) -> bool {
    if computed.len() != received.len() {
        return false;
    }
    computed.as_bytes().ct_eq(received.as_bytes()).into()
}

pub struct SignatureVerifier {
    secrets: Box<dyn SecretProvider>,
}

impl SignatureVerifier {
    pub fn new(secrets: Box<dyn SecretProvider>) -> Self {
        Self { secrets }
    }

    /// Accepts `sha256=<hex>` or a bare hex digest. Any other algorithm fails.
    pub fn verify_request(
        &self,
        message_id: &str,
        timestamp: &str,
        body: &[u8],
        signature: &str,
    ) -> Result<bool, SecretError> {
        let received = match signature.strip_prefix(SHA256_PREFIX) {
            Some(digest) => digest,
            None if signature.contains('=') => return Ok(false),
            None => signature,
        };

        let secret = self.secrets.secret()?;
        let message = build_signing_message(message_id, timestamp, body);
        let computed = compute_digest(&secret, &message)?;
        Ok(verify(&computed, received))
    }
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}
