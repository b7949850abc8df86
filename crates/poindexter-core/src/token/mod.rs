//! Scoped token generation and validation for agent-mode authentication.
//!
//! Tokens are HMAC-SHA256 based, scoped to a (task_id, attempt) pair.
//! Format: `pdx_at_<task_id>_<attempt>_<hmac_hex>`

pub mod guard;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Token prefix used to identify poindexter agent tokens.
const TOKEN_PREFIX: &str = "pdx_at_";

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    #[error("invalid task ID in token: {0}")]
    InvalidTaskId(String),

    #[error("invalid attempt number in token: {0}")]
    InvalidAttempt(String),

    #[error("token HMAC verification failed")]
    HmacMismatch,

    #[error("missing token secret")]
    MissingSecret,
}

/// Configuration for token generation and validation.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// The HMAC secret key bytes.
    pub secret: Vec<u8>,
}

impl TokenConfig {
    /// Create a new TokenConfig with the given secret.
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Create a TokenConfig from the `POINDEXTER_TOKEN_SECRET` environment variable.
    ///
    /// The value must be a hex-encoded string (as written by `poindexter init`
    /// and forwarded by the orchestrator). Returns an error if the variable
    /// is missing or contains invalid hex.
    pub fn from_env() -> Result<Self, TokenError> {
        let secret_hex =
            std::env::var("POINDEXTER_TOKEN_SECRET").map_err(|_| TokenError::MissingSecret)?;
        let secret = hex::decode(&secret_hex).map_err(|e| {
            TokenError::InvalidFormat(format!("POINDEXTER_TOKEN_SECRET is not valid hex: {e}"))
        })?;
        Ok(Self::new(secret))
    }
}

/// Claims extracted from a validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// The task ID this token is scoped to.
    pub task_id: Uuid,
    /// The attempt number this token is scoped to.
    pub attempt: u32,
}

/// Generate a scoped agent token for a given task and attempt.
///
/// The token format is: `pdx_at_<task_id>_<attempt>_<hmac_hex>`
/// where the HMAC-SHA256 is computed over `<task_id>:<attempt>`.
pub fn generate_token(config: &TokenConfig, task_id: Uuid, attempt: u32) -> String {
    let message = format!("{task_id}:{attempt}");
    let mac = compute_hmac(&config.secret, message.as_bytes());
    let hmac_hex = hex::encode(mac);
    format!("{TOKEN_PREFIX}{task_id}_{attempt}_{hmac_hex}")
}

/// Validate a scoped agent token and extract its claims.
///
/// This function:
/// 1. Parses the token format
/// 2. Recomputes the HMAC
/// 3. Uses constant-time comparison to verify the HMAC
/// 4. Returns the extracted claims on success
pub fn validate_token(config: &TokenConfig, token: &str) -> Result<TokenClaims, TokenError> {
    // Strip prefix
    let rest = token.strip_prefix(TOKEN_PREFIX).ok_or_else(|| {
        TokenError::InvalidFormat("token must start with 'pdx_at_'".to_string())
    })?;

    // Parse the components: <task_id>_<attempt>_<hmac_hex>
    // A UUID is 36 chars (8-4-4-4-12). We parse the UUID first (36 chars),
    // then expect underscore, then attempt, then underscore, then hmac_hex.
    let (task_id_str, after_task_id) = parse_uuid_prefix(rest)?;

    let task_id =
        Uuid::parse_str(task_id_str).map_err(|e| TokenError::InvalidTaskId(e.to_string()))?;

    // after_task_id should start with '_'
    let after_underscore = after_task_id.strip_prefix('_').ok_or_else(|| {
        TokenError::InvalidFormat("expected underscore after task_id".to_string())
    })?;

    // Split on the next underscore to get attempt and hmac
    let (attempt_str, hmac_hex) = after_underscore.split_once('_').ok_or_else(|| {
        TokenError::InvalidFormat("expected underscore between attempt and hmac".to_string())
    })?;

    let attempt: u32 = attempt_str
        .parse()
        .map_err(|e: std::num::ParseIntError| TokenError::InvalidAttempt(e.to_string()))?;

    // Decode the provided HMAC
    let provided_mac = hex::decode(hmac_hex)
        .map_err(|e| TokenError::InvalidFormat(format!("invalid hex in hmac: {e}")))?;

    // Recompute and verify HMAC using constant-time comparison
    let message = format!("{task_id}:{attempt}");
    verify_hmac_constant_time(&config.secret, message.as_bytes(), &provided_mac)?;

    Ok(TokenClaims { task_id, attempt })
}

/// Parse a UUID from the beginning of a string.
/// Returns (uuid_str, remainder).
fn parse_uuid_prefix(s: &str) -> Result<(&str, &str), TokenError> {
    // A standard UUID is 36 characters: xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx
    if s.len() < 36 {
        return Err(TokenError::InvalidFormat(
            "token too short to contain a valid UUID".to_string(),
        ));
    }
    Ok(s.split_at(36))
}

/// Compute HMAC-SHA256 over the given message with the given key.
fn compute_hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Verify HMAC using constant-time comparison.
///
/// This uses the `hmac` crate's `verify_slice` method which is
/// designed to be constant-time to prevent timing attacks.
fn verify_hmac_constant_time(
    key: &[u8],
    message: &[u8],
    expected_mac: &[u8],
) -> Result<(), TokenError> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.verify_slice(expected_mac)
        .map_err(|_| TokenError::HmacMismatch)
}
