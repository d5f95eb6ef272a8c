use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};

/// Structural claims extraction for a compact JWS.
///
/// Does not check the signature; callers run a [`crate::SignatureVerifier`] first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsDecoder;

impl ClaimsDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        Claims::from_payload(self.payload(token)?, now)
    }

    /// Returns the raw JSON claim set without interpreting it.
    pub fn payload(&self, token: &str) -> AuthResult<serde_json::Value> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(AuthError::Malformed(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|err| AuthError::Malformed(format!("payload is not base64url: {err}")))?;
        let value: serde_json::Value = serde_json::from_slice(&payload)
            .map_err(|err| AuthError::Malformed(format!("payload is not JSON: {err}")))?;
        if !value.is_object() {
            return Err(AuthError::Malformed("payload is not a JSON object".into()));
        }
        Ok(value)
    }
}
