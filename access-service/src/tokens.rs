use chrono::{DateTime, Duration, Utc};
use common_auth::{HmacVerifier, JwtConfig, BREAK_GLASS_KID};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

use crate::credentials::EmergencyCredential;

/// Fixed lifetime of an emergency session.
pub const EMERGENCY_SESSION_TTL_SECONDS: i64 = 1800;

/// A minted emergency session and the identifiers the audit trail records for it.
#[derive(Debug, Clone)]
pub struct EmergencySession {
    pub token: String,
    pub token_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct SessionClaims<'a> {
    sub: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tid: Option<&'a str>,
    roles: &'a [String],
    is_emergency: bool,
    iat: i64,
    exp: i64,
    jti: &'a str,
    iss: &'a str,
    aud: &'a str,
}

/// HS256 signer for break-glass sessions. Tokens carry kid `break-glass` so the
/// request pipeline routes them to [`HmacVerifier`].
#[derive(Clone)]
pub struct SessionSigner {
    config: JwtConfig,
    encoding_key: EncodingKey,
    secret: Vec<u8>,
}

impl SessionSigner {
    pub fn new(config: JwtConfig, secret: &[u8]) -> Self {
        Self {
            config,
            encoding_key: EncodingKey::from_secret(secret),
            secret: secret.to_vec(),
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Signs a session for `credential`; roles and tenant come from the stored record only.
    pub fn issue(
        &self,
        credential: &EmergencyCredential,
        now: DateTime<Utc>,
    ) -> Result<EmergencySession, jsonwebtoken::errors::Error> {
        let issued_at = DateTime::<Utc>::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let expires_at = issued_at + Duration::seconds(EMERGENCY_SESSION_TTL_SECONDS);
        let token_id = Uuid::new_v4().to_string();

        let claims = SessionClaims {
            sub: &credential.account_id,
            email: &credential.email,
            tid: credential.tenant_id.as_deref(),
            roles: &credential.roles,
            is_emergency: true,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: &token_id,
            iss: &self.config.issuer,
            aud: &self.config.audience,
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(BREAK_GLASS_KID.to_string());
        let token = encode(&header, &claims, &self.encoding_key)?;

        Ok(EmergencySession { token, token_id, issued_at, expires_at })
    }

    /// Verifier accepting exactly the sessions this signer mints.
    pub fn session_verifier(&self) -> HmacVerifier {
        HmacVerifier::new(self.config.clone(), &self.secret)
    }
}
