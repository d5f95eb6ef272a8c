use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand_core::OsRng;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tokio::sync::RwLock;

/// Secondary credential for an emergency account. The role and tenant snapshot is copied
/// verbatim into any session issued from it.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EmergencyCredential {
    pub account_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub totp_secret: String,
    pub active: bool,
    pub is_emergency_account: bool,
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
}

impl EmergencyCredential {
    /// Only active accounts explicitly flagged for emergency use may authenticate here.
    pub fn is_eligible(&self) -> bool {
        self.active && self.is_emergency_account
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential store error: {0}")]
    Store(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

impl From<sqlx::Error> for CredentialError {
    fn from(value: sqlx::Error) -> Self {
        Self::Store(value.to_string())
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[async_trait]
pub trait EmergencyCredentialStore: Send + Sync {
    /// Case-insensitive lookup; `email` is already normalized.
    async fn get_emergency_credential(
        &self,
        email: &str,
    ) -> Result<Option<EmergencyCredential>, CredentialError>;
}

#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    inner: Arc<RwLock<HashMap<String, EmergencyCredential>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, credential: EmergencyCredential) {
        let key = normalize_email(&credential.email);
        self.inner.write().await.insert(key, credential);
    }
}

#[async_trait]
impl EmergencyCredentialStore for InMemoryCredentialStore {
    async fn get_emergency_credential(
        &self,
        email: &str,
    ) -> Result<Option<EmergencyCredential>, CredentialError> {
        Ok(self.inner.read().await.get(email).cloned())
    }
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmergencyCredentialStore for PgCredentialStore {
    async fn get_emergency_credential(
        &self,
        email: &str,
    ) -> Result<Option<EmergencyCredential>, CredentialError> {
        let row = sqlx::query_as::<_, EmergencyCredential>(
            "SELECT user_id::text AS account_id,
                    email,
                    display_name,
                    COALESCE(emergency_password_hash, '') AS password_hash,
                    COALESCE(emergency_mfa_secret, '') AS totp_secret,
                    is_active AS active,
                    is_emergency_admin AS is_emergency_account,
                    operator_id::text AS tenant_id,
                    COALESCE(roles, ARRAY[]::text[]) AS roles
             FROM user_account
             WHERE lower(email) = $1
             LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

pub fn hash_emergency_password(password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| CredentialError::Hash(err.to_string()))
}

/// Hash checked when no eligible account exists so both paths cost one Argon2 verification.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_emergency_password("break-glass-timing-equalizer").ok());

/// Argon2 check of `password` against a PHC string. Unparseable hashes never match.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Burns one verification for an unknown or ineligible account; always false.
pub fn verify_against_dummy(password: &str) -> bool {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
    false
}
