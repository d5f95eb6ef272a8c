use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey};
use serde_json::Value;
use tracing::debug;

use crate::claims::Claims;
use crate::config::JwtConfig;
use crate::decoder::ClaimsDecoder;
use crate::error::{AuthError, AuthResult};
use crate::jwks::JwksFetcher;

/// Key id carried by emergency session tokens minted by the break-glass flow.
pub const BREAK_GLASS_KID: &str = "break-glass";

/// Thread-safe store for decoding keys loaded from JWKS/PEM sources.
#[derive(Clone, Default)]
pub struct InMemoryKeyStore {
    inner: Arc<RwLock<HashMap<String, DecodingKey>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, kid: impl Into<String>, key: DecodingKey) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(kid.into(), key);
    }

    pub fn insert_rsa_pem(&self, kid: impl Into<String>, pem: &[u8]) -> AuthResult<()> {
        let kid = kid.into();
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;
        self.insert_key(kid, key);
        Ok(())
    }

    pub fn get(&self, kid: &str) -> Option<DecodingKey> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(kid).cloned()
    }

    pub fn contains(&self, kid: &str) -> bool {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn replace_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, DecodingKey)>,
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.clear();
        guard.extend(entries);
    }
}

/// Pluggable authenticity check run before any claim is trusted.
pub trait SignatureVerifier: Send + Sync {
    /// Algorithm this verifier accepts; tokens are routed by their header `alg`.
    fn algorithm(&self) -> Algorithm;

    /// Checks signature, issuer, audience and not-before. Expiry is left to the claims decoder.
    fn verify(&self, token: &str) -> AuthResult<()>;

    /// Whether tokens accepted here may carry the emergency flag.
    fn mints_emergency_sessions(&self) -> bool {
        false
    }
}

/// RS256 verifier for identity-provider tokens, keyed by `kid`.
#[derive(Clone)]
pub struct JwtVerifier {
    config: JwtConfig,
    store: InMemoryKeyStore,
    jwks: Option<JwksFetcher>,
}

impl JwtVerifier {
    pub fn with_store(config: JwtConfig, store: InMemoryKeyStore) -> Self {
        Self {
            config,
            store,
            jwks: None,
        }
    }

    pub fn builder(config: JwtConfig) -> JwtVerifierBuilder {
        JwtVerifierBuilder::new(config)
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn store(&self) -> &InMemoryKeyStore {
        &self.store
    }

    pub fn has_jwks(&self) -> bool {
        self.jwks.is_some()
    }

    /// Replaces the key set with the current JWKS document. An empty document keeps the old keys.
    pub async fn refresh_jwks(&self) -> AuthResult<usize> {
        let Some(fetcher) = &self.jwks else {
            return Ok(0);
        };

        let keys = fetcher.fetch().await?;
        let count = keys.len();
        if count > 0 {
            self.store.replace_all(keys);
        }
        debug!(count, url = fetcher.url(), "refreshed JWKS");
        Ok(count)
    }
}

impl SignatureVerifier for JwtVerifier {
    fn algorithm(&self) -> Algorithm {
        Algorithm::RS256
    }

    fn verify(&self, token: &str) -> AuthResult<()> {
        let header =
            decode_header(token).map_err(|err| AuthError::InvalidHeader(err.to_string()))?;
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;
        let key = self
            .store
            .get(&kid)
            .ok_or_else(|| AuthError::UnknownKeyId(kid.clone()))?;

        decode::<Value>(token, &key, &self.config.validation(Algorithm::RS256))?;
        debug!(kid, "verified identity token signature");
        Ok(())
    }
}

pub struct JwtVerifierBuilder {
    config: JwtConfig,
    store: InMemoryKeyStore,
    jwks: Option<JwksFetcher>,
}

impl JwtVerifierBuilder {
    fn new(config: JwtConfig) -> Self {
        Self {
            config,
            store: InMemoryKeyStore::new(),
            jwks: None,
        }
    }

    pub fn with_store(mut self, store: InMemoryKeyStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_rsa_pem(self, kid: impl Into<String>, pem: &[u8]) -> AuthResult<Self> {
        self.store.insert_rsa_pem(kid, pem)?;
        Ok(self)
    }

    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks = Some(JwksFetcher::new(url));
        self
    }

    pub fn with_jwks_fetcher(mut self, fetcher: JwksFetcher) -> Self {
        self.jwks = Some(fetcher);
        self
    }

    /// Builds the verifier, loading the JWKS document once when a URL was configured.
    pub async fn build(self) -> AuthResult<JwtVerifier> {
        let verifier = JwtVerifier {
            config: self.config,
            store: self.store,
            jwks: self.jwks,
        };

        if verifier.jwks.is_some() {
            verifier.refresh_jwks().await?;
        }

        Ok(verifier)
    }
}

/// HS256 verifier for emergency sessions signed with the service's own secret.
#[derive(Clone)]
pub struct HmacVerifier {
    config: JwtConfig,
    key: DecodingKey,
}

impl HmacVerifier {
    pub fn new(config: JwtConfig, secret: &[u8]) -> Self {
        Self {
            config,
            key: DecodingKey::from_secret(secret),
        }
    }
}

impl SignatureVerifier for HmacVerifier {
    fn algorithm(&self) -> Algorithm {
        Algorithm::HS256
    }

    fn verify(&self, token: &str) -> AuthResult<()> {
        let header =
            decode_header(token).map_err(|err| AuthError::InvalidHeader(err.to_string()))?;
        match header.kid.as_deref() {
            Some(BREAK_GLASS_KID) => {}
            Some(other) => return Err(AuthError::UnknownKeyId(other.to_string())),
            None => return Err(AuthError::MissingKeyId),
        }
        decode::<Value>(token, &self.key, &self.config.validation(Algorithm::HS256))?;
        Ok(())
    }

    fn mints_emergency_sessions(&self) -> bool {
        true
    }
}

/// Signature check followed by structural claims extraction.
///
/// Malformed input is reported before the signature is examined; expiry is reported only
/// for authentic tokens.
#[derive(Clone, Default)]
pub struct TokenAuthenticator {
    verifiers: Vec<Arc<dyn SignatureVerifier>>,
    decoder: ClaimsDecoder,
}

impl TokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verifier(mut self, verifier: impl SignatureVerifier + 'static) -> Self {
        self.verifiers.push(Arc::new(verifier));
        self
    }

    pub fn authenticate(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        let payload = self.decoder.payload(token)?;
        let header =
            decode_header(token).map_err(|err| AuthError::InvalidHeader(err.to_string()))?;
        let verifier = self
            .verifiers
            .iter()
            .find(|v| v.algorithm() == header.alg)
            .ok_or_else(|| AuthError::UnsupportedAlgorithm(format!("{:?}", header.alg)))?;
        verifier.verify(token)?;

        let mut claims = Claims::from_payload(payload, now)?;
        claims.emergency &= verifier.mints_emergency_sessions();
        Ok(claims)
    }
}
