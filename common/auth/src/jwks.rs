use std::time::Duration;

use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::error::{AuthError, AuthResult};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Downloads the identity provider's RS256 signing keys.
#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(client, url)
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns every usable `(kid, key)` pair. Entries that are not RSA/RS256 or lack a kid
    /// are skipped so one foreign key does not take down the whole set.
    pub async fn fetch(&self) -> AuthResult<Vec<(String, DecodingKey)>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetch(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: JwkSet = response
            .json()
            .await
            .map_err(|err| AuthError::JwksDecode(err.to_string()))?;

        let mut keys = Vec::with_capacity(body.keys.len());
        for entry in body.keys {
            match entry.into_key() {
                Ok(Some(pair)) => keys.push(pair),
                Ok(None) => {}
                Err(err) => warn!(error = %err, url = %self.url, "skipping unusable JWKS entry"),
            }
        }
        Ok(keys)
    }
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: Option<String>,
    alg: Option<String>,
    #[serde(rename = "use")]
    usage: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

impl Jwk {
    fn into_key(self) -> AuthResult<Option<(String, DecodingKey)>> {
        if self.usage.as_deref().is_some_and(|u| u != "sig") {
            return Ok(None);
        }
        if self.kty.as_deref().unwrap_or("RSA") != "RSA" {
            return Ok(None);
        }
        if self.alg.as_deref().is_some_and(|alg| alg != "RS256") {
            return Ok(None);
        }
        let Some(kid) = self.kid else {
            return Ok(None);
        };
        let (Some(n), Some(e)) = (self.n, self.e) else {
            return Err(AuthError::KeyParse(kid, "missing RSA modulus or exponent".into()));
        };
        let key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;
        Ok(Some((kid, key)))
    }
}
