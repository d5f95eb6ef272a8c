use jsonwebtoken::{Algorithm, Validation};

const DEFAULT_LEEWAY_SECONDS: u32 = 30;

/// Issuer, audience and clock leeway that one class of bearer tokens must match.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub leeway_seconds: u32,
}

impl JwtConfig {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
        }
    }

    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    /// Signature-stage checks for `algorithm`. `iss` and `aud` must be present; expiry is
    /// left to the claims decoder.
    pub fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.leeway = self.leeway_seconds.into();
        validation.validate_exp = false;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["iss", "aud"]);
        validation
    }
}
