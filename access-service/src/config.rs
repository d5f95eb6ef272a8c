use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub const MIN_SESSION_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Memory,
    Redis,
}

impl RateLimitBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Ok(RateLimitBackend::Memory),
            "redis" => Ok(RateLimitBackend::Redis),
            other => Err(anyhow!(
                "Unsupported RATE_LIMIT_BACKEND '{other}'. Use memory or redis."
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityProviderConfig {
    pub issuer: String,
    pub audience: String,
    pub leeway_seconds: u32,
    pub jwks_url: Option<String>,
    pub jwks_refresh: Duration,
    pub public_key_pem: Option<String>,
}

#[derive(Clone)]
pub struct BreakGlassConfig {
    pub signing_secret: Vec<u8>,
    pub session_issuer: String,
    pub max_attempts: u32,
    pub window: Duration,
}

impl std::fmt::Debug for BreakGlassConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakGlassConfig")
            .field("signing_secret", &"<redacted>")
            .field("session_issuer", &self.session_issuer)
            .field("max_attempts", &self.max_attempts)
            .field("window", &self.window)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub identity: IdentityProviderConfig,
    pub break_glass: BreakGlassConfig,
    pub rate_limit_backend: RateLimitBackend,
    pub redis_url: Option<String>,
    pub rate_limit_prefix: String,
    pub maintenance_cache_ttl: Duration,
    pub tenant_lookup_timeout: Duration,
    pub audit_write_timeout: Duration,
    pub security_webhook_url: Option<String>,
    pub security_webhook_bearer: Option<String>,
    pub cors_allowed_origins: Vec<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_env::<u16>("PORT")?.unwrap_or(8085);
        let ip: IpAddr = host
            .trim()
            .parse()
            .with_context(|| format!("Invalid HOST '{host}'"))?;

        let identity = IdentityProviderConfig {
            issuer: env::var("JWT_ISSUER").context("JWT_ISSUER must be set")?,
            audience: env::var("JWT_AUDIENCE").context("JWT_AUDIENCE must be set")?,
            leeway_seconds: parse_env("JWT_LEEWAY_SECONDS")?.unwrap_or(30),
            jwks_url: optional_env("JWT_JWKS_URL"),
            jwks_refresh: Duration::from_secs(
                parse_env::<u64>("JWKS_REFRESH_SECONDS")?.unwrap_or(300).max(60),
            ),
            public_key_pem: optional_env("JWT_PUBLIC_KEY_PEM"),
        };
        if identity.jwks_url.is_none() && identity.public_key_pem.is_none() {
            bail!("Configure JWT_JWKS_URL or JWT_PUBLIC_KEY_PEM so identity tokens can be verified");
        }

        let signing_secret = env::var("BREAK_GLASS_SIGNING_SECRET")
            .context("BREAK_GLASS_SIGNING_SECRET must be set")?
            .into_bytes();
        validate_session_secret(&signing_secret)?;
        let break_glass = BreakGlassConfig {
            signing_secret,
            session_issuer: optional_env("BREAK_GLASS_SESSION_ISSUER")
                .unwrap_or_else(|| "access-service".to_string()),
            max_attempts: parse_env("BREAK_GLASS_MAX_ATTEMPTS")?.unwrap_or(3),
            window: Duration::from_secs(
                parse_env::<u64>("BREAK_GLASS_WINDOW_SECONDS")?.unwrap_or(3600),
            ),
        };

        let rate_limit_backend = optional_env("RATE_LIMIT_BACKEND")
            .map(|value| RateLimitBackend::parse(&value))
            .transpose()?
            .unwrap_or(RateLimitBackend::Memory);
        let redis_url = optional_env("REDIS_URL");
        if rate_limit_backend == RateLimitBackend::Redis && redis_url.is_none() {
            bail!("REDIS_URL must be set when RATE_LIMIT_BACKEND=redis");
        }

        Ok(Self {
            database_url,
            bind_addr: SocketAddr::from((ip, port)),
            identity,
            break_glass,
            rate_limit_backend,
            redis_url,
            rate_limit_prefix: optional_env("RATE_LIMIT_PREFIX")
                .unwrap_or_else(|| "access:break-glass".to_string()),
            maintenance_cache_ttl: Duration::from_secs(
                parse_env("MAINTENANCE_CACHE_TTL_SECONDS")?.unwrap_or(30),
            ),
            tenant_lookup_timeout: Duration::from_millis(
                parse_env("TENANT_LOOKUP_TIMEOUT_MS")?.unwrap_or(2000),
            ),
            audit_write_timeout: Duration::from_millis(
                parse_env("AUDIT_WRITE_TIMEOUT_MS")?.unwrap_or(2000),
            ),
            security_webhook_url: optional_env("SECURITY_ALERT_WEBHOOK_URL"),
            security_webhook_bearer: optional_env("SECURITY_ALERT_WEBHOOK_BEARER"),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|value| parse_list(&value))
                .unwrap_or_default(),
        })
    }
}

pub fn validate_session_secret(secret: &[u8]) -> Result<()> {
    if secret.len() < MIN_SESSION_SECRET_BYTES {
        bail!(
            "BREAK_GLASS_SIGNING_SECRET must be at least {MIN_SESSION_SECRET_BYTES} bytes (got {})",
            secret.len()
        );
    }
    Ok(())
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| normalize_optional(&value))
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|err| anyhow!("Failed to parse {key}='{value}': {err}"))
        })
        .transpose()
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == ',' || c == ';' || c == ' ')
        .filter_map(normalize_optional)
        .collect()
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
