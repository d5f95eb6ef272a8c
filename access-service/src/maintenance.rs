use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_observability::CoreMetrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

pub const MAINTENANCE_SETTING_KEY: &str = "maintenance_mode";
pub const DEFAULT_MAINTENANCE_MESSAGE: &str =
    "We are performing scheduled maintenance. Please check back soon.";

/// Route prefixes that stay reachable while tenant-facing traffic is suspended.
pub const EXEMPT_PREFIXES: [&str; 8] = [
    "/admin",
    "/api/admin",
    "/api/auth",
    "/api/platform",
    "/api/maintenance",
    "/maintenance",
    "/healthz",
    "/internal",
];

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Prefix match on whole path segments: `/api/admin/x` is exempt, `/api/administrator` is not.
pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|prefix| {
        path == *prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MaintenanceStatus {
    pub is_enabled: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub enabled_by: Option<String>,
    #[serde(default)]
    pub enabled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MaintenanceStatus {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Message shown to suspended callers; blank messages fall back to the default notice.
    pub fn display_message(&self) -> &str {
        let trimmed = self.message.trim();
        if trimmed.is_empty() {
            DEFAULT_MAINTENANCE_MESSAGE
        } else {
            trimmed
        }
    }

    fn setting_value(&self) -> Value {
        serde_json::json!({
            "is_enabled": self.is_enabled,
            "message": self.message,
            "enabled_by": self.enabled_by,
            "enabled_at": self.enabled_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("maintenance store error: {0}")]
    Store(String),
    #[error("maintenance store timed out")]
    Timeout,
    #[error("invalid maintenance setting: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for MaintenanceError {
    fn from(value: sqlx::Error) -> Self {
        Self::Store(value.to_string())
    }
}

/// Single global flag persisted outside the process.
#[async_trait]
pub trait MaintenanceStore: Send + Sync {
    async fn load(&self) -> Result<MaintenanceStatus, MaintenanceError>;
    async fn save(&self, status: &MaintenanceStatus) -> Result<(), MaintenanceError>;
}

#[derive(Clone, Default)]
pub struct InMemoryMaintenanceStore {
    inner: Arc<RwLock<MaintenanceStatus>>,
}

impl InMemoryMaintenanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MaintenanceStore for InMemoryMaintenanceStore {
    async fn load(&self) -> Result<MaintenanceStatus, MaintenanceError> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, status: &MaintenanceStatus) -> Result<(), MaintenanceError> {
        let mut guard = self.inner.write().await;
        *guard = MaintenanceStatus { updated_at: Some(Utc::now()), ..status.clone() };
        Ok(())
    }
}

/// `system_settings` row keyed by `maintenance_mode`. A missing row means not suspended.
#[derive(Clone)]
pub struct PgMaintenanceStore {
    pool: PgPool,
}

impl PgMaintenanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MaintenanceStore for PgMaintenanceStore {
    async fn load(&self) -> Result<MaintenanceStatus, MaintenanceError> {
        let row: Option<(Value, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT setting_value, updated_at FROM system_settings WHERE setting_key = $1",
        )
        .bind(MAINTENANCE_SETTING_KEY)
        .fetch_optional(&self.pool)
        .await?;

        let Some((value, updated_at)) = row else {
            return Ok(MaintenanceStatus::disabled());
        };
        let mut status: MaintenanceStatus = serde_json::from_value(value)
            .map_err(|err| MaintenanceError::Decode(err.to_string()))?;
        status.updated_at = updated_at;
        Ok(status)
    }

    async fn save(&self, status: &MaintenanceStatus) -> Result<(), MaintenanceError> {
        sqlx::query(
            "INSERT INTO system_settings (setting_key, setting_value, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (setting_key)
             DO UPDATE SET setting_value = EXCLUDED.setting_value, updated_at = EXCLUDED.updated_at",
        )
        .bind(MAINTENANCE_SETTING_KEY)
        .bind(status.setting_value())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedStatus {
    status: MaintenanceStatus,
    fetched_at: Instant,
}

/// Cached view of the maintenance flag shared by every request.
///
/// Reads are served from cache for `ttl`; a failed or slow store read fails open and is not
/// cached, so the next request retries the store.
#[derive(Clone)]
pub struct MaintenanceGate {
    store: Arc<dyn MaintenanceStore>,
    cache: Arc<RwLock<Option<CachedStatus>>>,
    ttl: Duration,
    read_timeout: Duration,
    metrics: Option<CoreMetrics>,
}

impl MaintenanceGate {
    pub fn new(store: Arc<dyn MaintenanceStore>) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(None)),
            ttl: DEFAULT_CACHE_TTL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: CoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn status(&self) -> MaintenanceStatus {
        {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    self.count("cache");
                    return cached.status.clone();
                }
            }
        }

        match timeout(self.read_timeout, self.store.load()).await {
            Ok(Ok(status)) => {
                self.count("store");
                *self.cache.write().await =
                    Some(CachedStatus { status: status.clone(), fetched_at: Instant::now() });
                status
            }
            Ok(Err(err)) => {
                self.count("error");
                warn!(error = %err, "maintenance flag read failed; treating as not suspended");
                MaintenanceStatus::disabled()
            }
            Err(_) => {
                self.count("error");
                warn!(timeout_ms = self.read_timeout.as_millis() as u64, "maintenance flag read timed out; treating as not suspended");
                MaintenanceStatus::disabled()
            }
        }
    }

    /// `(suspended, message)` for tenant-facing routes.
    pub async fn is_suspended(&self) -> (bool, String) {
        let status = self.status().await;
        if status.is_enabled {
            (true, status.display_message().to_string())
        } else {
            (false, String::new())
        }
    }

    /// Persists a new flag value and drops the cache. Returns the previous and new state.
    pub async fn set(
        &self,
        enabled: bool,
        message: Option<&str>,
        actor_id: &str,
    ) -> Result<(MaintenanceStatus, MaintenanceStatus), MaintenanceError> {
        let previous = timeout(self.read_timeout, self.store.load())
            .await
            .map_err(|_| MaintenanceError::Timeout)??;

        let now = Utc::now();
        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MAINTENANCE_MESSAGE)
            .to_string();
        let next = MaintenanceStatus {
            is_enabled: enabled,
            message,
            enabled_by: Some(actor_id.to_string()),
            enabled_at: enabled.then_some(now),
            updated_at: Some(now),
        };

        timeout(self.read_timeout, self.store.save(&next))
            .await
            .map_err(|_| MaintenanceError::Timeout)??;
        self.invalidate().await;

        info!(enabled, actor_id, "maintenance mode updated");
        Ok((previous, next))
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    fn count(&self, source: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.maintenance_read(source);
        }
    }
}
