use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub active: bool,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("tenant directory query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for DirectoryError {
    fn from(value: sqlx::Error) -> Self {
        Self::Query(value.to_string())
    }
}

/// Read-only tenant lookup consulted when a platform operator selects a tenant.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, DirectoryError>;
}

#[derive(Clone, Default)]
pub struct InMemoryTenantDirectory {
    tenants: Arc<RwLock<HashMap<String, Tenant>>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, id: impl Into<String>, active: bool) {
        let id = id.into();
        self.tenants
            .write()
            .await
            .insert(id.clone(), Tenant { id, active });
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, DirectoryError> {
        Ok(self.tenants.read().await.get(tenant_id).cloned())
    }
}

/// Reads the `operators` table.
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, DirectoryError> {
        let row: Option<(String, bool)> = sqlx::query_as(
            "SELECT operator_id::text, is_active FROM operators WHERE operator_id::text = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, active)| Tenant { id, active }))
    }
}
