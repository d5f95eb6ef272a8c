use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::model::{AuditEvent, AuditResult};
use crate::store::{rank_actors, AuditPage, AuditQuery, AuditStats, AuditStore};

const SELECT_COLUMNS: &str = "SELECT event_id, event_version, occurred_at, request_id, actor_user_id, actor_roles, effective_operator_id, endpoint, method, event_type, result, error_code, resource_type, resource_id, previous_state, new_state, metadata, ip_address, user_agent FROM audit_logs WHERE 1=1";

/// `audit_logs` table writer/reader. Rows are inserted once and never updated.
#[derive(Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &AuditQuery) {
    if let Some(actor) = &query.actor_id { builder.push(" AND actor_user_id = "); builder.push_bind(actor.clone()); }
    if let Some(tenant) = &query.tenant_id { builder.push(" AND effective_operator_id = "); builder.push_bind(tenant.clone()); }
    if let Some(kind) = query.kind { builder.push(" AND event_type = "); builder.push_bind(kind.as_str()); }
    if let Some(start) = query.start { builder.push(" AND occurred_at >= "); builder.push_bind(start); }
    if let Some(end) = query.end { builder.push(" AND occurred_at <= "); builder.push_bind(end); }
}

fn row_to_event(row: &PgRow) -> AuditResult<AuditEvent> {
    let kind: String = row.try_get("event_type")?;
    let outcome: String = row.try_get("result")?;
    Ok(AuditEvent {
        event_id: row.try_get("event_id")?,
        event_version: row.try_get("event_version")?,
        occurred_at: row.try_get("occurred_at")?,
        request_id: row.try_get("request_id")?,
        actor_id: row.try_get("actor_user_id")?,
        actor_roles: row.try_get("actor_roles")?,
        tenant_id: row.try_get("effective_operator_id")?,
        endpoint: row.try_get("endpoint")?,
        method: row.try_get("method")?,
        kind: kind.parse()?,
        outcome: outcome.parse()?,
        error_code: row.try_get("error_code")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        previous_state: row.try_get("previous_state")?,
        new_state: row.try_get("new_state")?,
        metadata: row.try_get("metadata")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
    })
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, event: &AuditEvent) -> AuditResult<()> {
        sqlx::query(
            "INSERT INTO audit_logs (event_id, event_version, occurred_at, request_id, actor_user_id, actor_roles, effective_operator_id, endpoint, method, event_type, result, error_code, resource_type, resource_id, previous_state, new_state, metadata, ip_address, user_agent)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
        )
        .bind(event.event_id)
        .bind(event.event_version)
        .bind(event.occurred_at)
        .bind(event.request_id)
        .bind(&event.actor_id)
        .bind(&event.actor_roles)
        .bind(&event.tenant_id)
        .bind(&event.endpoint)
        .bind(&event.method)
        .bind(event.kind.as_str())
        .bind(event.outcome.as_str())
        .bind(&event.error_code)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(&event.previous_state)
        .bind(&event.new_state)
        .bind(&event.metadata)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn select(&self, query: &AuditQuery) -> AuditResult<AuditPage> {
        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(SELECT_COLUMNS);
        push_filters(&mut builder, query);
        builder.push(" ORDER BY occurred_at DESC, event_id DESC LIMIT ");
        builder.push_bind(query.effective_limit());
        builder.push(" OFFSET ");
        builder.push_bind(query.effective_offset());

        let rows = builder.build().fetch_all(&self.pool).await?;
        let events = rows.iter().map(row_to_event).collect::<AuditResult<Vec<_>>>()?;
        Ok(AuditPage { events, total: total.max(0) as u64 })
    }

    async fn stats(
        &self,
        tenant_id: Option<&str>,
        since: DateTime<Utc>,
        window_days: i64,
    ) -> AuditResult<AuditStats> {
        let by_kind: Vec<(String, i64)> = sqlx::query_as(
            "SELECT event_type, COUNT(*) FROM audit_logs
             WHERE occurred_at >= $1 AND ($2::text IS NULL OR effective_operator_id = $2)
             GROUP BY event_type",
        )
        .bind(since)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let by_actor: Vec<(String, i64)> = sqlx::query_as(
            "SELECT actor_user_id, COUNT(*) FROM audit_logs
             WHERE occurred_at >= $1 AND ($2::text IS NULL OR effective_operator_id = $2)
             GROUP BY actor_user_id
             ORDER BY COUNT(*) DESC, actor_user_id ASC
             LIMIT 10",
        )
        .bind(since)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let total_events = by_kind.iter().map(|(_, c)| (*c).max(0) as u64).sum();
        Ok(AuditStats {
            window_days,
            total_events,
            events_by_kind: by_kind.into_iter().map(|(k, c)| (k, c.max(0) as u64)).collect(),
            top_actors: rank_actors(by_actor.into_iter().map(|(a, c)| (a, c.max(0) as u64)).collect()),
        })
    }
}
