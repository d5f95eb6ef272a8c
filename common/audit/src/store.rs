use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::{AuditEvent, AuditEventKind, AuditResult};

pub const DEFAULT_QUERY_LIMIT: i64 = 50;
pub const MAX_QUERY_LIMIT: i64 = 200;
pub const DEFAULT_STATS_WINDOW_DAYS: i64 = 30;
pub const TOP_ACTORS: usize = 10;

/// Filters accepted by [`AuditStore::select`]. All filters combine with AND.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditQuery {
    pub actor_id: Option<String>,
    pub tenant_id: Option<String>,
    pub kind: Option<AuditEventKind>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.actor_id.as_deref().map_or(true, |a| event.actor_id == a)
            && self.tenant_id.as_deref().map_or(true, |t| event.tenant_id == t)
            && self.kind.map_or(true, |k| event.kind == k)
            && self.start.map_or(true, |s| event.occurred_at >= s)
            && self.end.map_or(true, |e| event.occurred_at <= e)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub events: Vec<AuditEvent>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActorCount {
    pub actor_id: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuditStats {
    pub window_days: i64,
    pub total_events: u64,
    pub events_by_kind: BTreeMap<String, u64>,
    pub top_actors: Vec<ActorCount>,
}

/// Append-only persistence for audit events. Implementations never expose update or delete.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert(&self, event: &AuditEvent) -> AuditResult<()>;
    async fn select(&self, query: &AuditQuery) -> AuditResult<AuditPage>;
    async fn stats(
        &self,
        tenant_id: Option<&str>,
        since: DateTime<Utc>,
        window_days: i64,
    ) -> AuditResult<AuditStats>;
}

/// Folds `(kind, actor)` pairs into dashboard aggregates.
pub fn summarize<'a, I>(rows: I, window_days: i64) -> AuditStats
where
    I: IntoIterator<Item = (AuditEventKind, &'a str)>,
{
    let mut total = 0u64;
    let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_actor: HashMap<&'a str, u64> = HashMap::new();
    for (kind, actor) in rows {
        total += 1;
        *by_kind.entry(kind.as_str().to_string()).or_insert(0) += 1;
        *by_actor.entry(actor).or_insert(0) += 1;
    }
    AuditStats {
        window_days,
        total_events: total,
        events_by_kind: by_kind,
        top_actors: rank_actors(by_actor.into_iter().map(|(a, c)| (a.to_string(), c)).collect()),
    }
}

pub(crate) fn rank_actors(mut counts: Vec<(String, u64)>) -> Vec<ActorCount> {
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
        .into_iter()
        .take(TOP_ACTORS)
        .map(|(actor_id, count)| ActorCount { actor_id, count })
        .collect()
}

/// Process-local store for tests and single-instance deployments.
#[derive(Clone, Default)]
pub struct InMemoryAuditStore {
    inner: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self { Self::default() }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.inner.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn insert(&self, event: &AuditEvent) -> AuditResult<()> {
        self.inner.write().await.push(event.clone());
        Ok(())
    }

    async fn select(&self, query: &AuditQuery) -> AuditResult<AuditPage> {
        let guard = self.inner.read().await;
        let mut matched: Vec<&AuditEvent> = guard.iter().filter(|e| query.matches(e)).collect();
        matched.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then_with(|| b.event_id.cmp(&a.event_id)));
        let total = matched.len() as u64;
        let events = matched
            .into_iter()
            .skip(query.effective_offset() as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .collect();
        Ok(AuditPage { events, total })
    }

    async fn stats(
        &self,
        tenant_id: Option<&str>,
        since: DateTime<Utc>,
        window_days: i64,
    ) -> AuditResult<AuditStats> {
        let guard = self.inner.read().await;
        let rows = guard
            .iter()
            .filter(|e| e.occurred_at >= since)
            .filter(|e| tenant_id.map_or(true, |t| e.tenant_id == t))
            .map(|e| (e.kind, e.actor_id.as_str()));
        Ok(summarize(rows, window_days))
    }
}
