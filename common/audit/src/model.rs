use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::request::RequestInfo;

pub const AUDIT_EVENT_VERSION: i32 = 1;

/// Actor recorded when no credential could be attributed to the request.
pub const ANONYMOUS_ACTOR: &str = "anonymous";
/// Tenant recorded when no effective tenant was resolved.
pub const NO_TENANT: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    AuthSuccess,
    AuthDenied,
    PlatformOperatorAccess,
    ResourceCreate,
    ResourceUpdate,
    ResourceDelete,
    ResourceView,
    PermissionDenied,
    OperatorContextConflict,
    OperatorContextRequired,
}

impl AuditEventKind {
    pub const ALL: [AuditEventKind; 10] = [
        AuditEventKind::AuthSuccess,
        AuditEventKind::AuthDenied,
        AuditEventKind::PlatformOperatorAccess,
        AuditEventKind::ResourceCreate,
        AuditEventKind::ResourceUpdate,
        AuditEventKind::ResourceDelete,
        AuditEventKind::ResourceView,
        AuditEventKind::PermissionDenied,
        AuditEventKind::OperatorContextConflict,
        AuditEventKind::OperatorContextRequired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::AuthSuccess => "AUTH_SUCCESS",
            AuditEventKind::AuthDenied => "AUTH_DENIED",
            AuditEventKind::PlatformOperatorAccess => "PLATFORM_OPERATOR_ACCESS",
            AuditEventKind::ResourceCreate => "RESOURCE_CREATE",
            AuditEventKind::ResourceUpdate => "RESOURCE_UPDATE",
            AuditEventKind::ResourceDelete => "RESOURCE_DELETE",
            AuditEventKind::ResourceView => "RESOURCE_VIEW",
            AuditEventKind::PermissionDenied => "PERMISSION_DENIED",
            AuditEventKind::OperatorContextConflict => "OPERATOR_CONTEXT_CONFLICT",
            AuditEventKind::OperatorContextRequired => "OPERATOR_CONTEXT_REQUIRED",
        }
    }

    /// Kind used for an authentication-layer denial carrying `error_code`.
    pub fn for_denial(error_code: &str) -> Self {
        match error_code {
            "OPERATOR_CONTEXT_CONFLICT" => AuditEventKind::OperatorContextConflict,
            "OPERATOR_CONTEXT_REQUIRED" => AuditEventKind::OperatorContextRequired,
            _ => AuditEventKind::AuthDenied,
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditEventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AuditError::Decode(format!("unknown event kind '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome { Success, Denied, Error }

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Error => "error",
        }
    }
}

impl FromStr for AuditOutcome {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditOutcome::Success),
            "denied" => Ok(AuditOutcome::Denied),
            "error" => Ok(AuditOutcome::Error),
            other => Err(AuditError::Decode(format!("unknown outcome '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind { Create, Update, Delete }

impl From<MutationKind> for AuditEventKind {
    fn from(value: MutationKind) -> Self {
        match value {
            MutationKind::Create => AuditEventKind::ResourceCreate,
            MutationKind::Update => AuditEventKind::ResourceUpdate,
            MutationKind::Delete => AuditEventKind::ResourceDelete,
        }
    }
}

/// Who performed the audited action, as known at the time of the decision.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AuditActor {
    pub id: Option<String>,
    pub roles: Vec<String>,
}

impl AuditActor {
    pub fn new<I, S>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { id: Some(id.into()), roles: roles.into_iter().map(Into::into).collect() }
    }

    pub fn anonymous() -> Self { Self::default() }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_version: i32,
    pub occurred_at: DateTime<Utc>,
    pub request_id: Uuid,
    pub actor_id: String,
    pub actor_roles: Vec<String>,
    pub tenant_id: String,
    pub endpoint: String,
    pub method: String,
    pub kind: AuditEventKind,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl AuditEvent {
    /// Starts an event for `request` attributed to the anonymous actor and no tenant.
    pub fn new(kind: AuditEventKind, outcome: AuditOutcome, request: &RequestInfo) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_version: AUDIT_EVENT_VERSION,
            occurred_at: Utc::now(),
            request_id: request.request_id,
            actor_id: ANONYMOUS_ACTOR.to_string(),
            actor_roles: Vec::new(),
            tenant_id: NO_TENANT.to_string(),
            endpoint: request.endpoint.clone(),
            method: request.method.clone(),
            kind,
            outcome,
            error_code: None,
            resource_type: None,
            resource_id: None,
            previous_state: None,
            new_state: None,
            metadata: None,
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
        }
    }

    pub fn actor(mut self, actor: &AuditActor) -> Self {
        if let Some(id) = actor.id.as_deref().filter(|id| !id.is_empty()) {
            self.actor_id = id.to_string();
        }
        self.actor_roles = actor.roles.clone();
        self
    }

    pub fn tenant(mut self, tenant_id: Option<&str>) -> Self {
        if let Some(tenant) = tenant_id.filter(|t| !t.is_empty()) {
            self.tenant_id = tenant.to_string();
        }
        self
    }

    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn resource(mut self, resource_type: Option<&str>, resource_id: Option<&str>) -> Self {
        self.resource_type = resource_type.map(str::to_string);
        self.resource_id = resource_id.map(str::to_string);
        self
    }

    pub fn states(
        mut self,
        previous: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Self {
        self.previous_state = previous;
        self.new_state = new;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit store error: {0}")]
    Store(String),
    #[error("audit store timed out")]
    Timeout,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for AuditError {
    fn from(value: sqlx::Error) -> Self {
        Self::Store(value.to_string())
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
