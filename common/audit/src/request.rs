use axum::http::{HeaderMap, Method, Uri};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "X-Request-ID";
const UNKNOWN_SOURCE: &str = "unknown";

/// Per-request metadata stamped onto every audit event and error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestInfo {
    pub request_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            method: method.into(),
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn from_parts(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let request_id = header_str(headers, REQUEST_ID_HEADER)
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_else(Uuid::new_v4);
        Self {
            request_id,
            endpoint: uri.path().to_string(),
            method: method.as_str().to_string(),
            ip_address: client_ip(headers),
            user_agent: header_str(headers, "User-Agent"),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Key used for per-source throttling; requests without a client address share one bucket.
    pub fn source_key(&self) -> &str {
        self.ip_address.as_deref().unwrap_or(UNKNOWN_SOURCE)
    }
}

fn header_str(map: &HeaderMap, name: &str) -> Option<String> {
    map.get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "X-Forwarded-For")
        .and_then(|list| {
            list.split(',')
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string)
        })
        .or_else(|| header_str(headers, "X-Real-IP"))
}
