use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(3);

/// Alert posted to the security team's webhook after an emergency session is issued.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyAccessAlert {
    pub text: String,
    pub account_id: String,
    pub email: String,
    pub tenant_id: Option<String>,
    pub source_ip: String,
    pub user_agent: Option<String>,
    pub reason: String,
    pub token_jti: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SecurityNotifier {
    client: Client,
    url: Option<String>,
    bearer: Option<String>,
    timeout: Duration,
}

impl SecurityNotifier {
    pub fn new(client: Client, url: Option<String>, bearer: Option<String>) -> Self {
        Self {
            client,
            url: url.filter(|u| !u.trim().is_empty()),
            bearer,
            timeout: WEBHOOK_TIMEOUT,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Client::new(), None, None)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Posts the alert when a webhook is configured. Failures are logged and swallowed.
    pub async fn emergency_access(&self, alert: &EmergencyAccessAlert) {
        let Some(url) = self.url.as_deref() else {
            return;
        };
        match post_security_webhook(&self.client, url, self.bearer.as_deref(), alert, self.timeout)
            .await
        {
            Ok(()) => info!(token_jti = %alert.token_jti, "security alert delivered"),
            Err(err) => warn!(
                ?err,
                token_jti = %alert.token_jti,
                account_id = %alert.account_id,
                "Failed to post security webhook"
            ),
        }
    }
}

pub async fn post_security_webhook<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    bearer: Option<&str>,
    payload: &T,
    timeout: Duration,
) -> Result<()> {
    let mut request = client.post(url).timeout(timeout).json(payload);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(anyhow!(
            "Security webhook returned status {}",
            response.status()
        ));
    }
    Ok(())
}

impl EmergencyAccessAlert {
    pub fn summary(email: &str, source_ip: &str, reason: &str) -> String {
        format!("Emergency access granted to {email} from {source_ip}. Reason: {reason}")
    }
}
