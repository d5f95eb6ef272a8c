use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Identity asserted by a verified, unexpired bearer credential.
///
/// Role names are trimmed, lower-cased and de-duplicated. Location ids keep their case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    pub subject: String,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub tenant_id: Option<String>,
    pub location_ids: Option<BTreeSet<String>>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub token_id: Option<String>,
    pub emergency: bool,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Builds claims from a decoded payload, rejecting credentials that expire at or before `now`.
    pub fn from_payload(payload: serde_json::Value, now: DateTime<Utc>) -> AuthResult<Self> {
        let repr: ClaimsRepr = serde_json::from_value(payload)
            .map_err(|err| AuthError::Malformed(format!("claim payload: {err}")))?;
        let claims = Claims::try_from(repr)?;
        if claims.expires_at <= now {
            return Err(AuthError::Expired(claims.expires_at));
        }
        Ok(claims)
    }
}

#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    #[serde(default)]
    sub: Option<Scalar>,
    #[serde(default, rename = "custom:user_id", alias = "user_id")]
    user_id: Option<Scalar>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "custom:roles")]
    roles: Option<MultiValue>,
    #[serde(default, rename = "tid", alias = "operator_id", alias = "custom:operator_id")]
    tenant_id: Option<Scalar>,
    #[serde(default, alias = "custom:location_ids")]
    location_ids: Option<MultiValue>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default)]
    is_emergency: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(i64),
}

impl Scalar {
    fn into_text(self) -> Option<String> {
        let text = match self {
            Scalar::Text(text) => text.trim().to_string(),
            Scalar::Number(number) => number.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Identity providers disagree on how multi-valued attributes are shipped: a JSON array,
/// a JSON array serialized into a string, or a comma separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MultiValue {
    List(Vec<String>),
    Text(String),
}

impl MultiValue {
    fn into_set(self, lowercase: bool) -> BTreeSet<String> {
        let items = match self {
            MultiValue::List(items) => items,
            MultiValue::Text(text) => {
                let trimmed = text.trim();
                if trimmed.starts_with('[') {
                    serde_json::from_str::<Vec<String>>(trimmed).unwrap_or_default()
                } else {
                    trimmed.split(',').map(str::to_string).collect()
                }
            }
        };
        items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .map(|item| if lowercase { item.to_lowercase() } else { item })
            .collect()
    }
}

fn timestamp(field: &'static str, seconds: i64) -> AuthResult<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| AuthError::Malformed(format!("claim '{field}' out of range: {seconds}")))
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let subject = value
            .user_id
            .and_then(Scalar::into_text)
            .or_else(|| value.sub.and_then(Scalar::into_text))
            .ok_or(AuthError::MissingClaim("sub"))?;
        let email = value
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or(AuthError::MissingClaim("email"))?;
        let roles = value
            .roles
            .ok_or(AuthError::MissingClaim("roles"))?
            .into_set(true);
        let expires_at = timestamp("exp", value.exp.ok_or(AuthError::MissingClaim("exp"))?)?;
        let issued_at = value.iat.map(|iat| timestamp("iat", iat)).transpose()?;

        Ok(Self {
            subject,
            email,
            roles,
            tenant_id: value.tenant_id.and_then(Scalar::into_text),
            location_ids: value.location_ids.map(|ids| ids.into_set(false)),
            issued_at,
            expires_at,
            token_id: value.jti.filter(|j| !j.trim().is_empty()),
            emergency: value.is_emergency,
        })
    }
}
