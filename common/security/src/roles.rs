use std::fmt;

use serde::{Deserialize, Serialize};

pub const PLATFORM_ADMIN: &str = "platform_admin";
pub const OPERATOR_ADMIN: &str = "operator_admin";
pub const OPERATOR_STAFF: &str = "operator_staff";
pub const BILLING_ADMIN: &str = "billing_admin";
pub const COMPLIANCE_REVIEWER: &str = "compliance_reviewer";
pub const LOCATION_STAFF: &str = "location_staff";

/// Coarse access levels, least privileged first so that `Ord` reads as "at least".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Customer,
    LocationStaff,
    TenantStaff,
    TenantAdmin,
    PlatformOperator,
}

impl AccessLevel {
    /// Level granted by a single role name. Unknown names grant nothing beyond customer.
    pub fn for_role(role: &str) -> Self {
        match role {
            PLATFORM_ADMIN => AccessLevel::PlatformOperator,
            OPERATOR_ADMIN => AccessLevel::TenantAdmin,
            OPERATOR_STAFF | BILLING_ADMIN | COMPLIANCE_REVIEWER => AccessLevel::TenantStaff,
            LOCATION_STAFF => AccessLevel::LocationStaff,
            _ => AccessLevel::Customer,
        }
    }

    /// Highest level granted by any of `roles`; an empty set is a customer.
    pub fn classify<'a, I>(roles: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        roles
            .into_iter()
            .map(AccessLevel::for_role)
            .max()
            .unwrap_or(AccessLevel::Customer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Customer => "customer",
            AccessLevel::LocationStaff => "location_staff",
            AccessLevel::TenantStaff => "tenant_staff",
            AccessLevel::TenantAdmin => "tenant_admin",
            AccessLevel::PlatformOperator => "platform_operator",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn has_platform_role<'a, I>(roles: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    roles.into_iter().any(|role| role == PLATFORM_ADMIN)
}
