pub mod context;
pub mod directory;
pub mod error;
pub mod policy;
pub mod resolver;
pub mod roles;
pub mod test_macros;

pub use context::{OperatorContext, OperatorCtxExtractor, RequestMeta};
pub use directory::{
    DirectoryError, InMemoryTenantDirectory, PgTenantDirectory, Tenant, TenantDirectory,
};
pub use error::SecurityError;
pub use policy::{permits, permits_location, Resource, RoleAuthorizer};
pub use resolver::{tenant_hint, OperatorContextResolver, TENANT_HINT_HEADER};
pub use roles::AccessLevel;
