pub mod model;
pub mod postgres;
pub mod request;
pub mod store;
pub mod trail;

pub use model::{
    AuditActor, AuditError, AuditEvent, AuditEventKind, AuditOutcome, AuditResult, MutationKind,
    ANONYMOUS_ACTOR, AUDIT_EVENT_VERSION, NO_TENANT,
};
pub use postgres::PgAuditStore;
pub use request::RequestInfo;
pub use store::{summarize, ActorCount, AuditPage, AuditQuery, AuditStats, AuditStore, InMemoryAuditStore};
pub use trail::AuditTrail;
