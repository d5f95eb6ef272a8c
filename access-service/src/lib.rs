pub mod app;
pub mod audit_handlers;
pub mod break_glass;
pub mod break_glass_handlers;
pub mod config;
pub mod context_handlers;
pub mod credentials;
pub mod maintenance;
pub mod maintenance_handlers;
pub mod metrics;
pub mod mfa;
pub mod notifications;
pub mod pipeline;
pub mod rate_limiter;
pub mod tokens;

pub use app::{build_router, AppState};
