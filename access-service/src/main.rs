use std::sync::Arc;
use std::time::Duration;

use access_service::app::{build_router, AppState};
use access_service::break_glass::BreakGlassAuthenticator;
use access_service::config::ServiceConfig;
use access_service::credentials::PgCredentialStore;
use access_service::maintenance::{MaintenanceGate, PgMaintenanceStore};
use access_service::notifications::SecurityNotifier;
use access_service::rate_limiter::build_rate_limiter;
use access_service::tokens::SessionSigner;
use anyhow::Context;
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use common_audit::{AuditTrail, PgAuditStore};
use common_auth::{JwtConfig, JwtVerifier, TokenAuthenticator};
use common_observability::CoreMetrics;
use common_security::{OperatorContextResolver, PgTenantDirectory, RoleAuthorizer};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const LOCAL_KEY_ID: &str = "local-dev";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env()?;
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to DATABASE_URL")?;

    let metrics = CoreMetrics::new();
    let audit = AuditTrail::new(Arc::new(PgAuditStore::new(db_pool.clone())))
        .with_write_timeout(config.audit_write_timeout)
        .with_metrics(metrics.clone());

    let identity = &config.identity;
    let mut builder = JwtVerifier::builder(
        JwtConfig::new(&identity.issuer, &identity.audience).with_leeway(identity.leeway_seconds),
    );
    if let Some(pem) = &identity.public_key_pem {
        builder = builder.with_rsa_pem(LOCAL_KEY_ID, pem.as_bytes())?;
    }
    if let Some(url) = &identity.jwks_url {
        builder = builder.with_jwks_url(url.clone());
    }
    let jwt_verifier = builder.build().await.context("Failed to initialise JWT verifier")?;
    spawn_jwks_refresh(jwt_verifier.clone(), identity.jwks_refresh);

    let signer = SessionSigner::new(
        JwtConfig::new(&config.break_glass.session_issuer, &identity.audience),
        &config.break_glass.signing_secret,
    );
    let authenticator = TokenAuthenticator::new()
        .with_verifier(jwt_verifier)
        .with_verifier(signer.session_verifier());

    let resolver = OperatorContextResolver::new(
        authenticator,
        Arc::new(PgTenantDirectory::new(db_pool.clone())),
        audit.clone(),
    )
    .with_lookup_timeout(config.tenant_lookup_timeout)
    .with_metrics(metrics.clone());

    let notifier = SecurityNotifier::new(
        reqwest::Client::new(),
        config.security_webhook_url.clone(),
        config.security_webhook_bearer.clone(),
    );
    let break_glass = BreakGlassAuthenticator::new(
        build_rate_limiter(&config).await?,
        Arc::new(PgCredentialStore::new(db_pool.clone())),
        signer,
        audit.clone(),
    )
    .with_notifier(notifier)
    .with_lookup_timeout(config.tenant_lookup_timeout)
    .with_metrics(metrics.clone());

    let maintenance = MaintenanceGate::new(Arc::new(PgMaintenanceStore::new(db_pool.clone())))
        .with_ttl(config.maintenance_cache_ttl)
        .with_metrics(metrics.clone());

    let state = AppState {
        resolver,
        authorizer: RoleAuthorizer::new(audit.clone()).with_metrics(metrics.clone()),
        audit,
        maintenance,
        break_glass,
        metrics,
    };

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            config
                .cors_allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-operator-id"),
            HeaderName::from_static("x-request-id"),
        ]);

    let app = build_router(state).layer(cors);

    info!(addr = %config.bind_addr, rate_limit_backend = ?config.rate_limit_backend, "starting access-service");
    let listener = TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_jwks_refresh(verifier: JwtVerifier, every: Duration) {
    if !verifier.has_jwks() {
        return;
    }

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the builder has just fetched.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match verifier.refresh_jwks().await {
                Ok(count) => debug!(count, "Refreshed JWKS keys"),
                Err(err) => warn!(error = %err, "Failed to refresh JWKS keys"),
            }
        }
    });
}
