#![allow(dead_code)]

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use access_service::app::{build_router, AppState};
use access_service::break_glass::BreakGlassAuthenticator;
use access_service::credentials::{
    CredentialError, EmergencyCredential, EmergencyCredentialStore, InMemoryCredentialStore,
};
use access_service::maintenance::{InMemoryMaintenanceStore, MaintenanceGate};
use access_service::notifications::SecurityNotifier;
use access_service::rate_limiter::InMemoryRateLimiter;
use access_service::tokens::SessionSigner;
use anyhow::Result;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use common_audit::{AuditEvent, AuditEventKind, AuditTrail, InMemoryAuditStore};
use common_auth::{JwtConfig, TokenAuthenticator, BREAK_GLASS_KID};
use common_observability::CoreMetrics;
use common_security::{InMemoryTenantDirectory, OperatorContextResolver, RoleAuthorizer};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand_core::OsRng;
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const SESSION_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
/// base32 of the RFC 6238 SHA-1 test key
pub const TOTP_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
pub const PASSWORD: &str = "correct horse battery staple";
pub const EMERGENCY_EMAIL: &str = "ops@example.com";

/// Low-cost Argon2 hash so tests stay fast; verification reads the params from the string.
pub fn cheap_hash(password: &str) -> String {
    let params = Params::new(8, 1, 1, None).expect("argon2 params");
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::generate(&mut OsRng);
    argon
        .hash_password(password.as_bytes(), &salt)
        .expect("hash password")
        .to_string()
}

pub fn emergency_credential() -> EmergencyCredential {
    EmergencyCredential {
        account_id: "acct-emergency".into(),
        email: EMERGENCY_EMAIL.into(),
        display_name: Some("Ops On Call".into()),
        password_hash: cheap_hash(PASSWORD),
        totp_secret: TOTP_SECRET.into(),
        active: true,
        is_emergency_account: true,
        tenant_id: Some("t1".into()),
        roles: vec!["operator_admin".into()],
    }
}

/// Credential store that counts lookups so tests can assert none happened.
#[derive(Default)]
pub struct CountingCredentialStore {
    pub inner: InMemoryCredentialStore,
    lookups: AtomicUsize,
}

impl CountingCredentialStore {
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmergencyCredentialStore for CountingCredentialStore {
    async fn get_emergency_credential(
        &self,
        email: &str,
    ) -> Result<Option<EmergencyCredential>, CredentialError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_emergency_credential(email).await
    }
}

pub struct Harness {
    pub audit_store: InMemoryAuditStore,
    pub credentials: Arc<CountingCredentialStore>,
    pub directory: InMemoryTenantDirectory,
    pub signer: SessionSigner,
    pub metrics: CoreMetrics,
    pub state: AppState,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_notifier(SecurityNotifier::disabled()).await
    }

    pub async fn with_notifier(notifier: SecurityNotifier) -> Self {
        let metrics = CoreMetrics::new();
        let audit_store = InMemoryAuditStore::new();
        let audit = AuditTrail::new(Arc::new(audit_store.clone())).with_metrics(metrics.clone());

        let credentials = Arc::new(CountingCredentialStore::default());
        credentials.inner.insert(emergency_credential()).await;

        let directory = InMemoryTenantDirectory::new();
        directory.upsert("t1", true).await;
        directory.upsert("t2", true).await;
        directory.upsert("t9", false).await;

        let signer = SessionSigner::new(
            JwtConfig::new("access-service", "mail-platform"),
            SESSION_SECRET,
        );
        let authenticator = TokenAuthenticator::new().with_verifier(signer.session_verifier());
        let resolver =
            OperatorContextResolver::new(authenticator, Arc::new(directory.clone()), audit.clone())
                .with_metrics(metrics.clone());

        let break_glass = BreakGlassAuthenticator::new(
            Arc::new(InMemoryRateLimiter::new(3, Duration::from_secs(3600))),
            credentials.clone(),
            signer.clone(),
            audit.clone(),
        )
        .with_notifier(notifier)
        .with_metrics(metrics.clone());

        let maintenance = MaintenanceGate::new(Arc::new(InMemoryMaintenanceStore::new()))
            .with_metrics(metrics.clone());

        let state = AppState {
            resolver,
            authorizer: RoleAuthorizer::new(audit.clone()).with_metrics(metrics.clone()),
            audit,
            maintenance,
            break_glass,
            metrics: metrics.clone(),
        };

        Self { audit_store, credentials, directory, signer, metrics, state }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Signed bearer token for a regular (non-emergency) session with the given roles
    /// and optional bound tenant.
    pub fn token(&self, subject: &str, roles: &[&str], tenant: Option<&str>) -> String {
        let config = self.signer.config();
        let now = Utc::now().timestamp();
        let mut claims = json!({
            "sub": subject,
            "email": format!("{subject}@example.com"),
            "roles": roles,
            "is_emergency": false,
            "iat": now,
            "exp": now + 600,
            "iss": config.issuer,
            "aud": config.audience,
        });
        if let Some(tenant) = tenant {
            claims["tid"] = json!(tenant);
        }
        let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
        header.kid = Some(BREAK_GLASS_KID.to_string());
        encode(&header, &claims, &EncodingKey::from_secret(SESSION_SECRET)).expect("encode token")
    }

    /// Emergency session minted the same way a successful break-glass login mints one.
    pub fn emergency_token(&self, subject: &str, roles: &[&str], tenant: Option<&str>) -> String {
        let credential = EmergencyCredential {
            account_id: subject.into(),
            email: format!("{subject}@example.com"),
            display_name: None,
            password_hash: String::new(),
            totp_secret: String::new(),
            active: true,
            is_emergency_account: true,
            tenant_id: tenant.map(str::to_string),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        self.signer.issue(&credential, Utc::now()).expect("issue token").token
    }

    pub async fn events_of(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.audit_store
            .events()
            .await
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    use tower::util::ServiceExt;
    router.clone().oneshot(request).await.expect("router call")
}

pub async fn json_body(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn text_body(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub struct TestDatabase {
    pool: PgPool,
}

impl TestDatabase {
    pub async fn setup() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("ACCESS_TEST_DATABASE_URL") else {
            eprintln!(
                "Skipping access-service Postgres tests: set ACCESS_TEST_DATABASE_URL to run them.",
            );
            return Ok(None);
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;
        run_migrations(&pool).await?;
        Ok(Some(Self { pool }))
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let mut entries = std::fs::read_dir(&migrations_dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    for path in entries {
        let sql = std::fs::read_to_string(&path)?;
        for statement in sql.split(';') {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            sqlx::query(trimmed).execute(pool).await?;
        }
    }

    Ok(())
}
