use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters shared by the access-control core. Cloning shares the underlying registry.
#[derive(Clone)]
pub struct CoreMetrics {
    pub registry: Registry,
    pub auth_decisions: IntCounterVec,
    pub audit_write_failures: IntCounter,
    pub break_glass_attempts: IntCounterVec,
    pub maintenance_reads: IntCounterVec,
}

impl CoreMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let auth_decisions = IntCounterVec::new(
            Opts::new(
                "access_auth_decisions_total",
                "Authentication and authorization decisions grouped by component and code",
            ),
            &["component", "code"],
        ).unwrap();
        let audit_write_failures = IntCounter::new(
            "audit_event_write_failures_total",
            "Audit events that could not be persisted",
        ).unwrap();
        let break_glass_attempts = IntCounterVec::new(
            Opts::new(
                "break_glass_attempts_total",
                "Emergency login attempts grouped by outcome",
            ),
            &["outcome"],
        ).unwrap();
        let maintenance_reads = IntCounterVec::new(
            Opts::new(
                "maintenance_flag_reads_total",
                "Maintenance flag lookups grouped by source (cache, store, error)",
            ),
            &["source"],
        ).unwrap();
        let _ = registry.register(Box::new(auth_decisions.clone()));
        let _ = registry.register(Box::new(audit_write_failures.clone()));
        let _ = registry.register(Box::new(break_glass_attempts.clone()));
        let _ = registry.register(Box::new(maintenance_reads.clone()));
        CoreMetrics { registry, auth_decisions, audit_write_failures, break_glass_attempts, maintenance_reads }
    }

    pub fn auth_decision(&self, component: &str, code: &str) {
        self.auth_decisions.with_label_values(&[component, code]).inc();
    }

    pub fn break_glass(&self, outcome: &str) {
        self.break_glass_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn maintenance_read(&self, source: &str) {
        self.maintenance_reads.with_label_values(&[source]).inc();
    }

    /// Prometheus text exposition of every registered family.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for CoreMetrics {
    fn default() -> Self { Self::new() }
}
