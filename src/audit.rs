use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

pub const GENERATION_COMPLETED: &str = "alert_generation_completed";
pub const GENERATION_FAILED: &str = "alert_generation_failed";
pub const UPDATE_SCAN_COMPLETED: &str = "auto_update_scan_completed";
pub const UPDATE_CREATED: &str = "auto_update_created";
pub const UPDATES_SUPPRESSED: &str = "auto_update_suppressed";
pub const UPDATES_ENABLED: &str = "auto_update_enabled";

/// Structured event as written to the audit sink.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event: String,
    pub details: Value,
    pub recorded_at: DateTime<Utc>,
    pub source: &'static str,
}

impl AuditEvent {
    pub fn new(event: &str, details: Value) -> Self {
        Self {
            event: event.to_string(),
            details,
            recorded_at: Utc::now(),
            source: "disruption-alerts",
        }
    }
}

/// Fire-and-forget sink for run events. Implementations swallow their own
/// failures.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log_system(&self, event: &str, details: Value);
}

/// Writes audit events to the tracing log only.
#[derive(Debug, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log_system(&self, event: &str, details: Value) {
        info!(target: "audit", event = %event, details = %details, "audit event");
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn named(&self, event: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLogger {
    async fn log_system(&self, event: &str, details: Value) {
        self.events.lock().await.push(AuditEvent::new(event, details));
    }
}
