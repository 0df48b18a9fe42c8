use crate::audit::{AuditEvent, AuditLogger};
use crate::config::KafkaConfig;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde_json::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Counts consecutive failures and opens for a cooldown once `max_failures`
/// is reached.
#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, cooldown: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether a call may go through at `now`. Resets once the cooldown is over.
    pub fn allow(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match state.open_until {
            Some(until) if now < until => false,
            Some(_) => {
                state.open_until = None;
                state.consecutive_failures = 0;
                info!("Audit circuit breaker reset. Resuming publishing.");
                true
            }
            None => true,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.consecutive_failures = 0;
    }

    pub fn record_failure(&self, now: Instant) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.max_failures {
            warn!(
                "Audit circuit breaker tripped ({} consecutive failures)! Dropping events for {} seconds...",
                state.consecutive_failures,
                self.cooldown.as_secs()
            );
            state.open_until = Some(now + self.cooldown);
        }
    }
}

/// Publishes audit events as JSON to a Kafka topic with SASL/SCRAM
/// authentication, behind a circuit breaker.
pub struct KafkaAuditLogger {
    producer: FutureProducer,
    topic: String,
    breaker: CircuitBreaker,
}

impl KafkaAuditLogger {
    pub fn new(config: &KafkaConfig) -> anyhow::Result<Self> {
        info!("Initializing Kafka audit producer for topic: {}", config.audit_topic);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", "5000")
            // SASL Configuration
            .set("security.protocol", &config.security_protocol)
            .set("sasl.mechanism", &config.sasl_mechanism)
            .set("sasl.username", &config.username)
            .set("sasl.password", &config.password);

        let producer: FutureProducer = client_config.create()?;

        Ok(Self {
            producer,
            topic: config.audit_topic.clone(),
            breaker: CircuitBreaker::new(
                config.max_retries,
                Duration::from_secs(config.circuit_breaker_cooldown),
            ),
        })
    }
}

#[async_trait]
impl AuditLogger for KafkaAuditLogger {
    async fn log_system(&self, event: &str, details: Value) {
        if !self.breaker.allow(Instant::now()) {
            debug!(event = %event, "audit circuit open, dropping event");
            return;
        }

        let payload = match serde_json::to_string(&AuditEvent::new(event, details)) {
            Ok(p) => p,
            Err(e) => {
                error!(event = %event, error = %e, "Failed to serialize audit event");
                return;
            }
        };

        let record = FutureRecord::to(&self.topic).key(event).payload(&payload);
        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok(_) => self.breaker.record_success(),
            Err((e, _)) => {
                error!(event = %event, error = %e, "Kafka error publishing audit event");
                self.breaker.record_failure(Instant::now());
            }
        }
    }
}
