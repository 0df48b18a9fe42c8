use std::sync::Arc;

use disruption_alerts::audit::{AuditLogger, TracingAuditLogger};
use disruption_alerts::clock::{Clock, SystemClock};
use disruption_alerts::config::AppConfig;
use disruption_alerts::db::{self, PgAlertStore};
use disruption_alerts::kafka::KafkaAuditLogger;
use disruption_alerts::llm::{GeminiClient, SamplingParams};
use disruption_alerts::pipeline::Collaborators;
use disruption_alerts::scheduler::Scheduler;
use disruption_alerts::service::AlertService;
use disruption_alerts::taxonomy::{load_locations, Taxonomy};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Disruption Alerts Service...");

    // Catalog data
    let taxonomy = Arc::new(Taxonomy::load(config.taxonomy_path.as_deref())?);
    let locations = load_locations(config.locations_path.as_deref())?;
    info!(locations = locations.len(), "Loaded taxonomy and locations");

    // Init DB
    let pool = db::init_pool(&config.database_url).await?;
    info!("Connected to database");

    // Audit sink
    let audit: Arc<dyn AuditLogger> = if config.kafka.bootstrap_servers.is_empty() {
        info!("No Kafka brokers configured, audit events go to the log only");
        Arc::new(TracingAuditLogger)
    } else {
        Arc::new(KafkaAuditLogger::new(&config.kafka)?)
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let deps = Collaborators {
        store: Arc::new(PgAlertStore::new(pool)),
        client: Arc::new(GeminiClient::new(&config.gemini)?),
        audit,
        clock: Arc::clone(&clock),
    };
    let service = Arc::new(AlertService::new(
        deps,
        taxonomy,
        locations,
        &config.pipeline,
        SamplingParams::from(&config.gemini),
    ));

    let scheduler = Scheduler::new(service, clock, &config.schedule)?;
    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await;

    Ok(())
}
