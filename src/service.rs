use std::sync::Arc;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit;
use crate::config::PipelineSettings;
use crate::error::ServiceError;
use crate::guard::{RunGuard, RunKind, RunState};
use crate::llm::SamplingParams;
use crate::models::{Alert, Location};
use crate::pipeline::{Collaborators, GenerationPipeline, RunSummary};
use crate::taxonomy::Taxonomy;
use crate::updates::{CheckOutcome, ScanSummary, UpdateScan};

pub struct AlertService {
    deps: Collaborators,
    guard: RunGuard,
    generation: GenerationPipeline,
    updates: UpdateScan,
}

impl AlertService {
    pub fn new(
        deps: Collaborators,
        taxonomy: Arc<Taxonomy>,
        locations: Vec<Location>,
        settings: &PipelineSettings,
        sampling: SamplingParams,
    ) -> Self {
        Self {
            generation: GenerationPipeline::new(
                deps.clone(),
                Arc::clone(&taxonomy),
                locations,
                settings,
                sampling,
            ),
            updates: UpdateScan::new(deps.clone(), taxonomy, settings, sampling),
            guard: RunGuard::new(),
            deps,
        }
    }

    pub fn run_state(&self, kind: RunKind) -> RunState {
        self.guard.state(kind)
    }

    /// Generate for every location. Rejected, not queued, while a generation
    /// run is in progress.
    pub async fn trigger_generation(
        &self,
        segments: Option<Vec<String>>,
    ) -> Result<RunSummary, ServiceError> {
        let _permit = self
            .guard
            .try_acquire(RunKind::Generation)
            .ok_or(ServiceError::AlreadyRunning(RunKind::Generation))?;
        Ok(self.generation.run(segments.as_deref()).await)
    }

    pub async fn trigger_update_scan(&self) -> Result<ScanSummary, ServiceError> {
        let _permit = self
            .guard
            .try_acquire(RunKind::UpdateScan)
            .ok_or(ServiceError::AlreadyRunning(RunKind::UpdateScan))?;
        Ok(self.updates.run().await)
    }

    /// Re-check one alert now, ignoring status, followers and cooldown.
    pub async fn check_one(&self, id: Uuid) -> Result<CheckOutcome, ServiceError> {
        let alert = self.load(id).await?;
        Ok(self.updates.synthesizer().check(alert).await?)
    }

    pub async fn suppress_updates(
        &self,
        id: Uuid,
        reason: &str,
        by: &str,
    ) -> Result<Alert, ServiceError> {
        let mut alert = self.load(id).await?;
        alert.suppress_updates(by, reason, self.deps.clock.now());
        self.deps.store.save(&alert).await?;

        info!(alert_id = %id, by = %by, "Automatic updates suppressed");
        self.deps
            .audit
            .log_system(
                audit::UPDATES_SUPPRESSED,
                json!({"alertId": id, "by": by, "reason": reason}),
            )
            .await;
        Ok(alert)
    }

    pub async fn enable_updates(&self, id: Uuid) -> Result<Alert, ServiceError> {
        let mut alert = self.load(id).await?;
        alert.enable_updates(self.deps.clock.now());
        self.deps.store.save(&alert).await?;

        info!(alert_id = %id, "Automatic updates enabled");
        self.deps
            .audit
            .log_system(audit::UPDATES_ENABLED, json!({"alertId": id}))
            .await;
        Ok(alert)
    }

    async fn load(&self, id: Uuid) -> Result<Alert, ServiceError> {
        self.deps
            .store
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound(id))
    }
}
