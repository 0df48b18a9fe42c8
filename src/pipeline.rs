use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::audit::{self, AuditLogger};
use crate::clock::Clock;
use crate::config::PipelineSettings;
use crate::db::AlertStore;
use crate::dedup::DeduplicationEngine;
use crate::error::PipelineError;
use crate::llm::{GenerationClient, GenerationRequest, SamplingParams};
use crate::models::candidate::candidate_entries;
use crate::models::{Alert, AlertStatus, Location};
use crate::prompt::{InstructionPair, PromptBuilder};
use crate::sanitize::ResponseSanitizer;
use crate::taxonomy::Taxonomy;
use crate::triage::TriageClassifier;
use crate::validate::{ValidatedCandidate, Validator};

/// Shared handles every run needs.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn AlertStore>,
    pub client: Arc<dyn GenerationClient>,
    pub audit: Arc<dyn AuditLogger>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub generated: u32,
    pub approved: u32,
    pub pending: u32,
    pub rejected: u32,
    pub duplicates: u32,
    pub validation_rejected: u32,
    pub errors: u32,
}

impl Tally {
    fn record(&mut self, alert: &Alert) {
        self.generated += 1;
        match alert.status {
            AlertStatus::Approved => self.approved += 1,
            AlertStatus::Pending => self.pending += 1,
            AlertStatus::Rejected => self.rejected += 1,
        }
        if alert.duplicate_of.is_some() {
            self.duplicates += 1;
        }
    }

    fn absorb(&mut self, other: &Tally) {
        self.generated += other.generated;
        self.approved += other.approved;
        self.pending += other.pending;
        self.rejected += other.rejected;
        self.duplicates += other.duplicates;
        self.validation_rejected += other.validation_rejected;
        self.errors += other.errors;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSummary {
    pub city: String,
    pub segment: String,
    #[serde(flatten)]
    pub tally: Tally,
    pub error: Option<String>,
}

/// Outcome of one generation run, as sent to the audit sink.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub totals: Tally,
    pub locations: Vec<SegmentSummary>,
    /// Set when the run stopped before visiting every location.
    pub fatal: Option<String>,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            totals: Tally::default(),
            locations: Vec::new(),
            fatal: None,
        }
    }
}

pub struct GenerationPipeline {
    deps: Collaborators,
    taxonomy: Arc<Taxonomy>,
    locations: Vec<Location>,
    prompts: PromptBuilder,
    sanitizer: ResponseSanitizer,
    validator: Validator,
    dedup: DeduplicationEngine,
    triage: TriageClassifier,
    sampling: SamplingParams,
    call_delay: Duration,
}

impl GenerationPipeline {
    pub fn new(
        deps: Collaborators,
        taxonomy: Arc<Taxonomy>,
        locations: Vec<Location>,
        settings: &PipelineSettings,
        sampling: SamplingParams,
    ) -> Self {
        Self {
            prompts: PromptBuilder::new(
                Arc::clone(&taxonomy),
                settings.discovery_horizon_days,
                settings.alerts_per_run,
                settings.global_alerts_per_run,
            ),
            sanitizer: ResponseSanitizer::new(&taxonomy),
            validator: Validator::new(Arc::clone(&taxonomy), settings.validity_window_days),
            dedup: DeduplicationEngine::new(
                settings.duplicate_similarity_threshold,
                settings.duplicate_lookback_days,
            ),
            triage: TriageClassifier::new(
                settings.triage_approve_threshold,
                settings.triage_pending_threshold,
            ),
            call_delay: settings.call_delay(),
            deps,
            taxonomy,
            locations,
            sampling,
        }
    }

    /// Run every location for `segments`, or the configured segments when
    /// `None`. The summary is always audited, including when the run aborts.
    pub async fn run(&self, segments: Option<&[String]>) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::new(self.deps.clock.now());
        info!(locations = self.locations.len(), "Alert generation run started");

        let outcome = AssertUnwindSafe(self.execute(segments, &mut summary))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => summary.fatal = Some(e.to_string()),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                summary.fatal = Some(format!("run panicked: {}", reason));
            }
        }
        summary.duration_ms = started.elapsed().as_millis() as u64;

        let details = serde_json::to_value(&summary).unwrap_or_else(|_| json!({}));
        match &summary.fatal {
            None => {
                info!(
                    generated = summary.totals.generated,
                    approved = summary.totals.approved,
                    pending = summary.totals.pending,
                    rejected = summary.totals.rejected,
                    errors = summary.totals.errors,
                    duration_ms = summary.duration_ms,
                    "Alert generation run completed"
                );
                self.deps.audit.log_system(audit::GENERATION_COMPLETED, details).await;
            }
            Some(reason) => {
                error!(error = %reason, "Alert generation run failed");
                self.deps.audit.log_system(audit::GENERATION_FAILED, details).await;
            }
        }
        summary
    }

    async fn execute(
        &self,
        requested: Option<&[String]>,
        summary: &mut RunSummary,
    ) -> anyhow::Result<()> {
        if self.locations.is_empty() {
            bail!("no locations configured");
        }
        let segments = self.resolve_segments(requested);
        if segments.is_empty() {
            bail!("no audience segments to generate for");
        }

        for location in &self.locations {
            for segment in &segments {
                let mut tally = Tally::default();
                let result = self.generate_for(location, segment, &mut tally).await;
                let error = match result {
                    Ok(()) => None,
                    Err(e) => {
                        error!(location = %location.city, segment = %segment, error = %e, "Generation failed for location");
                        tally.errors += 1;
                        Some(e.to_string())
                    }
                };
                summary.totals.absorb(&tally);
                summary.locations.push(SegmentSummary {
                    city: location.city.clone(),
                    segment: segment.clone(),
                    tally,
                    error,
                });
            }
        }
        Ok(())
    }

    fn resolve_segments(&self, requested: Option<&[String]>) -> Vec<String> {
        match requested {
            None => self.taxonomy.segments().to_vec(),
            Some(list) => {
                let mut out: Vec<String> = Vec::new();
                for raw in list {
                    match self.taxonomy.canonical_audience(raw) {
                        Some(s) if !out.iter().any(|o| o == s) => out.push(s.to_string()),
                        Some(_) => {}
                        None => warn!(segment = %raw, "Ignoring unknown audience segment"),
                    }
                }
                out
            }
        }
    }

    /// One location/segment. Generation and parse failures abort only this
    /// pair; validation and store failures only the record.
    async fn generate_for(
        &self,
        location: &Location,
        segment: &str,
        tally: &mut Tally,
    ) -> Result<(), PipelineError> {
        let now = self.deps.clock.now();

        // 1. Discovery
        let discovery = self.prompts.discovery(location, segment, now);
        let raw_candidates = self.call(discovery).await?;

        // 2. Synthesis
        let synthesis = self.prompts.synthesis(&raw_candidates, location, segment, now);
        let structured = self.call(synthesis).await?;

        // 3. Sanitize
        let payload = self.sanitizer.extract(&structured)?;
        let entries = candidate_entries(payload.value);
        info!(location = %location.city, segment = %segment, candidates = entries.len(), repair = ?payload.repair, "Synthesis parsed");

        // 4. Validate, deduplicate, triage, persist
        for entry in entries {
            let candidate = match self.validator.validate_value(entry, location, segment, now) {
                Ok(c) => c,
                Err(e) => {
                    warn!(location = %location.city, reason = %e, "Dropping candidate");
                    tally.validation_rejected += 1;
                    continue;
                }
            };
            match self.persist(candidate, now).await {
                Ok(alert) => tally.record(&alert),
                Err(e) => {
                    error!(location = %location.city, error = %e, "Failed to persist alert");
                    tally.errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn call(&self, pair: InstructionPair) -> Result<String, PipelineError> {
        let request = GenerationRequest::new(pair, self.sampling);
        let result = self.deps.client.generate(&request).await;
        // Rate limit applies to failed calls too.
        sleep(self.call_delay).await;
        Ok(result?)
    }

    async fn persist(
        &self,
        candidate: ValidatedCandidate,
        now: DateTime<Utc>,
    ) -> Result<Alert, PipelineError> {
        let duplicate = self
            .dedup
            .find_duplicate(self.deps.store.as_ref(), &candidate, now)
            .await?;

        // Duplicates are triaged on match similarity, not generation confidence.
        let (confidence, duplicate_of) = match &duplicate {
            Some(m) => {
                info!(existing = %m.existing_id, similarity = m.similarity, kind = ?m.kind, "Duplicate candidate flagged for review");
                (m.similarity, Some(m.existing_id))
            }
            None => (candidate.confidence, None),
        };
        let status = self.triage.classify(confidence);
        let alert = candidate.into_alert(status, confidence, duplicate_of, now);
        Ok(self.deps.store.create(alert).await?)
    }
}
