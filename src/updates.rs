use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{error, info};
use uuid::Uuid;

use crate::audit;
use crate::config::PipelineSettings;
use crate::db::{AlertFilter, AlertStore, Page, SortOrder};
use crate::error::{ParseError, PipelineError, StoreError};
use crate::llm::{GenerationRequest, SamplingParams};
use crate::models::{Alert, AlertStatus, UpdateVerdict};
use crate::pipeline::Collaborators;
use crate::prompt::PromptBuilder;
use crate::sanitize::ResponseSanitizer;
use crate::taxonomy::Taxonomy;

/// Upper bound on alerts re-checked in one scan.
const SCAN_BATCH: i64 = 200;

/// Selects alerts due for a re-check.
pub struct UpdateScanner {
    cooldown: Duration,
}

impl UpdateScanner {
    pub fn new(cooldown_hours: i64) -> Self {
        Self {
            cooldown: Duration::hours(cooldown_hours),
        }
    }

    /// Approved, not suppressed, followed, and not checked within the cooldown.
    pub fn eligibility(&self, now: DateTime<Utc>) -> AlertFilter {
        AlertFilter {
            statuses: vec![AlertStatus::Approved],
            auto_update_suppressed: Some(false),
            last_checked_before: Some(now - self.cooldown),
            has_followers: true,
            ..Default::default()
        }
    }

    pub async fn eligible(
        &self,
        store: &dyn AlertStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, StoreError> {
        store
            .find(
                &self.eligibility(now),
                SortOrder::StalestCheckFirst,
                Page::first(SCAN_BATCH),
            )
            .await
    }

    /// Re-read `id` and return it only if it still qualifies at `now`.
    pub async fn recheck(
        &self,
        store: &dyn AlertStore,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, StoreError> {
        let filter = self.eligibility(now);
        Ok(store.get(id).await?.filter(|a| filter.matches(a)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Unchanged { reason: String },
    /// A change was reported but not confidently enough to act on.
    BelowThreshold { confidence: f64 },
    Updated { child_id: Uuid },
}

/// Asks the generative service about one alert and files the successor.
pub struct UpdateSynthesizer {
    deps: Collaborators,
    prompts: PromptBuilder,
    sanitizer: ResponseSanitizer,
    sampling: SamplingParams,
    threshold: f64,
}

impl UpdateSynthesizer {
    pub fn new(
        deps: Collaborators,
        taxonomy: Arc<Taxonomy>,
        settings: &PipelineSettings,
        sampling: SamplingParams,
    ) -> Self {
        Self {
            sanitizer: ResponseSanitizer::new(&taxonomy),
            prompts: PromptBuilder::new(
                taxonomy,
                settings.discovery_horizon_days,
                settings.alerts_per_run,
                settings.global_alerts_per_run,
            ),
            deps,
            sampling,
            threshold: settings.update_confidence_threshold,
        }
    }

    /// Check `alert` regardless of eligibility. Only the check stamp and the
    /// update link are written back; the rest of the record is left as stored.
    pub async fn check(&self, alert: Alert) -> Result<CheckOutcome, PipelineError> {
        let now = self.deps.clock.now();

        // Stamp first so an overlapping or repeated scan skips this record.
        self.deps.store.stamp_checked(alert.id, now).await?;

        let request = GenerationRequest::new(self.prompts.update_check(&alert, now), self.sampling);
        let text = self.deps.client.generate(&request).await?;
        let payload = self.sanitizer.extract(&text)?;
        let verdict: UpdateVerdict = serde_json::from_value(payload.value).map_err(|e| ParseError {
            reason: format!("update verdict: {}", e),
        })?;

        if !verdict.needs_update {
            return Ok(CheckOutcome::Unchanged {
                reason: verdict.reason,
            });
        }
        if verdict.confidence <= self.threshold {
            info!(alert_id = %alert.id, confidence = verdict.confidence, "Update suggested below threshold");
            return Ok(CheckOutcome::BelowThreshold {
                confidence: verdict.confidence,
            });
        }

        let summary = if verdict.update_summary.trim().is_empty() {
            verdict.reason.as_str()
        } else {
            verdict.update_summary.as_str()
        };
        let child = alert.new_update(summary, &verdict.reason, verdict.confidence, now);
        let child = self.deps.store.create(child).await?;
        let update_count = self.deps.store.link_update(alert.id, child.id, now).await?;

        info!(alert_id = %alert.id, child_id = %child.id, "Created pending update");
        self.deps
            .audit
            .log_system(
                audit::UPDATE_CREATED,
                json!({
                    "parentId": alert.id,
                    "childId": child.id,
                    "confidence": verdict.confidence,
                    "reason": verdict.reason,
                    "updateCount": update_count,
                }),
            )
            .await;

        Ok(CheckOutcome::Updated { child_id: child.id })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub eligible: u32,
    pub checked: u32,
    /// Selected, but changed by someone else before their turn came.
    pub skipped: u32,
    pub updates_created: u32,
    pub errors: u32,
    pub duration_ms: u64,
}

/// One full update scan: select, check each in turn, audit the totals.
pub struct UpdateScan {
    scanner: UpdateScanner,
    synthesizer: UpdateSynthesizer,
    deps: Collaborators,
    call_delay: StdDuration,
}

impl UpdateScan {
    pub fn new(
        deps: Collaborators,
        taxonomy: Arc<Taxonomy>,
        settings: &PipelineSettings,
        sampling: SamplingParams,
    ) -> Self {
        Self {
            scanner: UpdateScanner::new(settings.update_cooldown_hours),
            synthesizer: UpdateSynthesizer::new(deps.clone(), taxonomy, settings, sampling),
            deps,
            call_delay: settings.call_delay(),
        }
    }

    pub fn synthesizer(&self) -> &UpdateSynthesizer {
        &self.synthesizer
    }

    pub async fn run(&self) -> ScanSummary {
        let started = Instant::now();
        let mut summary = ScanSummary::default();

        match self
            .scanner
            .eligible(self.deps.store.as_ref(), self.deps.clock.now())
            .await
        {
            Ok(alerts) => {
                summary.eligible = alerts.len() as u32;
                info!(eligible = summary.eligible, "Update scan started");
                let store = self.deps.store.as_ref();
                let mut asked = false;
                for id in alerts.into_iter().map(|a| a.id) {
                    // The selection may be stale by the time this record's turn comes.
                    let alert = match self.scanner.recheck(store, id, self.deps.clock.now()).await {
                        Ok(Some(alert)) => alert,
                        Ok(None) => {
                            info!(alert_id = %id, "No longer eligible, skipping");
                            summary.skipped += 1;
                            continue;
                        }
                        Err(e) => {
                            error!(alert_id = %id, error = %e, "Failed to reload alert");
                            summary.errors += 1;
                            continue;
                        }
                    };
                    if asked {
                        sleep(self.call_delay).await;
                    }
                    asked = true;
                    match self.synthesizer.check(alert).await {
                        Ok(outcome) => {
                            summary.checked += 1;
                            if matches!(outcome, CheckOutcome::Updated { .. }) {
                                summary.updates_created += 1;
                            }
                        }
                        Err(e) => {
                            error!(alert_id = %id, error = %e, "Update check failed");
                            summary.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to select alerts for update scan");
                summary.errors += 1;
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            checked = summary.checked,
            skipped = summary.skipped,
            created = summary.updates_created,
            errors = summary.errors,
            "Update scan completed"
        );
        self.deps
            .audit
            .log_system(
                audit::UPDATE_SCAN_COMPLETED,
                serde_json::to_value(&summary).unwrap_or_else(|_| json!({})),
            )
            .await;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLogger;
    use crate::clock::ManualClock;
    use crate::db::MemoryAlertStore;
    use crate::error::GenerationError;
    use crate::llm::fake::ScriptedClient;
    use crate::llm::GenerationClient;
    use crate::models::alert::fixtures::alert;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).unwrap()
    }

    fn followed() -> Alert {
        let mut a = alert(
            "Trams suspended between Haymarket and York Place",
            AlertStatus::Approved,
            now() - Duration::days(5),
        );
        a.follow_count = 2;
        a
    }

    const CHANGED: &str = r#"{"needsUpdate": true, "reason": "reopening moved to Friday", "updateSummary": "Trams now resume on Friday rather than Wednesday.", "confidence": 0.8}"#;

    struct Harness {
        store: Arc<MemoryAlertStore>,
        audit: Arc<MemoryAuditLogger>,
        clock: Arc<ManualClock>,
        scan: UpdateScan,
    }

    fn harness(client: Arc<dyn GenerationClient>, existing: Vec<Alert>) -> Harness {
        harness_on(Arc::new(MemoryAlertStore::with_alerts(existing)), client)
    }

    fn harness_on(store: Arc<MemoryAlertStore>, client: Arc<dyn GenerationClient>) -> Harness {
        let audit = Arc::new(MemoryAuditLogger::new());
        let clock = Arc::new(ManualClock::new(now()));
        let deps = Collaborators {
            store: store.clone(),
            client,
            audit: audit.clone(),
            clock: clock.clone(),
        };
        let scan = UpdateScan::new(
            deps,
            Arc::new(Taxonomy::load(None).unwrap()),
            &PipelineSettings::default(),
            SamplingParams::default(),
        );
        Harness {
            store,
            audit,
            clock,
            scan,
        }
    }

    #[test]
    fn eligibility_window_is_the_cooldown() {
        let filter = UpdateScanner::new(48).eligibility(now());
        assert_eq!(filter.last_checked_before, Some(now() - Duration::days(2)));
        assert_eq!(filter.statuses, vec![AlertStatus::Approved]);
        assert!(filter.has_followers);
    }

    #[tokio::test(start_paused = true)]
    async fn material_change_creates_pending_child() {
        let parent = followed();
        let parent_id = parent.id;
        let client = Arc::new(ScriptedClient::texts([CHANGED]));
        let h = harness(client, vec![parent]);

        let summary = h.scan.run().await;
        assert_eq!(summary.eligible, 1);
        assert_eq!(summary.updates_created, 1);
        assert_eq!(summary.errors, 0);

        let stored = h.store.snapshot().await;
        let parent = stored.iter().find(|a| a.id == parent_id).unwrap();
        let child = stored.iter().find(|a| a.is_update_of == Some(parent_id)).unwrap();
        assert_eq!(child.status, AlertStatus::Pending);
        assert_eq!(child.title, "Update: Tram line closed");
        assert_eq!(child.description, "Trams now resume on Friday rather than Wednesday.");
        assert_eq!(child.category, parent.category);
        assert_eq!(parent.update_count, 1);
        assert_eq!(parent.update_history, vec![child.id]);
        assert_eq!(parent.last_auto_update_check_at, Some(now()));

        assert_eq!(h.audit.named(audit::UPDATE_CREATED).await.len(), 1);
        let scans = h.audit.named(audit::UPDATE_SCAN_COMPLETED).await;
        assert_eq!(scans[0].details["updatesCreated"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rescan_within_cooldown_selects_nothing() {
        let client = Arc::new(ScriptedClient::texts([CHANGED]));
        let h = harness(client.clone(), vec![followed()]);

        h.scan.run().await;
        h.clock.advance(Duration::hours(1));
        let second = h.scan.run().await;

        assert_eq!(second.eligible, 0);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_scans_check_each_record_once() {
        let client = Arc::new(ScriptedClient::texts([
            r#"{"needsUpdate": false, "reason": "no change", "confidence": 0.9}"#,
            r#"{"needsUpdate": false, "reason": "no change", "confidence": 0.9}"#,
        ]));
        let h = harness(client.clone(), vec![followed(), followed()]);

        let first = h.scan.run().await;
        let second = h.scan.run().await;

        assert_eq!(first.checked, 2);
        assert_eq!(second.eligible, 0);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_records_are_skipped() {
        let mut suppressed = followed();
        suppressed.suppress_updates("ops", "noisy", now());
        let mut unfollowed = followed();
        unfollowed.follow_count = 0;
        let pending = {
            let mut a = followed();
            a.status = AlertStatus::Pending;
            a
        };
        let client = Arc::new(ScriptedClient::new(vec![]));
        let h = harness(client.clone(), vec![suppressed, unfollowed, pending]);

        let summary = h.scan.run().await;
        assert_eq!(summary.eligible, 0);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn low_confidence_change_is_ignored() {
        let parent = followed();
        let client = Arc::new(ScriptedClient::texts([
            r#"{"needsUpdate": true, "reason": "maybe", "updateSummary": "x", "confidence": "0.7"}"#,
        ]));
        let h = harness(client, vec![parent.clone()]);

        let outcome = h.scan.synthesizer().check(parent).await.unwrap();
        assert_eq!(outcome, CheckOutcome::BelowThreshold { confidence: 0.7 });
        assert_eq!(h.store.snapshot().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_check_keeps_stamp_and_counts_error() {
        let parent = followed();
        let parent_id = parent.id;
        let client = Arc::new(ScriptedClient::texts(["nothing useful"]));
        let h = harness(client, vec![parent]);

        let summary = h.scan.run().await;
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.checked, 0);
        let stored = h.store.get(parent_id).await.unwrap().unwrap();
        assert_eq!(stored.last_auto_update_check_at, Some(now()));
    }

    /// Records whether the alert was already stamped when the model was asked.
    struct StampRecorder {
        store: Arc<MemoryAlertStore>,
        id: Uuid,
        seen: Mutex<Option<Option<DateTime<Utc>>>>,
    }

    #[async_trait]
    impl GenerationClient for StampRecorder {
        async fn generate(&self, _: &GenerationRequest) -> Result<String, GenerationError> {
            let stored = self.store.get(self.id).await.ok().flatten();
            *self.seen.lock().unwrap() = Some(stored.and_then(|a| a.last_auto_update_check_at));
            Ok(r#"{"needsUpdate": false, "reason": "same"}"#.to_string())
        }
    }

    #[tokio::test]
    async fn check_is_stamped_before_the_model_call() {
        let parent = followed();
        let store = Arc::new(MemoryAlertStore::with_alerts(vec![parent.clone()]));
        let recorder = Arc::new(StampRecorder {
            store: store.clone(),
            id: parent.id,
            seen: Mutex::new(None),
        });
        let deps = Collaborators {
            store,
            client: recorder.clone(),
            audit: Arc::new(MemoryAuditLogger::new()),
            clock: Arc::new(ManualClock::new(now())),
        };
        let synthesizer = UpdateSynthesizer::new(
            deps,
            Arc::new(Taxonomy::load(None).unwrap()),
            &PipelineSettings::default(),
            SamplingParams::default(),
        );

        let outcome = synthesizer.check(parent).await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Unchanged { .. }));
        assert_eq!(*recorder.seen.lock().unwrap(), Some(Some(now())));
    }

    const UNCHANGED: &str = r#"{"needsUpdate": false, "reason": "no change", "confidence": 0.9}"#;

    /// Edits another record through the store while the first check is in flight.
    struct EditDuringCall {
        store: Arc<MemoryAlertStore>,
        target: Uuid,
        edit: fn(&mut Alert),
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationClient for EditDuringCall {
        async fn generate(&self, _: &GenerationRequest) -> Result<String, GenerationError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut target = self.store.get(self.target).await.unwrap().unwrap();
                (self.edit)(&mut target);
                self.store.save(&target).await.unwrap();
            }
            Ok(UNCHANGED.to_string())
        }
    }

    /// Two selected records; `second` is edited while `first` is being checked.
    fn scan_with_edit(edit: fn(&mut Alert)) -> (Harness, Arc<EditDuringCall>, Uuid) {
        let mut first = followed();
        first.created_at = now() - Duration::days(6);
        let second = followed();
        let second_id = second.id;
        let store = Arc::new(MemoryAlertStore::with_alerts(vec![second, first]));
        let client = Arc::new(EditDuringCall {
            store: store.clone(),
            target: second_id,
            edit,
            calls: AtomicUsize::new(0),
        });
        (harness_on(store, client.clone()), client, second_id)
    }

    #[tokio::test(start_paused = true)]
    async fn suppression_during_scan_is_kept() {
        let (h, client, second_id) = scan_with_edit(|a| {
            a.suppress_updates("ops@desk", "event cancelled", now());
            a.status = AlertStatus::Rejected;
        });

        let summary = h.scan.run().await;
        assert_eq!(summary.eligible, 2);
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let second = h.store.get(second_id).await.unwrap().unwrap();
        assert!(second.auto_update_suppressed);
        assert_eq!(second.status, AlertStatus::Rejected);
        assert_eq!(second.suppressed_by.as_deref(), Some("ops@desk"));
        assert_eq!(second.last_auto_update_check_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn followers_added_during_scan_are_kept() {
        let (h, client, second_id) = scan_with_edit(|a| a.follow_count = 7);

        let summary = h.scan.run().await;
        assert_eq!(summary.checked, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        let second = h.store.get(second_id).await.unwrap().unwrap();
        assert_eq!(second.follow_count, 7);
        assert_eq!(second.last_auto_update_check_at, Some(now()));
    }
}
