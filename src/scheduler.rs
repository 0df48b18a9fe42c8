use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::ScheduleConfig;
use crate::error::ServiceError;
use crate::guard::RunKind;
use crate::service::AlertService;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// A cron cadence evaluated in a fixed UTC offset.
#[derive(Debug, Clone)]
pub struct Cadence {
    schedule: Schedule,
    offset: FixedOffset,
}

impl Cadence {
    pub fn parse(expr: &str, utc_offset_minutes: i32) -> Result<Self> {
        let schedule = Schedule::from_str(&normalize_cron(expr))
            .with_context(|| format!("invalid cron expression '{}'", expr))?;
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .ok_or_else(|| anyhow!("UTC offset out of range: {} minutes", utc_offset_minutes))?;
        Ok(Self { schedule, offset })
    }

    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&t.with_timezone(&self.offset))
            .next()
            .map(|d| d.with_timezone(&Utc))
    }

    /// Whether a scheduled tick falls in `(since, now]`.
    pub fn is_due(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_after(since).is_some_and(|next| next <= now)
    }
}

pub struct Scheduler {
    service: Arc<AlertService>,
    clock: Arc<dyn Clock>,
    generation: Cadence,
    update_scan: Cadence,
    tick: Duration,
}

impl Scheduler {
    pub fn new(
        service: Arc<AlertService>,
        clock: Arc<dyn Clock>,
        config: &ScheduleConfig,
    ) -> Result<Self> {
        let generation = Cadence::parse(&config.generation_cron, config.utc_offset_minutes)?;
        let update_scan = Cadence::parse(&config.update_scan_cron, config.utc_offset_minutes)?;
        info!(
            generation = %config.generation_cron,
            update_scan = %config.update_scan_cron,
            utc_offset_minutes = config.utc_offset_minutes,
            "Scheduler configured"
        );
        Ok(Self {
            service,
            clock,
            generation,
            update_scan,
            tick: Duration::from_secs(config.tick_secs.max(1)),
        })
    }

    pub fn due(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<RunKind> {
        let mut kinds = Vec::new();
        if self.generation.is_due(since, now) {
            kinds.push(RunKind::Generation);
        }
        if self.update_scan.is_due(since, now) {
            kinds.push(RunKind::UpdateScan);
        }
        kinds
    }

    /// Tick until `shutdown` resolves, then wait for in-flight runs.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut since = self.clock.now();
        let mut ticker = tokio::time::interval(self.tick);
        let mut inflight = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let now = self.clock.now();
                    self.fire_due(since, now, &mut inflight);
                    since = now;
                    // Reap finished runs without waiting.
                    while let Some(Some(_)) = inflight.join_next().now_or_never() {}
                }
            }
        }

        if !inflight.is_empty() {
            info!(runs = inflight.len(), "Waiting for in-flight runs to finish");
        }
        while inflight.join_next().await.is_some() {}
        info!("Scheduler stopped");
    }

    fn fire_due(&self, since: DateTime<Utc>, now: DateTime<Utc>, inflight: &mut JoinSet<()>) {
        for kind in self.due(since, now) {
            info!(kind = %kind, "Scheduled run due");
            let service = Arc::clone(&self.service);
            inflight.spawn(async move { dispatch(&service, kind).await });
        }
    }
}

async fn dispatch(service: &AlertService, kind: RunKind) {
    let result = match kind {
        RunKind::Generation => service.trigger_generation(None).await.map(|_| ()),
        RunKind::UpdateScan => service.trigger_update_scan().await.map(|_| ()),
    };
    match result {
        Ok(()) => {}
        Err(ServiceError::AlreadyRunning(kind)) => {
            warn!(kind = %kind, "Skipping scheduled run, previous run still in progress")
        }
        Err(e) => error!(kind = %kind, error = %e, "Scheduled run failed"),
    }
}
