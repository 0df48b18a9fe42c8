use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Alert, AlertStatus};

pub mod memory;
pub mod postgres;
pub mod queries;

pub use memory::MemoryAlertStore;
pub use postgres::PgAlertStore;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Predicates the pipeline filters alerts by. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    /// Case-insensitive match on the origin city.
    pub origin_city: Option<String>,
    /// Empty means any status.
    pub statuses: Vec<AlertStatus>,
    pub description: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub auto_update_suppressed: Option<bool>,
    /// Never checked, or last checked before this instant.
    pub last_checked_before: Option<DateTime<Utc>>,
    pub has_followers: bool,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        if let Some(city) = &self.origin_city {
            if !alert.origin_location.city.eq_ignore_ascii_case(city) {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&alert.status) {
            return false;
        }
        if let Some(d) = &self.description {
            if &alert.description != d {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if alert.created_at < after {
                return false;
            }
        }
        if let Some(suppressed) = self.auto_update_suppressed {
            if alert.auto_update_suppressed != suppressed {
                return false;
            }
        }
        if let Some(before) = self.last_checked_before {
            if matches!(alert.last_auto_update_check_at, Some(t) if t >= before) {
                return false;
            }
        }
        if self.has_followers && !alert.has_followers() {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    /// Least recently checked first, never-checked records leading.
    StalestCheckFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub fn first(limit: i64) -> Self {
        Self { offset: 0, limit }
    }
}

/// Repository the pipeline persists alerts through.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn find(
        &self,
        filter: &AlertFilter,
        sort: SortOrder,
        page: Page,
    ) -> Result<Vec<Alert>, StoreError>;

    async fn count(&self, filter: &AlertFilter) -> Result<i64, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Alert>, StoreError>;

    async fn create(&self, alert: Alert) -> Result<Alert, StoreError>;

    /// Overwrite an existing record. Fails with `NotFound` if it is gone.
    async fn save(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Set only the last update-check time.
    async fn stamp_checked(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Append `child_id` to the parent's update history in place and return
    /// the resulting update count. Linking the same child twice is a no-op.
    async fn link_update(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::fixtures::alert;
    use chrono::Duration;

    #[test]
    fn empty_filter_matches_everything() {
        let a = alert("x", AlertStatus::Rejected, Utc::now());
        assert!(AlertFilter::default().matches(&a));
    }

    #[test]
    fn update_eligibility_predicates() {
        let now = Utc::now();
        let mut a = alert("x", AlertStatus::Approved, now);
        let filter = AlertFilter {
            statuses: vec![AlertStatus::Approved],
            auto_update_suppressed: Some(false),
            last_checked_before: Some(now - Duration::days(2)),
            has_followers: true,
            ..Default::default()
        };
        assert!(!filter.matches(&a), "no followers yet");

        a.follow_count = 3;
        assert!(filter.matches(&a));

        a.last_auto_update_check_at = Some(now - Duration::hours(1));
        assert!(!filter.matches(&a), "checked recently");

        a.last_auto_update_check_at = Some(now - Duration::days(3));
        assert!(filter.matches(&a));

        a.auto_update_suppressed = true;
        assert!(!filter.matches(&a));
    }

    #[test]
    fn city_match_ignores_case() {
        let a = alert("x", AlertStatus::Pending, Utc::now());
        let filter = AlertFilter {
            origin_city: Some("EDINBURGH".into()),
            ..Default::default()
        };
        assert!(filter.matches(&a));
    }
}
