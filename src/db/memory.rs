use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AlertFilter, AlertStore, Page, SortOrder};
use crate::error::StoreError;
use crate::models::Alert;

/// Process-local store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: RwLock<Vec<Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alerts(alerts: Vec<Alert>) -> Self {
        Self {
            alerts: RwLock::new(alerts),
        }
    }

    pub async fn snapshot(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn find(
        &self,
        filter: &AlertFilter,
        sort: SortOrder,
        page: Page,
    ) -> Result<Vec<Alert>, StoreError> {
        let alerts = self.alerts.read().await;
        let mut matched: Vec<Alert> = alerts.iter().filter(|a| filter.matches(a)).cloned().collect();
        match sort {
            SortOrder::NewestFirst => matched.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOrder::StalestCheckFirst => matched.sort_by(|a, b| {
                a.last_auto_update_check_at
                    .cmp(&b.last_auto_update_check_at)
                    .then(a.created_at.cmp(&b.created_at))
            }),
        }
        Ok(matched
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, filter: &AlertFilter) -> Result<i64, StoreError> {
        let alerts = self.alerts.read().await;
        Ok(alerts.iter().filter(|a| filter.matches(a)).count() as i64)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        let alerts = self.alerts.read().await;
        Ok(alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn create(&self, alert: Alert) -> Result<Alert, StoreError> {
        self.alerts.write().await.push(alert.clone());
        Ok(alert)
    }

    async fn save(&self, alert: &Alert) -> Result<(), StoreError> {
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(existing) => {
                *existing = alert.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(alert.id)),
        }
    }

    async fn stamp_checked(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound(id))?;
        alert.last_auto_update_check_at = Some(at);
        Ok(())
    }

    async fn link_update(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError> {
        let mut alerts = self.alerts.write().await;
        let parent = alerts
            .iter_mut()
            .find(|a| a.id == parent_id)
            .ok_or(StoreError::NotFound(parent_id))?;
        if !parent.update_history.contains(&child_id) {
            parent.update_history.push(child_id);
            parent.update_count += 1;
            parent.last_update_at = Some(at);
            parent.updated_at = at;
        }
        Ok(parent.update_count)
    }
}
