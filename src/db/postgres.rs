use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{queries, AlertFilter, AlertStore, DbPool, Page, SortOrder};
use crate::error::StoreError;
use crate::models::{Alert, Location};

#[derive(Debug, FromRow)]
struct AlertRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    title: String,
    description: String,
    category: String,
    sub_category: Option<String>,
    target_audiences: Json<Vec<String>>,
    impact_level: String, // TEXT column, parsed into ImpactLevel
    priority: String,
    recommended_action: Option<String>,
    mitigation: Option<String>,
    origin_city: String,
    origin_country: String,
    origin_latitude: f64,
    origin_longitude: f64,
    impact_locations: Json<Vec<Location>>,
    expected_start: Option<DateTime<Utc>>,
    expected_end: Option<DateTime<Utc>>,
    confidence: f64,
    source_name: String,
    source_url: String,
    created_by: String,
    duplicate_of: Option<Uuid>,
    status: String,
    is_update_of: Option<Uuid>,
    previous_version_notes: Option<String>,
    update_history: Vec<Uuid>,
    update_count: i32,
    last_update_at: Option<DateTime<Utc>>,
    last_auto_update_check_at: Option<DateTime<Utc>>,
    auto_update_suppressed: bool,
    suppressed_by: Option<String>,
    suppressed_at: Option<DateTime<Utc>>,
    suppressed_reason: Option<String>,
    followers: Vec<Uuid>,
    follow_count: i64,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let decode = |reason: String| StoreError::Decode { id, reason };
        Ok(Alert {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            title: row.title,
            description: row.description,
            category: row.category,
            sub_category: row.sub_category,
            target_audiences: row.target_audiences.0,
            impact_level: row.impact_level.parse().map_err(decode)?,
            priority: row.priority.parse().map_err(decode)?,
            recommended_action: row.recommended_action,
            mitigation: row.mitigation,
            origin_location: Location {
                city: row.origin_city,
                country: row.origin_country,
                latitude: row.origin_latitude,
                longitude: row.origin_longitude,
            },
            impact_locations: row.impact_locations.0,
            expected_start: row.expected_start,
            expected_end: row.expected_end,
            confidence: row.confidence,
            source_name: row.source_name,
            source_url: row.source_url,
            created_by: row.created_by,
            duplicate_of: row.duplicate_of,
            status: row.status.parse().map_err(decode)?,
            is_update_of: row.is_update_of,
            previous_version_notes: row.previous_version_notes,
            update_history: row.update_history,
            update_count: row.update_count,
            last_update_at: row.last_update_at,
            last_auto_update_check_at: row.last_auto_update_check_at,
            auto_update_suppressed: row.auto_update_suppressed,
            suppressed_by: row.suppressed_by,
            suppressed_at: row.suppressed_at,
            suppressed_reason: row.suppressed_reason,
            followers: row.followers,
            follow_count: row.follow_count,
        })
    }
}

/// Bind every column in `INSERT_ALERT` / `UPDATE_ALERT` order.
fn bind_alert<'q>(
    query: Query<'q, Postgres, PgArguments>,
    alert: &'q Alert,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(alert.id)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .bind(&alert.title)
        .bind(&alert.description)
        .bind(&alert.category)
        .bind(&alert.sub_category)
        .bind(Json(&alert.target_audiences))
        .bind(alert.impact_level.as_str())
        .bind(alert.priority.as_str())
        .bind(&alert.recommended_action)
        .bind(&alert.mitigation)
        .bind(&alert.origin_location.city)
        .bind(&alert.origin_location.country)
        .bind(alert.origin_location.latitude)
        .bind(alert.origin_location.longitude)
        .bind(Json(&alert.impact_locations))
        .bind(alert.expected_start)
        .bind(alert.expected_end)
        .bind(alert.confidence)
        .bind(&alert.source_name)
        .bind(&alert.source_url)
        .bind(&alert.created_by)
        .bind(alert.duplicate_of)
        .bind(alert.status.as_str())
        .bind(alert.is_update_of)
        .bind(&alert.previous_version_notes)
        .bind(&alert.update_history)
        .bind(alert.update_count)
        .bind(alert.last_update_at)
        .bind(alert.last_auto_update_check_at)
        .bind(alert.auto_update_suppressed)
        .bind(&alert.suppressed_by)
        .bind(alert.suppressed_at)
        .bind(&alert.suppressed_reason)
        .bind(&alert.followers)
        .bind(alert.follow_count)
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &AlertFilter) {
    if let Some(city) = &filter.origin_city {
        qb.push(" AND lower(origin_city) = lower(")
            .push_bind(city.clone())
            .push(")");
    }
    if !filter.statuses.is_empty() {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.to_string()).collect();
        qb.push(" AND status = ANY(").push_bind(statuses).push(")");
    }
    if let Some(description) = &filter.description {
        qb.push(" AND description = ").push_bind(description.clone());
    }
    if let Some(after) = filter.created_after {
        qb.push(" AND created_at >= ").push_bind(after);
    }
    if let Some(suppressed) = filter.auto_update_suppressed {
        qb.push(" AND auto_update_suppressed = ").push_bind(suppressed);
    }
    if let Some(before) = filter.last_checked_before {
        qb.push(" AND (last_auto_update_check_at IS NULL OR last_auto_update_check_at < ")
            .push_bind(before)
            .push(")");
    }
    if filter.has_followers {
        qb.push(" AND (cardinality(followers) > 0 OR follow_count > 0)");
    }
}

fn order_clause(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::NewestFirst => " ORDER BY created_at DESC",
        SortOrder::StalestCheckFirst => {
            " ORDER BY last_auto_update_check_at ASC NULLS FIRST, created_at ASC"
        }
    }
}

pub struct PgAlertStore {
    pool: DbPool,
}

impl PgAlertStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn find(
        &self,
        filter: &AlertFilter,
        sort: SortOrder,
        page: Page,
    ) -> Result<Vec<Alert>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(queries::SELECT_ALERTS.trim());
        push_filter(&mut qb, filter);
        qb.push(order_clause(sort))
            .push(" LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);

        let rows: Vec<AlertRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn count(&self, filter: &AlertFilter) -> Result<i64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(queries::COUNT_ALERTS.trim());
        push_filter(&mut qb, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        let row: Option<AlertRow> = sqlx::query_as(queries::SELECT_ALERT_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn create(&self, alert: Alert) -> Result<Alert, StoreError> {
        bind_alert(sqlx::query(queries::INSERT_ALERT), &alert)
            .execute(&self.pool)
            .await?;
        Ok(alert)
    }

    async fn save(&self, alert: &Alert) -> Result<(), StoreError> {
        let result = bind_alert(sqlx::query(queries::UPDATE_ALERT), alert)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(alert.id));
        }
        Ok(())
    }

    async fn stamp_checked(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(queries::STAMP_UPDATE_CHECK)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn link_update(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError> {
        let linked: Option<i32> = sqlx::query_scalar(queries::LINK_UPDATE)
            .bind(parent_id)
            .bind(child_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(count) = linked {
            return Ok(count);
        }
        // Already linked, or the parent is gone.
        let current: Option<i32> = sqlx::query_scalar(queries::SELECT_UPDATE_COUNT)
            .bind(parent_id)
            .fetch_optional(&self.pool)
            .await?;
        current.ok_or(StoreError::NotFound(parent_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertStatus;

    #[test]
    fn filter_renders_every_predicate() {
        let filter = AlertFilter {
            origin_city: Some("Edinburgh".into()),
            statuses: vec![AlertStatus::Approved],
            description: Some("x".into()),
            created_after: Some(Utc::now()),
            auto_update_suppressed: Some(false),
            last_checked_before: Some(Utc::now()),
            has_followers: true,
        };
        let mut qb = QueryBuilder::<Postgres>::new(queries::SELECT_ALERTS.trim());
        push_filter(&mut qb, &filter);
        let sql = qb.sql();
        assert!(sql.starts_with("SELECT * FROM alerts WHERE TRUE AND lower(origin_city) = lower($1)"));
        assert!(sql.contains("status = ANY($2)"));
        assert!(sql.contains("last_auto_update_check_at IS NULL OR last_auto_update_check_at < $6"));
        assert!(sql.ends_with("(cardinality(followers) > 0 OR follow_count > 0)"));
    }

    #[test]
    fn targeted_writes_leave_other_columns_alone() {
        assert!(!queries::STAMP_UPDATE_CHECK.contains("status"));
        assert!(!queries::STAMP_UPDATE_CHECK.contains("auto_update_suppressed"));
        assert!(queries::LINK_UPDATE.contains("array_append(update_history, $2)"));
        assert!(queries::LINK_UPDATE.contains("update_count = update_count + 1"));
        assert!(!queries::LINK_UPDATE.contains("follow"));
    }
}
