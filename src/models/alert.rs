use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Marker written to `created_by` for every record the pipeline produces.
pub const AUTOMATED_CREATOR: &str = "system:auto-generator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Approved,
    Rejected,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Approved => "approved",
            AlertStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(AlertStatus::Pending),
            "approved" => Ok(AlertStatus::Approved),
            "rejected" => Ok(AlertStatus::Rejected),
            other => Err(format!("unknown alert status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactLevel {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLevel::Low => "Low",
            ImpactLevel::Moderate => "Moderate",
            ImpactLevel::High => "High",
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            ImpactLevel::Low => Priority::Low,
            ImpactLevel::Moderate => Priority::Medium,
            ImpactLevel::High => Priority::High,
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImpactLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ImpactLevel::Low),
            "moderate" => Ok(ImpactLevel::Moderate),
            "high" => Ok(ImpactLevel::High),
            other => Err(format!("unknown impact level '{}'", other)),
        }
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A disruption alert as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub title: String,
    pub description: String,
    pub category: String,
    pub sub_category: Option<String>,
    pub target_audiences: Vec<String>,
    pub impact_level: ImpactLevel,
    pub priority: Priority,
    pub recommended_action: Option<String>,
    pub mitigation: Option<String>,

    pub origin_location: Location,
    pub impact_locations: Vec<Location>,

    pub expected_start: Option<DateTime<Utc>>,
    pub expected_end: Option<DateTime<Utc>>,

    pub confidence: f64,
    pub source_name: String,
    pub source_url: String,
    pub created_by: String,
    pub duplicate_of: Option<Uuid>,

    pub status: AlertStatus,
    pub is_update_of: Option<Uuid>,
    pub previous_version_notes: Option<String>,
    pub update_history: Vec<Uuid>,
    pub update_count: i32,
    pub last_update_at: Option<DateTime<Utc>>,
    pub last_auto_update_check_at: Option<DateTime<Utc>>,
    pub auto_update_suppressed: bool,
    pub suppressed_by: Option<String>,
    pub suppressed_at: Option<DateTime<Utc>>,
    pub suppressed_reason: Option<String>,

    pub followers: Vec<Uuid>,
    pub follow_count: i64,
}

impl Alert {
    pub fn has_followers(&self) -> bool {
        !self.followers.is_empty() || self.follow_count > 0
    }

    /// Build the successor record that supersedes this one. The child always
    /// starts as `pending` because updates need re-approval.
    pub fn new_update(
        &self,
        summary: &str,
        reason: &str,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            title: format!("Update: {}", self.title),
            description: summary.to_string(),
            category: self.category.clone(),
            sub_category: self.sub_category.clone(),
            target_audiences: self.target_audiences.clone(),
            impact_level: self.impact_level,
            priority: self.priority,
            recommended_action: self.recommended_action.clone(),
            mitigation: self.mitigation.clone(),
            origin_location: self.origin_location.clone(),
            impact_locations: self.impact_locations.clone(),
            expected_start: self.expected_start,
            expected_end: self.expected_end,
            confidence: confidence.clamp(0.0, 1.0),
            source_name: self.source_name.clone(),
            source_url: self.source_url.clone(),
            created_by: AUTOMATED_CREATOR.to_string(),
            duplicate_of: None,
            status: AlertStatus::Pending,
            is_update_of: Some(self.id),
            previous_version_notes: Some(reason.to_string()),
            update_history: Vec::new(),
            update_count: 0,
            last_update_at: None,
            last_auto_update_check_at: None,
            auto_update_suppressed: false,
            suppressed_by: None,
            suppressed_at: None,
            suppressed_reason: None,
            followers: Vec::new(),
            follow_count: 0,
        }
    }

    pub fn suppress_updates(&mut self, by: &str, reason: &str, now: DateTime<Utc>) {
        self.auto_update_suppressed = true;
        self.suppressed_by = Some(by.to_string());
        self.suppressed_reason = Some(reason.to_string());
        self.suppressed_at = Some(now);
        self.updated_at = now;
    }

    pub fn enable_updates(&mut self, now: DateTime<Utc>) {
        self.auto_update_suppressed = false;
        self.suppressed_by = None;
        self.suppressed_reason = None;
        self.suppressed_at = None;
        self.updated_at = now;
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::alert;
    use super::*;

    #[test]
    fn priority_follows_impact_level() {
        assert_eq!(ImpactLevel::Low.priority(), Priority::Low);
        assert_eq!(ImpactLevel::Moderate.priority(), Priority::Medium);
        assert_eq!(ImpactLevel::High.priority(), Priority::High);
    }

    #[test]
    fn update_child_is_pending_and_linked() {
        let now = Utc::now();
        let parent = alert("Trams suspended", AlertStatus::Approved, now);
        let child = parent.new_update("Service now resumes Friday", "date moved", 1.4, now);

        assert_eq!(child.status, AlertStatus::Pending);
        assert_eq!(child.is_update_of, Some(parent.id));
        assert!(child.title.starts_with("Update:"));
        assert_eq!(child.previous_version_notes.as_deref(), Some("date moved"));
        assert_eq!(child.confidence, 1.0);
        assert!(child.update_history.is_empty());
        assert!(!child.has_followers());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Approved".parse::<AlertStatus>(), Ok(AlertStatus::Approved));
        assert!("archived".parse::<AlertStatus>().is_err());
    }
}
