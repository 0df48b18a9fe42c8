use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::candidate::lenient_f64;
use crate::models::{Alert, AlertStatus, Candidate, ImpactLevel, Location, AUTOMATED_CREATOR};
use crate::sanitize::ensure_scheme;
use crate::taxonomy::Taxonomy;

/// Confidence assumed when the model omits one; lands in manual review.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A candidate that passed every check, with fields normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCandidate {
    pub title: String,
    pub description: String,
    pub category: String,
    pub sub_category: Option<String>,
    pub target_audiences: Vec<String>,
    pub impact_level: ImpactLevel,
    pub confidence: f64,
    pub source_name: String,
    pub source_url: String,
    pub expected_start: Option<DateTime<Utc>>,
    pub expected_end: Option<DateTime<Utc>>,
    pub origin_location: Location,
    pub impact_locations: Vec<Location>,
    pub recommended_action: Option<String>,
    pub mitigation: Option<String>,
}

impl ValidatedCandidate {
    /// Build the persisted record. `confidence` is the value triage used.
    pub fn into_alert(
        self,
        status: AlertStatus,
        confidence: f64,
        duplicate_of: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            title: self.title,
            description: self.description,
            category: self.category,
            sub_category: self.sub_category,
            target_audiences: self.target_audiences,
            impact_level: self.impact_level,
            priority: self.impact_level.priority(),
            recommended_action: self.recommended_action,
            mitigation: self.mitigation,
            origin_location: self.origin_location,
            impact_locations: self.impact_locations,
            expected_start: self.expected_start,
            expected_end: self.expected_end,
            confidence,
            source_name: self.source_name,
            source_url: self.source_url,
            created_by: AUTOMATED_CREATOR.to_string(),
            duplicate_of,
            status,
            is_update_of: None,
            previous_version_notes: None,
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
}

pub struct Validator {
    taxonomy: Arc<Taxonomy>,
    window_days: i64,
}

impl Validator {
    pub fn new(taxonomy: Arc<Taxonomy>, window_days: i64) -> Self {
        Self {
            taxonomy,
            window_days,
        }
    }

    /// Deserialize one raw entry and validate it.
    pub fn validate_value(
        &self,
        raw: Value,
        origin: &Location,
        segment: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidatedCandidate, ValidationError> {
        let candidate: Candidate = serde_json::from_value(raw)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        self.validate(candidate, origin, segment, now)
    }

    pub fn validate(
        &self,
        candidate: Candidate,
        origin: &Location,
        segment: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidatedCandidate, ValidationError> {
        let title = required(candidate.title, "title")?;
        let description = required(candidate.description, "description")?;
        let raw_category = required(candidate.category, "category")?;

        let expected_start = parse_field(candidate.expected_start.as_deref(), "expectedStart")?;
        let expected_end = parse_field(candidate.expected_end.as_deref(), "expectedEnd")?;
        for (field, date) in [("expectedStart", expected_start), ("expectedEnd", expected_end)] {
            if let Some(d) = date {
                if d.year() < now.year() {
                    return Err(ValidationError::StaleYear {
                        field,
                        year: d.year(),
                    });
                }
            }
        }

        let category = self
            .taxonomy
            .canonical_category(&raw_category)
            .ok_or_else(|| ValidationError::UnknownCategory(raw_category.clone()))?
            .to_string();
        let sub_category = match non_blank(candidate.sub_category) {
            Some(raw) => Some(
                self.taxonomy
                    .canonical_sub_category(&category, &raw)
                    .ok_or_else(|| ValidationError::UnknownSubCategory {
                        category: category.clone(),
                        sub_category: raw.clone(),
                    })?
                    .to_string(),
            ),
            None => None,
        };
        let impact_level = match non_blank(candidate.impact_level) {
            Some(raw) => self.taxonomy.impact_level(&raw).unwrap_or_else(|| {
                debug!(impact = %raw, "unrecognized impact level, using Moderate");
                ImpactLevel::Moderate
            }),
            None => ImpactLevel::Moderate,
        };

        let raw_url = required(candidate.source_url, "sourceUrl")?;
        let source_url = ensure_scheme(&raw_url);
        let parsed = Url::parse(&source_url).map_err(|_| ValidationError::BadUrl(raw_url.clone()))?;
        let host = match parsed.host_str() {
            Some(h) if h.contains('.') || h == "localhost" => h.to_string(),
            _ => return Err(ValidationError::BadUrl(raw_url)),
        };
        let source_name = non_blank(candidate.source_name).unwrap_or(host);

        self.check_window(expected_start, expected_end, now)?;

        let mut target_audiences: Vec<String> = Vec::new();
        for raw in &candidate.target_audiences {
            match self.taxonomy.canonical_audience(raw) {
                Some(a) if !target_audiences.iter().any(|t| t == a) => {
                    target_audiences.push(a.to_string())
                }
                Some(_) => {}
                None => debug!(audience = %raw, "dropping unrecognized audience"),
            }
        }
        if target_audiences.is_empty() {
            if let Some(a) = self.taxonomy.canonical_audience(segment) {
                target_audiences.push(a.to_string());
            }
        }

        let mut impact_locations = Vec::with_capacity(candidate.impact_locations.len());
        for (index, loc) in candidate.impact_locations.into_iter().enumerate() {
            let latitude = loc.latitude.as_ref().and_then(lenient_f64);
            let longitude = loc.longitude.as_ref().and_then(lenient_f64);
            let location = match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => Location {
                    city: non_blank(loc.city).unwrap_or_else(|| origin.city.clone()),
                    country: non_blank(loc.country).unwrap_or_else(|| origin.country.clone()),
                    latitude,
                    longitude,
                },
                _ => return Err(ValidationError::BadCoordinates { index }),
            };
            if !location.has_valid_coordinates() {
                return Err(ValidationError::BadCoordinates { index });
            }
            impact_locations.push(location);
        }
        if impact_locations.is_empty() {
            impact_locations.push(origin.clone());
        }

        let confidence = candidate
            .confidence
            .as_ref()
            .and_then(lenient_f64)
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0);

        Ok(ValidatedCandidate {
            title,
            description,
            category,
            sub_category,
            target_audiences,
            impact_level,
            confidence,
            source_name,
            source_url,
            expected_start,
            expected_end,
            origin_location: origin.clone(),
            impact_locations,
            recommended_action: non_blank(candidate.recommended_action),
            mitigation: non_blank(candidate.mitigation),
        })
    }

    /// Accept events that overlap `[start of today, now + window_days]`.
    fn check_window(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let window_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or(now);
        let window_end = now + Duration::days(self.window_days);
        let inside = |d: DateTime<Utc>| d >= window_start && d <= window_end;

        let ok = match (start, end) {
            (Some(s), Some(e)) => {
                if e < s {
                    return Err(ValidationError::EndBeforeStart);
                }
                inside(s) || inside(e) || (s < window_start && e >= window_start)
            }
            (Some(d), None) | (None, Some(d)) => inside(d),
            (None, None) => true,
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::OutsideWindow)
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    non_blank(value).ok_or(ValidationError::MissingField(field))
}

fn parse_field(
    value: Option<&str>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let value = match value.map(str::trim) {
        None => return Ok(None),
        Some(v) if v.is_empty() || v.eq_ignore_ascii_case("null") => return Ok(None),
        Some(v) => v,
    };
    parse_date(value)
        .map(Some)
        .ok_or_else(|| ValidationError::BadDate {
            field,
            value: value.to_string(),
        })
}

/// Parse the date shapes the model produces. Dates without a time are
/// midnight UTC.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}
