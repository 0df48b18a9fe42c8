use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::models::{Alert, Location};
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionPair {
    pub system: String,
    pub user: String,
}

pub struct PromptBuilder {
    taxonomy: Arc<Taxonomy>,
    horizon_days: i64,
    alerts_per_run: u32,
    global_alerts_per_run: u32,
}

impl PromptBuilder {
    pub fn new(
        taxonomy: Arc<Taxonomy>,
        horizon_days: i64,
        alerts_per_run: u32,
        global_alerts_per_run: u32,
    ) -> Self {
        Self {
            taxonomy,
            horizon_days,
            alerts_per_run,
            global_alerts_per_run: global_alerts_per_run.min(alerts_per_run),
        }
    }

    fn taxonomy_listing(&self) -> String {
        self.taxonomy
            .categories()
            .map(|(category, subs)| format!("- {}: {}", category, subs.join(" | ")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Stage one: ask for raw, cited candidate events.
    pub fn discovery(&self, location: &Location, segment: &str, now: DateTime<Utc>) -> InstructionPair {
        let today = now.format("%Y-%m-%d");
        let horizon = (now + Duration::days(self.horizon_days)).format("%Y-%m-%d");
        let local = self.alerts_per_run - self.global_alerts_per_run;

        let system = format!(
            r#"You are a travel-risk researcher monitoring disruptions that affect {segment} in {city}, {country}.

CURRENT DATE: {today}. Treat this date as fact. Do not rely on any other notion of "today".

TIME WINDOW (non-negotiable): only report events that start between {today} and {horizon} (the next {days} days), or that are already under way and still ongoing on {today}. Never report events that have already ended.

SOURCES: every event must cite at least one source with both a name and a full URL. Events without a citable source must be left out.

QUOTA: return up to {total} events:
- {local} local or national events in or around {city};
- {global} global events with a knock-on effect on {city} (airline strikes, fuel shortages, international summits).

For each event give: a short headline, what is happening, where, expected start and end dates, whether it has already ended, your confidence that it is real and current (0.0-1.0), and the source name and URL."#,
            segment = segment,
            city = location.city,
            country = location.country,
            today = today,
            horizon = horizon,
            days = self.horizon_days,
            total = self.alerts_per_run,
            local = local,
            global = self.global_alerts_per_run,
        );

        let user = format!(
            "List upcoming and ongoing disruptions for {} in {} ({:.4}, {:.4}) relevant to {}.",
            location.city, location.country, location.latitude, location.longitude, segment,
        );

        InstructionPair { system, user }
    }

    /// Stage two: turn the raw discovery text into structured records.
    pub fn synthesis(
        &self,
        raw_candidates: &str,
        location: &Location,
        segment: &str,
        now: DateTime<Utc>,
    ) -> InstructionPair {
        let today = now.format("%Y-%m-%d");
        let audiences = self.taxonomy.audiences().join(" | ");

        let system = format!(
            r#"You convert researched disruption notes into structured alerts for {segment} in {city}.

CURRENT DATE: {today}.

HARD FILTERS - drop an event entirely if:
1. the notes say it has already ended;
2. its confidence is below 0.5;
3. its source name or source URL is empty.

FORMAT RULES:
- "title": 4 to 10 words, no trailing punctuation.
- "description": 2 to 4 factual sentences.
- "expectedStart" / "expectedEnd": ISO-8601 dates (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ); omit a date that is unknown.
- "recommendedAction": exactly one sentence.
- "mitigation": exactly one sentence.
- "impactLevel": one of Low, Moderate, High.
- "confidence": number between 0 and 1.
- "sourceName" and "sourceUrl": copied from the notes; the URL must be absolute.
- "impactLocations": list of {{"city", "country", "latitude", "longitude"}} with numeric coordinates.

TAXONOMY - "category" must be one of the keys below and "subCategory" one of its values:
{taxonomy}

AUDIENCES - "targetAudiences" may only contain: {audiences}

Respond with a single JSON object and nothing else:
{{"alerts": [{{"title": "", "description": "", "category": "", "subCategory": "", "targetAudiences": [], "impactLevel": "", "expectedStart": "", "expectedEnd": "", "recommendedAction": "", "mitigation": "", "confidence": 0.0, "sourceName": "", "sourceUrl": "", "impactLocations": []}}]}}"#,
            segment = segment,
            city = location.city,
            today = today,
            taxonomy = self.taxonomy_listing(),
            audiences = audiences,
        );

        let user = format!("Research notes:\n\n{}", raw_candidates.trim());

        InstructionPair { system, user }
    }

    /// Ask whether a published alert has materially changed.
    pub fn update_check(&self, alert: &Alert, now: DateTime<Utc>) -> InstructionPair {
        let fmt_date = |d: Option<DateTime<Utc>>| {
            d.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string())
        };

        let system = format!(
            r#"You review published travel-disruption alerts for material changes.

CURRENT DATE: {today}.

A material change is a new date, a changed scope or location, a cancellation, an escalation or de-escalation of impact, or official new guidance. Rewording or minor detail is not material.

Respond with a single JSON object and nothing else:
{{"needsUpdate": true|false, "reason": "why an update is or is not needed", "updateSummary": "2-3 sentences describing only what changed", "confidence": 0.0}}"#,
            today = now.format("%Y-%m-%d"),
        );

        let user = format!(
            "Title: {title}\nDescription: {description}\nCategory: {category}\nType: {sub_category}\nImpact: {impact}\nExpected start: {start}\nExpected end: {end}\nStatus: {status}\nLocation: {city}, {country}",
            title = alert.title,
            description = alert.description,
            category = alert.category,
            sub_category = alert.sub_category.as_deref().unwrap_or("unspecified"),
            impact = alert.impact_level,
            start = fmt_date(alert.expected_start),
            end = fmt_date(alert.expected_end),
            status = alert.status,
            city = alert.origin_location.city,
            country = alert.origin_location.country,
        );

        InstructionPair { system, user }
    }
}
