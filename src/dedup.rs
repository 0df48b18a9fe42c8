use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::db::{AlertFilter, AlertStore, Page, SortOrder};
use crate::error::StoreError;
use crate::models::{Alert, AlertStatus};
use crate::validate::ValidatedCandidate;

/// Similarity reported for an exact description/window match.
pub const EXACT_MATCH_SIMILARITY: f64 = 0.95;

/// Upper bound on stored records compared per candidate.
const LOOKBACK_LIMIT: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub existing_id: Uuid,
    pub similarity: f64,
    pub kind: MatchKind,
}

/// Token-set Jaccard similarity over lower-cased, whitespace-split words.
pub fn similarity(a: &str, b: &str) -> f64 {
    let lower_a = a.to_lowercase();
    let lower_b = b.to_lowercase();
    let ta: HashSet<&str> = lower_a.split_whitespace().collect();
    let tb: HashSet<&str> = lower_b.split_whitespace().collect();
    let union = ta.union(&tb).count();
    if union == 0 {
        return 1.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

fn windows_overlap(
    a: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    b: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
) -> bool {
    // Missing bounds are open-ended.
    let starts_before_other_ends = match (a.0, b.1) {
        (Some(start), Some(end)) => start <= end,
        _ => true,
    };
    let other_starts_before_end = match (b.0, a.1) {
        (Some(start), Some(end)) => start <= end,
        _ => true,
    };
    starts_before_other_ends && other_starts_before_end
}

pub struct DeduplicationEngine {
    threshold: f64,
    lookback: Duration,
}

impl DeduplicationEngine {
    pub fn new(threshold: f64, lookback_days: i64) -> Self {
        Self {
            threshold,
            lookback: Duration::days(lookback_days),
        }
    }

    /// Look for an existing record the candidate duplicates.
    pub async fn find_duplicate(
        &self,
        store: &dyn AlertStore,
        candidate: &ValidatedCandidate,
        now: DateTime<Utc>,
    ) -> Result<Option<DuplicateMatch>, StoreError> {
        let city = candidate.origin_location.city.clone();

        let exact_filter = AlertFilter {
            origin_city: Some(city.clone()),
            statuses: vec![AlertStatus::Pending, AlertStatus::Approved],
            description: Some(candidate.description.clone()),
            ..Default::default()
        };
        let exact = store
            .find(&exact_filter, SortOrder::NewestFirst, Page::first(LOOKBACK_LIMIT))
            .await?;
        let window = (candidate.expected_start, candidate.expected_end);
        if let Some(hit) = exact
            .iter()
            .find(|a| windows_overlap(window, (a.expected_start, a.expected_end)))
        {
            return Ok(Some(DuplicateMatch {
                existing_id: hit.id,
                similarity: EXACT_MATCH_SIMILARITY,
                kind: MatchKind::Exact,
            }));
        }

        let recent_filter = AlertFilter {
            origin_city: Some(city),
            created_after: Some(now - self.lookback),
            ..Default::default()
        };
        let recent = store
            .find(&recent_filter, SortOrder::NewestFirst, Page::first(LOOKBACK_LIMIT))
            .await?;
        Ok(self.best_fuzzy_match(&candidate.description, &recent))
    }

    fn best_fuzzy_match(&self, description: &str, recent: &[Alert]) -> Option<DuplicateMatch> {
        recent
            .iter()
            .map(|a| (a.id, similarity(description, &a.description)))
            .max_by(|x, y| x.1.total_cmp(&y.1))
            .filter(|(_, score)| *score > self.threshold)
            .map(|(existing_id, similarity)| DuplicateMatch {
                existing_id,
                similarity,
                kind: MatchKind::Fuzzy,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryAlertStore;
    use crate::models::alert::fixtures::{alert, edinburgh};
    use crate::models::ImpactLevel;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn candidate(description: &str) -> ValidatedCandidate {
        ValidatedCandidate {
            title: "Tram closure".into(),
            description: description.into(),
            category: "Transport".into(),
            sub_category: None,
            target_audiences: vec![],
            impact_level: ImpactLevel::Moderate,
            confidence: 0.95,
            source_name: "Edinburgh Trams".into(),
            source_url: "https://edinburghtrams.com".into(),
            expected_start: None,
            expected_end: None,
            origin_location: edinburgh(),
            impact_locations: vec![edinburgh()],
            recommended_action: None,
            mitigation: None,
        }
    }

    #[test]
    fn identical_text_is_fully_similar() {
        let text = "Trams suspended between Haymarket and York Place";
        assert_eq!(similarity(text, text), 1.0);
        assert_eq!(similarity("A b", "a B"), 1.0);
        assert_eq!(similarity("one two", "three four"), 0.0);
    }

    #[test]
    fn jaccard_counts_distinct_tokens() {
        assert!((similarity("a b c d", "a b c e d") - 0.8).abs() < 1e-9);
        // 3 shared of 5 distinct.
        assert!((similarity("a b c d", "a b c e") - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exact_match_requires_overlapping_window() {
        let text = "Trams suspended between Haymarket and York Place";
        let mut existing = alert(text, AlertStatus::Approved, now() - Duration::days(30));
        existing.expected_start = Some(Utc.with_ymd_and_hms(2026, 10, 20, 0, 0, 0).unwrap());
        existing.expected_end = Some(Utc.with_ymd_and_hms(2026, 10, 22, 0, 0, 0).unwrap());
        let store = MemoryAlertStore::with_alerts(vec![existing.clone()]);
        let engine = DeduplicationEngine::new(0.8, 7);

        let mut overlapping = candidate(text);
        overlapping.expected_start = Some(Utc.with_ymd_and_hms(2026, 10, 21, 0, 0, 0).unwrap());
        let hit = engine.find_duplicate(&store, &overlapping, now()).await.unwrap().unwrap();
        assert_eq!(hit.existing_id, existing.id);
        assert_eq!(hit.similarity, EXACT_MATCH_SIMILARITY);
        assert_eq!(hit.kind, MatchKind::Exact);

        // Same text, disjoint window, and outside the fuzzy lookback.
        let mut later = candidate(text);
        later.expected_start = Some(Utc.with_ymd_and_hms(2026, 10, 28, 0, 0, 0).unwrap());
        assert!(engine.find_duplicate(&store, &later, now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_records_are_not_exact_matches() {
        let text = "Trams suspended";
        let existing = alert(text, AlertStatus::Rejected, now() - Duration::days(30));
        let store = MemoryAlertStore::with_alerts(vec![existing]);
        let engine = DeduplicationEngine::new(0.8, 7);
        assert!(engine.find_duplicate(&store, &candidate(text), now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fuzzy_match_takes_best_recent_record_above_threshold() {
        let store = MemoryAlertStore::with_alerts(vec![
            alert("a b c d e f g h i j", AlertStatus::Approved, now() - Duration::days(2)),
            alert("a b c d e f g h x y", AlertStatus::Pending, now() - Duration::days(1)),
            alert("a b c d e f g h i j", AlertStatus::Approved, now() - Duration::days(9)),
        ]);
        let engine = DeduplicationEngine::new(0.8, 7);

        // 10 shared of 11 distinct against the first record.
        let hit = engine
            .find_duplicate(&store, &candidate("a b c d e f g h i j k"), now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.kind, MatchKind::Fuzzy);
        assert!((hit.similarity - 10.0 / 11.0).abs() < 1e-9);

        // Other cities never match.
        let mut elsewhere = candidate("a b c d e f g h i j");
        elsewhere.origin_location.city = "Glasgow".into();
        assert!(engine.find_duplicate(&store, &elsewhere, now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn similarity_at_threshold_is_not_duplicate() {
        let store = MemoryAlertStore::with_alerts(vec![alert(
            "a b c d",
            AlertStatus::Approved,
            now() - Duration::days(1),
        )]);
        let engine = DeduplicationEngine::new(0.8, 7);
        // Exactly 0.8 does not exceed the threshold.
        assert!(engine
            .find_duplicate(&store, &candidate("a b c d e"), now())
            .await
            .unwrap()
            .is_none());
    }
}
