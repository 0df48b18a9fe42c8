use serde::Deserialize;
use serde_json::Value;

/// A structured record proposed by the generative service, before validation.
///
/// Every field is optional: the model output is untrusted and the validator
/// decides what is missing, what is repaired and what is rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Candidate {
    #[serde(deserialize_with = "lenient_text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub category: Option<String>,
    #[serde(alias = "type", deserialize_with = "lenient_text")]
    pub sub_category: Option<String>,
    #[serde(alias = "targetAudience", deserialize_with = "lenient_strings")]
    pub target_audiences: Vec<String>,
    #[serde(alias = "severity", deserialize_with = "lenient_text")]
    pub impact_level: Option<String>,
    pub confidence: Option<Value>,
    #[serde(deserialize_with = "lenient_text")]
    pub source_name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub source_url: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub expected_start: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub expected_end: Option<String>,
    #[serde(deserialize_with = "lenient_locations")]
    pub impact_locations: Vec<CandidateLocation>,
    #[serde(deserialize_with = "lenient_text")]
    pub recommended_action: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CandidateLocation {
    #[serde(deserialize_with = "lenient_text")]
    pub city: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub country: Option<String>,
    #[serde(alias = "lat")]
    pub latitude: Option<Value>,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: Option<Value>,
}

/// Structured answer to an update check.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateVerdict {
    #[serde(deserialize_with = "lenient_bool_field")]
    pub needs_update: bool,
    #[serde(deserialize_with = "lenient_string_field")]
    pub reason: String,
    #[serde(deserialize_with = "lenient_string_field")]
    pub update_summary: String,
    #[serde(deserialize_with = "lenient_f64_field")]
    pub confidence: f64,
}

/// Read a number that the model may have emitted as a JSON number or a
/// numeric string.
pub fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim().trim_start_matches('+');
            if s.is_empty() {
                None
            } else {
                s.parse::<f64>().ok().filter(|f| f.is_finite())
            }
        }
        _ => None,
    }
}

fn lenient_f64_field<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(lenient_f64(&v).unwrap_or(0.0))
}

fn lenient_bool_field<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    })
}

/// Scalars become text; null, arrays and objects count as absent.
fn text_of(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(text_of(Value::deserialize(deserializer)?))
}

fn lenient_string_field<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(text_of(Value::deserialize(deserializer)?).unwrap_or_default())
}

/// A lone string or object stands for a one-element list. Other shapes are empty.
fn items_of(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        v @ (Value::String(_) | Value::Object(_)) => vec![v],
        _ => Vec::new(),
    }
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(items_of(Value::deserialize(deserializer)?)
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect())
}

fn lenient_locations<'de, D>(deserializer: D) -> Result<Vec<CandidateLocation>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(items_of(Value::deserialize(deserializer)?)
        .into_iter()
        .filter_map(|v| match v {
            // A bare place name.
            Value::String(city) => Some(CandidateLocation {
                city: Some(city),
                ..Default::default()
            }),
            v @ Value::Object(_) => serde_json::from_value(v).ok(),
            _ => None,
        })
        .collect())
}

/// Split a parsed discovery/synthesis payload into its candidate entries.
///
/// Accepts `{"alerts": [...]}` (the requested shape), any other single array
/// field, or a lone object that is itself one candidate.
pub fn candidate_entries(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            if let Some(Value::Array(items)) = map.remove("alerts") {
                return items;
            }
            let arrays: Vec<String> = map
                .iter()
                .filter(|(_, v)| v.is_array())
                .map(|(k, _)| k.clone())
                .collect();
            if arrays.len() == 1 && !map.contains_key("title") {
                if let Some(Value::Array(items)) = map.remove(&arrays[0]) {
                    return items;
                }
            }
            if map.contains_key("title") {
                vec![Value::Object(map)]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_accepts_aliases_and_loose_numbers() {
        let c: Candidate = serde_json::from_value(json!({
            "title": "Tram strike",
            "type": "Strike",
            "targetAudience": ["Commuters"],
            "severity": "Critical",
            "confidence": "0.92",
            "impactLocations": [{"city": "Edinburgh", "lat": "55.95", "lng": -3.18}]
        }))
        .unwrap();

        assert_eq!(c.sub_category.as_deref(), Some("Strike"));
        assert_eq!(c.impact_level.as_deref(), Some("Critical"));
        assert_eq!(c.target_audiences, vec!["Commuters"]);
        assert_eq!(c.confidence.as_ref().and_then(lenient_f64), Some(0.92));
        let loc = &c.impact_locations[0];
        assert_eq!(loc.latitude.as_ref().and_then(lenient_f64), Some(55.95));
        assert_eq!(loc.longitude.as_ref().and_then(lenient_f64), Some(-3.18));
    }

    #[test]
    fn lenient_f64_rejects_non_numeric() {
        assert_eq!(lenient_f64(&json!("north")), None);
        assert_eq!(lenient_f64(&json!(null)), None);
        assert_eq!(lenient_f64(&json!("+20.5")), Some(20.5));
    }

    #[test]
    fn entries_from_various_shapes() {
        assert_eq!(candidate_entries(json!({"alerts": [{}, {}]})).len(), 2);
        assert_eq!(candidate_entries(json!({"events": [{}]})).len(), 1);
        assert_eq!(candidate_entries(json!({"title": "x"})).len(), 1);
        assert!(candidate_entries(json!({"note": "none"})).is_empty());
    }

    #[test]
    fn bare_string_audience_is_a_single_entry() {
        let c: Candidate = serde_json::from_value(json!({
            "title": "Tram strike",
            "targetAudiences": "Commuters"
        }))
        .unwrap();
        assert_eq!(c.target_audiences, vec!["Commuters"]);
    }

    #[test]
    fn wrong_shaped_audiences_become_empty() {
        let c: Candidate = serde_json::from_value(json!({
            "title": "Tram strike",
            "targetAudiences": 7
        }))
        .unwrap();
        assert!(c.target_audiences.is_empty());

        let c: Candidate = serde_json::from_value(json!({
            "title": "Tram strike",
            "targetAudiences": ["Commuters", 3, null, {"name": "x"}]
        }))
        .unwrap();
        assert_eq!(c.target_audiences, vec!["Commuters"]);
    }

    #[test]
    fn single_location_object_is_accepted() {
        let c: Candidate = serde_json::from_value(json!({
            "impactLocations": {"city": "Leith", "country": "United Kingdom", "lat": 55.97, "lng": -3.17}
        }))
        .unwrap();
        assert_eq!(c.impact_locations.len(), 1);
        assert_eq!(c.impact_locations[0].city.as_deref(), Some("Leith"));
    }

    #[test]
    fn odd_location_entries_are_kept_or_dropped() {
        let c: Candidate = serde_json::from_value(json!({
            "impactLocations": ["Leith", 42, {"city": "Portobello"}, {"city": ["x"]}]
        }))
        .unwrap();
        let cities: Vec<_> = c.impact_locations.iter().map(|l| l.city.clone()).collect();
        assert_eq!(
            cities,
            vec![Some("Leith".to_string()), Some("Portobello".to_string()), None]
        );

        let c: Candidate = serde_json::from_value(json!({"impactLocations": true})).unwrap();
        assert!(c.impact_locations.is_empty());
    }

    #[test]
    fn scalar_text_fields_are_stringified() {
        let c: Candidate = serde_json::from_value(json!({
            "title": 2026,
            "description": ["not", "text"],
            "category": "Industrial Action"
        }))
        .unwrap();
        assert_eq!(c.title.as_deref(), Some("2026"));
        assert_eq!(c.description, None);
        assert_eq!(c.category.as_deref(), Some("Industrial Action"));
    }

    #[test]
    fn verdict_tolerates_string_flag() {
        let v: UpdateVerdict = serde_json::from_value(json!({
            "needsUpdate": "true",
            "reason": "closure extended",
            "confidence": 0.9
        }))
        .unwrap();
        assert!(v.needs_update);

        let v: UpdateVerdict =
            serde_json::from_value(json!({"needsUpdate": "No", "reason": 5})).unwrap();
        assert!(!v.needs_update);
        assert_eq!(v.reason, "5");
    }

    #[test]
    fn verdict_tolerates_string_confidence() {
        let v: UpdateVerdict = serde_json::from_value(json!({
            "needsUpdate": true,
            "reason": "closure extended",
            "updateSummary": "Closure now runs to Sunday",
            "confidence": "0.8"
        }))
        .unwrap();
        assert!(v.needs_update);
        assert_eq!(v.confidence, 0.8);
    }
}
