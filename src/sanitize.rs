use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::ParseError;
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    None,
    Tolerant,
    Balanced,
}

#[derive(Debug, Clone)]
pub struct Sanitized {
    pub value: Value,
    pub repair: Repair,
}

/// Pulls one JSON object out of model output: strict parse first, then a
/// tolerant rewrite, then brace balancing of a truncated tail.
#[derive(Debug, Clone, Default)]
pub struct ResponseSanitizer {
    severity_words: HashMap<String, String>,
}

impl ResponseSanitizer {
    pub fn new(taxonomy: &Taxonomy) -> Self {
        let severity_words = taxonomy
            .impact_synonym_words()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { severity_words }
    }

    pub fn extract(&self, raw: &str) -> Result<Sanitized, ParseError> {
        let unfenced = strip_fences(raw);
        let start = unfenced.find('{').ok_or_else(|| ParseError {
            reason: "no JSON object in response".to_string(),
        })?;

        if let Some(span) = outer_object(&unfenced) {
            if let Ok(value) = serde_json::from_str::<Value>(&normalize(span)) {
                return Ok(Sanitized {
                    value,
                    repair: Repair::None,
                });
            }
            if let Ok(mut value) = serde_json::from_str::<Value>(&tolerant_rewrite(span)) {
                debug!("model output needed tolerant repair");
                self.repair_known_fields(&mut value);
                return Ok(Sanitized {
                    value,
                    repair: Repair::Tolerant,
                });
            }
        }

        let balanced = balance(&tolerant_rewrite(&unfenced[start..]));
        match serde_json::from_str::<Value>(&balanced) {
            Ok(mut value) => {
                debug!("model output needed structural balancing");
                self.repair_known_fields(&mut value);
                Ok(Sanitized {
                    value,
                    repair: Repair::Balanced,
                })
            }
            Err(e) => Err(ParseError {
                reason: e.to_string(),
            }),
        }
    }

    fn repair_known_fields(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, v) in map.iter_mut() {
                    if let Value::String(s) = v {
                        match key.as_str() {
                            "sourceUrl" | "url" => *s = ensure_scheme(s),
                            "impactLevel" | "severity" => {
                                if let Some(canonical) =
                                    self.severity_words.get(&s.trim().to_lowercase())
                                {
                                    *s = canonical.clone();
                                }
                            }
                            _ => {}
                        }
                    } else {
                        self.repair_known_fields(v);
                    }
                }
            }
            Value::Array(items) => items
                .iter_mut()
                .for_each(|v| self.repair_known_fields(v)),
            _ => {}
        }
    }
}

/// Prefix `https://` onto URLs that lack a scheme.
pub fn ensure_scheme(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() || url.contains("://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        format!("https://{}", url)
    }
}

/// Remove markdown code fences (and their language tags), keeping the body.
pub fn strip_fences(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        let tag_len = rest.len()
            - rest
                .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
                .len();
        rest = &rest[tag_len..];
    }
    out.push_str(rest);
    out
}

/// Span from the first `{` to the last `}`.
pub fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars.iter().skip(from).copied().find(|c| !c.is_whitespace())
}

/// Drop trailing and doubled commas and collapse whitespace outside strings.
pub fn normalize(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_str = false;
    let mut esc = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_str {
            out.push(c);
            if esc {
                esc = false;
            } else if c == '\\' {
                esc = true;
            } else if c == '"' {
                in_str = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_str = true;
                out.push(c);
            }
            ',' => {
                if !matches!(
                    next_significant(&chars, i + 1),
                    Some('}') | Some(']') | Some(',')
                ) {
                    out.push(',');
                }
            }
            c if c.is_whitespace() => {
                while i + 1 < chars.len() && chars[i + 1].is_whitespace() {
                    i += 1;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

fn needs_comma(last: Option<char>) -> bool {
    // '0' stands for "a number ended here"; 'e'/'l' end true/false/null.
    matches!(last, Some('"' | '}' | ']' | '0' | 'e' | 'l'))
}

fn closes_string(chars: &[char], from: usize) -> bool {
    matches!(
        next_significant(chars, from),
        None | Some(':' | ',' | '}' | ']' | '"')
    )
}

/// Copy a single- or double-quoted string starting at `start` as a strict
/// JSON string. Returns the index after the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                match chars.get(i + 1) {
                    Some('\'') => {
                        out.push('\'');
                        i += 2;
                    }
                    Some(&n) if matches!(n, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                        out.push('\\');
                        out.push(n);
                        i += 2;
                    }
                    _ => {
                        out.push_str("\\\\");
                        i += 1;
                    }
                }
                continue;
            }
            c if c == quote => {
                if closes_string(chars, i + 1) {
                    out.push('"');
                    return i + 1;
                }
                out.push_str(if c == '"' { "\\\"" } else { "'" });
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
        i += 1;
    }
    i
}

/// Rewrite relaxed JSON (single quotes, bare keys, trailing commas, missing
/// commas, raw control characters) into strict JSON. Does not touch brace
/// balance.
pub fn tolerant_rewrite(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 16);
    let mut last: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                if needs_comma(last) {
                    out.push(',');
                }
                i = copy_string(&chars, i, &mut out);
                last = Some('"');
                continue;
            }
            ',' => {
                if !matches!(
                    next_significant(&chars, i + 1),
                    None | Some('}' | ']' | ',')
                ) {
                    out.push(',');
                    last = Some(',');
                }
            }
            '{' | '[' => {
                if needs_comma(last) {
                    out.push(',');
                }
                out.push(c);
                last = Some(c);
            }
            '}' | ']' | ':' => {
                out.push(c);
                last = Some(c);
            }
            c if c.is_whitespace() => out.push(c),
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '$' | '-'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let is_key = next_significant(&chars, i) == Some(':');
                if needs_comma(last) {
                    out.push(',');
                }
                let literal = match word.as_str() {
                    "true" | "True" => Some("true"),
                    "false" | "False" => Some("false"),
                    "null" | "None" => Some("null"),
                    _ => None,
                };
                match literal {
                    Some(lit) if !is_key => {
                        out.push_str(lit);
                        last = lit.chars().last();
                    }
                    _ => {
                        out.push('"');
                        out.push_str(&word);
                        out.push('"');
                        last = Some('"');
                    }
                }
                continue;
            }
            c if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '-' | '+' | '.'))
                {
                    i += 1;
                }
                let token: String = chars[start..i].iter().collect();
                if needs_comma(last) {
                    out.push(',');
                }
                if serde_json::from_str::<serde_json::Number>(&token).is_ok() {
                    out.push_str(&token);
                    last = Some('0');
                } else if let Some(n) = token
                    .trim_start_matches('+')
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                {
                    out.push_str(&n.to_string());
                    last = Some('0');
                } else {
                    out.push('"');
                    out.push_str(&token);
                    out.push('"');
                    last = Some('"');
                }
                continue;
            }
            c if c.is_control() => {}
            _ => {
                out.push(c);
                last = Some(c);
            }
        }
        i += 1;
    }
    out
}

fn trim_dangling(out: &mut String) {
    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        if out.ends_with(',') {
            out.pop();
            continue;
        }
        if out.ends_with(':') {
            out.push_str("null");
        }
        break;
    }
}

/// Close an unterminated string and any open arrays/objects, tracking string
/// and escape state character by character. Closers that do not match the
/// innermost open container close the containers in between; stray closers
/// are dropped; text after the top-level value is discarded.
pub fn balance(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_str = false;
    let mut esc = false;

    for c in s.chars() {
        if in_str {
            out.push(c);
            if esc {
                esc = false;
            } else if c == '\\' {
                esc = true;
            } else if c == '"' {
                in_str = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_str = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if !stack.contains(&c) {
                    continue;
                }
                trim_dangling(&mut out);
                while let Some(closer) = stack.pop() {
                    out.push(closer);
                    if closer == c {
                        break;
                    }
                }
                if stack.is_empty() {
                    return out;
                }
            }
            _ => out.push(c),
        }
    }

    if in_str {
        if esc {
            out.pop();
        }
        out.push('"');
    }
    trim_dangling(&mut out);
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitizer() -> ResponseSanitizer {
        ResponseSanitizer::new(&Taxonomy::load(None).unwrap())
    }

    #[test]
    fn fenced_payload_with_prose_parses_strictly() {
        let raw = "Here are the alerts you asked for:\n```json\n{\"alerts\": [{\"title\": \"Tram works\"}]}\n```\nLet me know!";
        let out = sanitizer().extract(raw).unwrap();
        assert_eq!(out.repair, Repair::None);
        assert_eq!(out.value, json!({"alerts": [{"title": "Tram works"}]}));
    }

    #[test]
    fn trailing_commas_are_normalized_without_repair() {
        let out = sanitizer()
            .extract("{\"a\": [1, 2,,], \"b\": {\"c\": true,},}")
            .unwrap();
        assert_eq!(out.repair, Repair::None);
        assert_eq!(out.value, json!({"a": [1, 2], "b": {"c": true}}));
    }

    #[test]
    fn relaxed_payload_matches_strict_equivalent() {
        let strict = r#"{"alerts": [{"title": "Tram works", "confidence": 0.9}, {"title": "Strike", "tags": ["a", "b"]}], "count": 2}"#;
        let relaxed = "```json\n{'alerts': [{'title': 'Tram works', 'confidence': 0.9,}, {'title': 'Strike', 'tags': ['a', 'b',],}], 'count': 2\n```";

        let expected: Value = serde_json::from_str(strict).unwrap();
        let out = sanitizer().extract(relaxed).unwrap();
        assert_eq!(out.repair, Repair::Balanced);
        assert_eq!(out.value, expected);
    }

    #[test]
    fn raw_newlines_and_embedded_quotes_are_escaped() {
        let raw = "{\"description\": \"Line one\nline \"two\" here\", \"ok\": true}";
        let out = sanitizer().extract(raw).unwrap();
        assert_eq!(out.repair, Repair::Tolerant);
        assert_eq!(out.value["description"], "Line one\nline \"two\" here");
        assert_eq!(out.value["ok"], true);
    }

    #[test]
    fn apostrophes_inside_single_quoted_strings_survive() {
        let out = sanitizer()
            .extract("{'title': 'Edinburgh's festival', 'n': 1}")
            .unwrap();
        assert_eq!(out.value["title"], "Edinburgh's festival");
    }

    #[test]
    fn missing_commas_and_bare_keys_are_inserted() {
        let raw = "{alerts: [{\"title\": \"A\"} {\"title\": \"B\"}]\n \"count\": 2 \"flag\": True}";
        let out = sanitizer().extract(raw).unwrap();
        assert_eq!(
            out.value,
            json!({"alerts": [{"title": "A"}, {"title": "B"}], "count": 2, "flag": true})
        );
    }

    #[test]
    fn known_fields_repaired_on_aggressive_path() {
        let raw = "{'alerts': [{'sourceUrl': 'www.edinburgh.gov.uk/trams', 'impactLevel': 'Critical'}]}";
        let out = sanitizer().extract(raw).unwrap();
        let alert = &out.value["alerts"][0];
        assert_eq!(alert["sourceUrl"], "https://www.edinburgh.gov.uk/trams");
        assert_eq!(alert["impactLevel"], "High");
    }

    #[test]
    fn irrecoverable_payloads_fail() {
        assert!(sanitizer().extract("no json here at all").is_err());
        assert!(sanitizer().extract("{:::}").is_err());
        assert!(sanitizer().extract("Sorry, I can't help {with that}").is_err());
    }

    #[test]
    fn balance_closes_open_containers() {
        assert_eq!(balance(r#"{"a": [1, 2"#), r#"{"a": [1, 2]}"#);
        assert_eq!(balance(r#"{"a": "unterminated"#), r#"{"a": "unterminated"}"#);
        assert_eq!(balance(r#"{"a": [1, }"#), r#"{"a": [1]}"#);
        assert_eq!(balance(r#"{"a": 1} trailing prose"#), r#"{"a": 1}"#);
        assert_eq!(balance(r#"{"a": "}{"}"#), r#"{"a": "}{"}"#);
        assert_eq!(balance(r#"{"a":"#), r#"{"a":null}"#);
    }

    #[test]
    fn normalize_keeps_string_contents() {
        assert_eq!(normalize("{\"a\":  \"x,  }\",\n}"), "{\"a\": \"x,  }\" }");
    }

    #[test]
    fn fences_with_language_tags_are_removed() {
        assert_eq!(strip_fences("```json\n{}\n```"), "\n{}\n");
    }

    #[test]
    fn ensure_scheme_only_touches_bare_urls() {
        assert_eq!(ensure_scheme("bbc.co.uk/news"), "https://bbc.co.uk/news");
        assert_eq!(ensure_scheme("//bbc.co.uk"), "https://bbc.co.uk");
        assert_eq!(ensure_scheme("http://bbc.co.uk"), "http://bbc.co.uk");
    }
}
