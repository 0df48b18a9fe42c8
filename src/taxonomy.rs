use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::{ImpactLevel, Location};

const DEFAULT_TAXONOMY: &str = include_str!("../config/taxonomy.yaml");
const DEFAULT_LOCATIONS: &str = include_str!("../config/locations.yaml");

#[derive(Debug, Clone, Deserialize)]
struct TaxonomyFile {
    categories: BTreeMap<String, Vec<String>>,
    audiences: Vec<String>,
    #[serde(default)]
    segments: Vec<String>,
    #[serde(default)]
    synonyms: SynonymFile,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SynonymFile {
    #[serde(default)]
    category: HashMap<String, String>,
    #[serde(default)]
    sub_category: HashMap<String, String>,
    #[serde(default)]
    impact_level: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LocationsFile {
    locations: Vec<Location>,
}

/// Case-insensitive lookup table from variant spellings to canonical values.
#[derive(Debug, Clone, Default)]
pub struct SynonymMap {
    entries: HashMap<String, String>,
}

impl SynonymMap {
    fn new(raw: HashMap<String, String>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(k, v)| (fold(&k), v))
            .collect();
        Self { entries }
    }

    pub fn resolve<'a>(&'a self, value: &'a str) -> &'a str {
        self.entries
            .get(&fold(value))
            .map(String::as_str)
            .unwrap_or(value)
    }
}

fn fold(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
pub struct Taxonomy {
    categories: BTreeMap<String, Vec<String>>,
    audiences: Vec<String>,
    segments: Vec<String>,
    category_synonyms: SynonymMap,
    sub_category_synonyms: SynonymMap,
    impact_synonyms: SynonymMap,
}

impl Taxonomy {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: TaxonomyFile = serde_yaml::from_str(text).context("invalid taxonomy YAML")?;
        if file.categories.is_empty() {
            anyhow::bail!("taxonomy defines no categories");
        }
        let segments = if file.segments.is_empty() {
            file.audiences.clone()
        } else {
            file.segments
        };
        Ok(Self {
            categories: file.categories,
            audiences: file.audiences,
            segments,
            category_synonyms: SynonymMap::new(file.synonyms.category),
            sub_category_synonyms: SynonymMap::new(file.synonyms.sub_category),
            impact_synonyms: SynonymMap::new(file.synonyms.impact_level),
        })
    }

    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(Path::new(p))
                    .with_context(|| format!("reading taxonomy file {}", p))?;
                Self::from_yaml(&text)
            }
            None => Self::from_yaml(DEFAULT_TAXONOMY),
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.categories
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Map a category spelling onto its canonical key, if it is one.
    pub fn canonical_category(&self, raw: &str) -> Option<&str> {
        let resolved = self.category_synonyms.resolve(raw.trim());
        let folded = fold(resolved);
        self.categories
            .keys()
            .find(|k| fold(k) == folded)
            .map(String::as_str)
    }

    /// Map a sub-category spelling onto a member of `category`'s allowed list.
    pub fn canonical_sub_category(&self, category: &str, raw: &str) -> Option<&str> {
        let allowed = self.categories.get(category)?;
        let resolved = self.sub_category_synonyms.resolve(raw.trim());
        let folded = fold(resolved);
        allowed
            .iter()
            .find(|s| fold(s) == folded)
            .map(String::as_str)
    }

    pub fn canonical_audience(&self, raw: &str) -> Option<&str> {
        let folded = fold(raw);
        self.audiences
            .iter()
            .find(|a| fold(a) == folded)
            .map(String::as_str)
    }

    pub fn impact_level(&self, raw: &str) -> Option<ImpactLevel> {
        self.impact_synonyms.resolve(raw.trim()).parse().ok()
    }

    /// Impact synonyms as (lower-cased word, canonical level) pairs.
    pub fn impact_synonym_words(&self) -> impl Iterator<Item = (&str, &str)> {
        self.impact_synonyms
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub fn load_locations(path: Option<&str>) -> Result<Vec<Location>> {
    let text = match path {
        Some(p) => std::fs::read_to_string(Path::new(p))
            .with_context(|| format!("reading locations file {}", p))?,
        None => DEFAULT_LOCATIONS.to_string(),
    };
    let file: LocationsFile = serde_yaml::from_str(&text).context("invalid locations YAML")?;
    if let Some(bad) = file.locations.iter().find(|l| !l.has_valid_coordinates()) {
        anyhow::bail!("location '{}' has out-of-range coordinates", bad.city);
    }
    Ok(file.locations)
}
