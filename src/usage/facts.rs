//! Usage facts: one observation of a field being consumed somewhere.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::model::FieldKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum UsageKind {
    Visualization,
    Filter,
    Measure,
    Hierarchy,
    Other,
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UsageKind::Visualization => "visualization",
            UsageKind::Filter => "filter",
            UsageKind::Measure => "measure",
            UsageKind::Hierarchy => "hierarchy",
            UsageKind::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DetectionMethod {
    /// Found by structural traversal; carries the JSON context (`Select.Name`, `Where`, ...)
    JsonStructure(String),
    /// Found by substring search; carries the matched variant
    TextSearch(String),
    HierarchyScan,
}

impl DetectionMethod {
    pub fn confidence(&self) -> u8 {
        match self {
            DetectionMethod::HierarchyScan => 100,
            DetectionMethod::JsonStructure(_) => 90,
            DetectionMethod::TextSearch(_) => 75,
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMethod::JsonStructure(context) => write!(f, "json_structure_{}", context),
            DetectionMethod::TextSearch(variant) => write!(f, "text_search_{}", variant),
            DetectionMethod::HierarchyScan => f.write_str("hierarchy_scan"),
        }
    }
}

/// Extra provenance collected in detailed mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactDetail {
    pub confidence: u8,
    pub line_number: Option<usize>,
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageFact {
    pub field: FieldKey,
    pub kind: UsageKind,
    /// Page identifier; the deduplication scope
    pub page: String,
    pub object: String,
    /// `report!entry`
    pub locator: String,
    pub report: String,
    pub method: DetectionMethod,
    pub detail: Option<FactDetail>,
}

impl UsageFact {
    pub fn dedup_key(&self) -> (FieldKey, UsageKind, String) {
        (self.field.clone(), self.kind, self.page.clone())
    }
}

/// Append-only fact list deduplicated by `(field, kind, page)`.
#[derive(Debug, Clone, Default)]
pub struct FactSet {
    facts: Vec<UsageFact>,
    seen: HashSet<(FieldKey, UsageKind, String)>,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an equivalent fact was already recorded.
    pub fn insert(&mut self, fact: UsageFact) -> bool {
        if !self.seen.insert(fact.dedup_key()) {
            return false;
        }
        self.facts.push(fact);
        true
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UsageFact> {
        self.facts.iter()
    }

    pub fn as_slice(&self) -> &[UsageFact] {
        &self.facts
    }

    pub fn into_vec(self) -> Vec<UsageFact> {
        self.facts
    }
}

impl Extend<UsageFact> for FactSet {
    fn extend<I: IntoIterator<Item = UsageFact>>(&mut self, iter: I) {
        for fact in iter {
            self.insert(fact);
        }
    }
}
