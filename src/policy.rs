//! Exclusion policy: which tables and fields are in scope at all.

use crate::config::AuditConfig;

/// Outcome of an exclusion check. Exactly one variant applies to any name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    Included,
    /// Matched an entry of the exclusion list
    ByName(String),
    /// Contains one of the pattern fragments
    ByPattern(String),
}

impl Exclusion {
    pub fn is_excluded(&self) -> bool {
        !matches!(self, Exclusion::Included)
    }

    /// Diagnostic reason, empty when included.
    pub fn reason(&self) -> String {
        match self {
            Exclusion::Included => String::new(),
            Exclusion::ByName(name) => format!("exclusion_list:{}", name),
            Exclusion::ByPattern(pattern) => format!("pattern:{}", pattern),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    excluded_names: Vec<String>,
    patterns: Vec<String>,
}

impl ExclusionPolicy {
    pub fn new(excluded_names: Vec<String>, patterns: Vec<String>) -> Self {
        Self {
            excluded_names,
            patterns,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(
            config.tables_to_exclude.clone(),
            config.exclusion_patterns.clone(),
        )
    }

    /// Exact names are checked first, then pattern fragments; first match wins.
    pub fn table(&self, name: &str) -> Exclusion {
        if let Some(hit) = self
            .excluded_names
            .iter()
            .find(|excluded| excluded.eq_ignore_ascii_case(name))
        {
            return Exclusion::ByName(hit.clone());
        }
        self.pattern_match(name)
    }

    /// Fields are only checked against pattern fragments.
    pub fn field(&self, name: &str) -> Exclusion {
        self.pattern_match(name)
    }

    pub fn is_table_excluded(&self, name: &str) -> (bool, String) {
        let verdict = self.table(name);
        (verdict.is_excluded(), verdict.reason())
    }

    pub fn is_field_excluded(&self, name: &str) -> (bool, String) {
        let verdict = self.field(name);
        (verdict.is_excluded(), verdict.reason())
    }

    fn pattern_match(&self, name: &str) -> Exclusion {
        let lower = name.to_lowercase();
        match self
            .patterns
            .iter()
            .find(|pattern| lower.contains(&pattern.to_lowercase()))
        {
            Some(pattern) => Exclusion::ByPattern(pattern.clone()),
            None => Exclusion::Included,
        }
    }
}
