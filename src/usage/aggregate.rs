//! Per-field usage profiles and the intra-file composition check.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::AuditConfig;
use crate::model::{FieldKey, ModelSchema};
use crate::sql::{line_alias, AliasPolicy, SqlStructure};
use crate::usage::facts::{UsageFact, UsageKind};
use crate::util::{contains_word_ci, word_positions_ci};

/// Metadata-level usage that never shows up in report artifacts.
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryUsage {
    pub relationships: BTreeSet<FieldKey>,
    pub sort_targets: BTreeSet<FieldKey>,
    pub rls: BTreeSet<FieldKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageProfile {
    pub field: FieldKey,
    pub visualization: bool,
    pub filter: bool,
    pub measure: bool,
    pub hierarchy: bool,
    pub other: bool,
    /// Measures that reach this field through the dependency graph
    pub indirectly_used_via_measures: BTreeSet<String>,
    pub has_relationship: bool,
    pub sort_target: bool,
    pub rls_referenced: bool,
    /// Used sibling column whose definition embeds this one
    pub blocked_by: Option<FieldKey>,
    /// Why the field is kept out of the statistics
    pub excluded: Option<String>,
}

impl UsageProfile {
    pub fn new(field: FieldKey) -> Self {
        Self {
            field,
            visualization: false,
            filter: false,
            measure: false,
            hierarchy: false,
            other: false,
            indirectly_used_via_measures: BTreeSet::new(),
            has_relationship: false,
            sort_target: false,
            rls_referenced: false,
            blocked_by: None,
            excluded: None,
        }
    }

    /// Used directly by a report fact of any kind.
    pub fn used_directly(&self) -> bool {
        self.visualization || self.filter || self.measure || self.hierarchy || self.other
    }

    pub fn is_used(&self) -> bool {
        self.used_directly()
            || !self.indirectly_used_via_measures.is_empty()
            || self.has_relationship
            || self.sort_target
            || self.rls_referenced
            || self.blocked_by.is_some()
            || self.excluded.is_some()
    }

    fn record(&mut self, kind: UsageKind) {
        match kind {
            UsageKind::Visualization => self.visualization = true,
            UsageKind::Filter => self.filter = true,
            UsageKind::Measure => self.measure = true,
            UsageKind::Hierarchy => self.hierarchy = true,
            UsageKind::Other => self.other = true,
        }
    }
}

/// Merge facts, indirect usage and metadata usage into one profile per schema field.
///
/// The result is sorted by table then field.
pub fn aggregate(
    schema: &ModelSchema,
    facts: &[UsageFact],
    indirect: &BTreeMap<FieldKey, BTreeSet<String>>,
    auxiliary: &AuxiliaryUsage,
    config: &AuditConfig,
) -> Vec<UsageProfile> {
    let mut profiles: BTreeMap<FieldKey, UsageProfile> = schema
        .all_fields()
        .into_iter()
        .map(|key| (key.clone(), UsageProfile::new(key)))
        .collect();

    for fact in facts {
        if let Some(profile) = profiles.get_mut(&fact.field) {
            profile.record(fact.kind);
        }
    }

    for (key, profile) in profiles.iter_mut() {
        if let Some(measures) = indirect.get(key) {
            profile.indirectly_used_via_measures = measures.clone();
        }
        profile.has_relationship = auxiliary.relationships.contains(key);
        profile.sort_target = auxiliary.sort_targets.contains(key);
        profile.rls_referenced = auxiliary.rls.contains(key);
        if config
            .display_skip_fields
            .iter()
            .any(|skip| skip.eq_ignore_ascii_case(&key.field))
        {
            profile.excluded = Some("technical field".to_string());
        }
    }

    profiles.into_values().collect()
}

/// Mark unused fields of `table` that a used sibling's definition line still embeds.
///
/// Usage is judged on the state before the check, so blocking does not cascade.
/// Returns the number of fields newly blocked.
pub fn apply_composition_check(profiles: &mut [UsageProfile], table: &str, sql_text: &str) -> usize {
    let used_before: BTreeMap<FieldKey, bool> = profiles
        .iter()
        .filter(|p| p.field.table.eq_ignore_ascii_case(table))
        .map(|p| (p.field.clone(), p.is_used()))
        .collect();

    let lines: Vec<(Option<String>, &str)> = sql_text
        .lines()
        .map(|line| (line_alias(line, AliasPolicy::Permissive), line))
        .collect();
    // whole column expressions, for definitions that span several lines
    let expressions: Vec<(String, String)> = SqlStructure::analyze(sql_text, AliasPolicy::Permissive)
        .map(|structure| {
            structure
                .blocks
                .iter()
                .flat_map(|block| block.columns.iter())
                .filter_map(|column| {
                    let alias = column.alias.as_ref()?;
                    Some((alias.clone(), expression_without_alias(&column.definition, alias)))
                })
                .collect()
        })
        .unwrap_or_default();

    let mut blocked = 0;
    for profile in profiles
        .iter_mut()
        .filter(|p| p.field.table.eq_ignore_ascii_case(table))
    {
        if used_before.get(&profile.field).copied().unwrap_or(true) {
            continue;
        }
        let name = profile.field.field.as_str();
        if word_positions_ci(sql_text, name).len() <= 1 {
            continue;
        }

        let blocker = used_before.iter().find(|(sibling, used)| {
            **used
                && *sibling != &profile.field
                && (lines.iter().any(|(alias, line)| {
                    alias
                        .as_deref()
                        .map_or(false, |a| a.eq_ignore_ascii_case(&sibling.field))
                        && contains_word_ci(line, name)
                }) || expressions.iter().any(|(alias, expression)| {
                    alias.eq_ignore_ascii_case(&sibling.field) && contains_word_ci(expression, name)
                }))
        });
        if let Some((sibling, _)) = blocker {
            profile.blocked_by = Some(sibling.clone());
            blocked += 1;
        }
    }
    blocked
}

/// Column definition with its trailing alias cut off.
fn expression_without_alias(definition: &str, alias: &str) -> String {
    let lower = definition.to_ascii_lowercase();
    match lower.rfind(&alias.to_ascii_lowercase()) {
        Some(pos) if pos > 0 => definition[..pos].to_string(),
        _ => definition.to_string(),
    }
}

/// Fields that could be commented out.
pub fn eligible_unused(profiles: &[UsageProfile]) -> Vec<FieldKey> {
    profiles
        .iter()
        .filter(|p| !p.is_used())
        .map(|p| p.field.clone())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStatistics {
    pub analysed: usize,
    pub used: usize,
    pub used_percentage: f64,
    pub visualization: usize,
    pub measure: usize,
    pub filter: usize,
    pub hierarchy: usize,
    pub indirect: usize,
    pub relationship: usize,
    pub sort_target: usize,
    pub rls: usize,
    pub blocked: usize,
    pub unused: usize,
}

impl UsageStatistics {
    /// Fields carrying an `excluded` reason are not counted.
    pub fn from_profiles(profiles: &[UsageProfile]) -> Self {
        let mut stats = Self::default();
        for profile in profiles.iter().filter(|p| p.excluded.is_none()) {
            stats.analysed += 1;
            if profile.is_used() {
                stats.used += 1;
            }
            stats.visualization += usize::from(profile.visualization);
            stats.measure += usize::from(profile.measure);
            stats.filter += usize::from(profile.filter);
            stats.hierarchy += usize::from(profile.hierarchy);
            stats.indirect += usize::from(!profile.indirectly_used_via_measures.is_empty());
            stats.relationship += usize::from(profile.has_relationship);
            stats.sort_target += usize::from(profile.sort_target);
            stats.rls += usize::from(profile.rls_referenced);
            stats.blocked += usize::from(profile.blocked_by.is_some());
        }
        stats.unused = stats.analysed - stats.used;
        stats.used_percentage = if stats.analysed == 0 {
            0.0
        } else {
            stats.used as f64 / stats.analysed as f64 * 100.0
        };
        stats
    }
}
