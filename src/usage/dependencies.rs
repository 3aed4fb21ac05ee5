//! Measure dependency graph and transitive ("indirect") field usage.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use regex::Regex;
use serde::Serialize;

use crate::model::{FieldKey, MeasureDefinitions};
use crate::usage::facts::{UsageFact, UsageKind};

const COMPLEX_FUNCTIONS: &[&str] = &[
    "CALCULATE",
    "FILTER",
    "ALL",
    "ALLEXCEPT",
    "SUMX",
    "COUNTX",
    "EARLIER",
    "RELATED",
];

/// One outgoing edge of a measure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DependencyTarget {
    Field(FieldKey),
    Measure(String),
}

/// Measure name -> direct dependencies.
pub type DependencyGraph = BTreeMap<String, BTreeSet<DependencyTarget>>;

/// Field name delimited by one of `'[(\s` before and one of `'\])\s,` after.
fn field_reference_pattern(field: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"(?i)['\[\s(]{}['\])\s,]",
        regex::escape(field)
    ))
    .ok()
}

pub fn build_dependencies(definitions: &MeasureDefinitions, fields: &[FieldKey]) -> DependencyGraph {
    let mut patterns: HashMap<String, Option<Regex>> = HashMap::new();
    for field in fields {
        patterns
            .entry(field.field.to_ascii_lowercase())
            .or_insert_with(|| field_reference_pattern(&field.field));
    }

    let mut graph = DependencyGraph::new();
    for (name, expression) in definitions {
        let mut targets = BTreeSet::new();
        for field in fields {
            let matched = patterns
                .get(&field.field.to_ascii_lowercase())
                .and_then(Option::as_ref)
                .map_or(false, |re| re.is_match(expression));
            if matched {
                targets.insert(DependencyTarget::Field(field.clone()));
            }
        }
        for other in definitions.keys() {
            if other != name && expression.contains(&format!("[{}]", other)) {
                targets.insert(DependencyTarget::Measure(other.clone()));
            }
        }
        graph.insert(name.clone(), targets);
    }
    graph
}

/// Every defined measure, plus measures named by visualization, filter or measure facts.
pub fn measures_in_use(facts: &[UsageFact], graph: &DependencyGraph) -> BTreeSet<String> {
    let mut in_use: BTreeSet<String> = graph.keys().cloned().collect();
    for fact in facts {
        if matches!(
            fact.kind,
            UsageKind::Visualization | UsageKind::Filter | UsageKind::Measure
        ) && !fact.object.is_empty()
        {
            in_use.insert(fact.object.clone());
        }
    }
    in_use
}

/// Fields reachable from `measure`. The visited set is copied per branch.
pub fn dependent_fields(
    measure: &str,
    graph: &DependencyGraph,
    visited: &BTreeSet<String>,
) -> BTreeSet<FieldKey> {
    let mut fields = BTreeSet::new();
    if visited.contains(measure) {
        return fields;
    }
    let mut visited = visited.clone();
    visited.insert(measure.to_string());

    for target in graph.get(measure).into_iter().flatten() {
        match target {
            DependencyTarget::Field(field) => {
                fields.insert(field.clone());
            }
            DependencyTarget::Measure(next) => {
                fields.extend(dependent_fields(next, graph, &visited));
            }
        }
    }
    fields
}

/// Field -> measures that reach it. Only fields of `known_fields` with at least one measure.
pub fn close_indirect_usage(
    facts: &[UsageFact],
    graph: &DependencyGraph,
    known_fields: &[FieldKey],
) -> BTreeMap<FieldKey, BTreeSet<String>> {
    let known: BTreeSet<&FieldKey> = known_fields.iter().collect();
    let mut indirect: BTreeMap<FieldKey, BTreeSet<String>> = BTreeMap::new();
    for measure in measures_in_use(facts, graph) {
        for field in dependent_fields(&measure, graph, &BTreeSet::new()) {
            if known.contains(&field) {
                indirect.entry(field).or_default().insert(measure.clone());
            }
        }
    }
    indirect
}

pub fn complexity_score(expression: &str) -> usize {
    let upper = expression.to_uppercase();
    let functions: usize = COMPLEX_FUNCTIONS
        .iter()
        .map(|f| upper.matches(f).count() * 2)
        .sum();
    functions + expression.matches('(').count() + expression.len() / 100
}

/// Longest chain of measure references below `measure`.
pub fn dependency_depth(measure: &str, graph: &DependencyGraph) -> usize {
    fn walk(measure: &str, graph: &DependencyGraph, visited: &BTreeSet<String>, depth: usize) -> usize {
        if visited.contains(measure) {
            return depth;
        }
        let mut visited = visited.clone();
        visited.insert(measure.to_string());
        graph
            .get(measure)
            .into_iter()
            .flatten()
            .filter_map(|t| match t {
                DependencyTarget::Measure(next) => Some(walk(next, graph, &visited, depth + 1)),
                DependencyTarget::Field(_) => None,
            })
            .fold(depth, usize::max)
    }
    walk(measure, graph, &BTreeSet::new(), 0)
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasureStats {
    pub name: String,
    pub expression_length: usize,
    pub complexity: usize,
    pub field_count: usize,
    pub measure_count: usize,
    /// First five byte offsets of each referenced field name
    pub field_positions: BTreeMap<String, Vec<usize>>,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStats {
    pub total_measures: usize,
    pub measures_with_dependencies: usize,
    pub isolated_measures: Vec<String>,
    pub most_referenced_fields: Vec<(FieldKey, usize)>,
    pub average_dependencies: f64,
    pub max_dependencies: usize,
    pub measures: Vec<MeasureStats>,
}

impl DependencyStats {
    pub fn compute(definitions: &MeasureDefinitions, graph: &DependencyGraph) -> Self {
        let mut measures = Vec::new();
        let mut field_counts: BTreeMap<FieldKey, usize> = BTreeMap::new();

        for (name, targets) in graph {
            for target in targets {
                if let DependencyTarget::Field(field) = target {
                    *field_counts.entry(field.clone()).or_insert(0) += 1;
                }
            }
            if targets.is_empty() {
                continue;
            }

            let expression = definitions.get(name).map(String::as_str).unwrap_or_default();
            let mut field_positions = BTreeMap::new();
            let mut field_count = 0;
            let mut measure_count = 0;
            for target in targets {
                match target {
                    DependencyTarget::Field(field) => {
                        field_count += 1;
                        let positions: Vec<usize> = expression
                            .match_indices(field.field.as_str())
                            .map(|(i, _)| i)
                            .take(5)
                            .collect();
                        if !positions.is_empty() {
                            field_positions.insert(field.to_string(), positions);
                        }
                    }
                    DependencyTarget::Measure(_) => measure_count += 1,
                }
            }

            measures.push(MeasureStats {
                name: name.clone(),
                expression_length: expression.len(),
                complexity: complexity_score(expression),
                field_count,
                measure_count,
                field_positions,
                depth: dependency_depth(name, graph),
            });
        }

        let mut most_referenced: Vec<(FieldKey, usize)> = field_counts.into_iter().collect();
        most_referenced.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_referenced.truncate(10);

        let total_edges: usize = graph.values().map(BTreeSet::len).sum();
        Self {
            total_measures: definitions.len(),
            measures_with_dependencies: graph.values().filter(|t| !t.is_empty()).count(),
            isolated_measures: graph
                .iter()
                .filter(|(_, t)| t.is_empty())
                .map(|(n, _)| n.clone())
                .collect(),
            most_referenced_fields: most_referenced,
            average_dependencies: if graph.is_empty() {
                0.0
            } else {
                total_edges as f64 / graph.len() as f64
            },
            max_dependencies: graph.values().map(BTreeSet::len).max().unwrap_or(0),
            measures,
        }
    }
}
