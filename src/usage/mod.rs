//! Field usage: facts, measure dependencies and per-field profiles

mod aggregate;
mod dependencies;
mod facts;

pub use aggregate::{
    aggregate, apply_composition_check, eligible_unused, AuxiliaryUsage, UsageProfile,
    UsageStatistics,
};
pub use dependencies::{
    build_dependencies, close_indirect_usage, complexity_score, dependency_depth,
    dependent_fields, measures_in_use, DependencyGraph, DependencyStats, DependencyTarget,
    MeasureStats,
};
pub use facts::{DetectionMethod, FactDetail, FactSet, UsageFact, UsageKind};
