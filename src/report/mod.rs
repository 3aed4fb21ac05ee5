//! Report artifact scanning

mod artifacts;
mod locator;
mod scanner;
mod structural;
mod text_search;

pub use artifacts::{
    decode_entry, open_report, scannable_entries, ArtifactSource, DirArtifactSource,
    MemoryArtifactSource, ZipArtifactSource,
};
pub use locator::{object_name, page_name};
pub use scanner::{
    hierarchy_facts, scan_reports, ScanStats, UsageScanner, HIERARCHY_OBJECT, HIERARCHY_PAGE,
};
pub use structural::{alias_map, find_structural_references, StructuralHit};
pub use text_search::{
    classify_usage, field_variants, find_text_reference, is_valid_reference, TextHit,
    CONTEXT_KEYWORDS,
};
