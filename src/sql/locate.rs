//! SQL model file lookup by warehouse alias.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

use crate::config::AuditConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::AuditError;
use crate::model::strip_model_prefix;
use crate::util::read_text_with_fallback;

const COMPONENT: &str = "locate";

/// Every `.sql` file under `root`, sorted by path.
pub fn sql_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case("sql"))
        })
        .collect();
    files.sort();
    files
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// The file-name patterns tried last, most specific first.
pub fn fuzzy_patterns(alias: &str, config: &AuditConfig) -> Vec<String> {
    let lower = alias.to_lowercase();
    let clean = strip_model_prefix(alias, config).to_lowercase();
    let layer = &config.layer_prefix;
    vec![
        format!("*{}*.sql", lower),
        format!("*{}*.sql", clean),
        format!("{}*{}*.sql", layer, lower),
        format!("{}*{}*.sql", layer, clean),
    ]
}

pub fn find_sql_file(
    alias: &str,
    root: &Path,
    config: &AuditConfig,
    sink: &mut dyn DiagnosticSink,
) -> Result<PathBuf, AuditError> {
    let not_found = || AuditError::SqlFileNotFound {
        alias: alias.to_string(),
        root: root.to_path_buf(),
    };
    if alias.is_empty() || !root.is_dir() {
        return Err(not_found());
    }

    let files = sql_files(root);
    let markers = [format!("alias='{}'", alias), format!("alias=\"{}\"", alias)];
    for path in &files {
        let Ok(content) = read_text_with_fallback(path) else {
            sink.debug(COMPONENT, format!("unreadable, skipped: {}", path.display()));
            continue;
        };
        if markers.iter().any(|m| content.contains(m.as_str())) {
            sink.debug(COMPONENT, format!("'{}' -> {} (config alias)", alias, file_name(path)));
            return Ok(path.clone());
        }
    }

    let in_subdir = root.join(alias).join(format!("{}.sql", alias));
    if in_subdir.is_file() {
        sink.debug(COMPONENT, format!("'{}' -> {} (model folder)", alias, in_subdir.display()));
        return Ok(in_subdir);
    }

    let exact = format!("{}.sql", alias);
    if let Some(path) = files.iter().find(|p| file_name(p) == exact) {
        sink.debug(COMPONENT, format!("'{}' -> {} (file name)", alias, path.display()));
        return Ok(path.clone());
    }

    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    for raw in fuzzy_patterns(alias, config) {
        let Ok(pattern) = Pattern::new(&raw) else {
            continue;
        };
        if let Some(path) = files
            .iter()
            .find(|p| pattern.matches_with(file_name(p), options))
        {
            sink.debug(
                COMPONENT,
                format!("'{}' -> {} (pattern {})", alias, path.display(), raw),
            );
            return Ok(path.clone());
        }
    }

    sink.warn(
        COMPONENT,
        format!("no SQL file for alias '{}' under {}", alias, root.display()),
    );
    Err(not_found())
}
