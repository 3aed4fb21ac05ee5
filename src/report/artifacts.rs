//! Report artifact sources: named byte blobs, listable and readable by name.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, UTF_16LE};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::config::AuditConfig;
use crate::error::AuditError;

/// Anything that can hand out report entries by name.
pub trait ArtifactSource {
    /// Entry names, in a stable order.
    fn list_entries(&self) -> Vec<String>;

    fn read_entry(&self, name: &str) -> Result<Vec<u8>, AuditError>;
}

/// All entries of a `.pbix` (or any zip) archive, loaded into memory.
///
/// An entry that cannot be decompressed is still listed; reading it returns
/// the failure so the scan records it and moves on.
pub struct ZipArtifactSource {
    files: BTreeMap<String, Vec<u8>>,
    unreadable: BTreeMap<String, String>,
}

impl ZipArtifactSource {
    pub fn from_path(path: &Path) -> Result<Self, AuditError> {
        let file = File::open(path).map_err(|e| AuditError::ArtifactUnreadable {
            name: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut archive = ZipArchive::new(file).map_err(|e| AuditError::ArchiveError {
            message: format!("Failed to read report {}: {}", path.display(), e),
        })?;

        let mut files = BTreeMap::new();
        let mut unreadable = BTreeMap::new();
        for i in 0..archive.len() {
            let fallback_name = archive
                .name_for_index(i)
                .map_or_else(|| format!("entry #{}", i), str::to_string);
            let mut entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    unreadable.insert(fallback_name, e.to_string());
                    continue;
                }
            };
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            let mut data = Vec::new();
            match entry.read_to_end(&mut data) {
                Ok(_) => {
                    files.insert(name, data);
                }
                Err(e) => {
                    unreadable.insert(name, e.to_string());
                }
            }
        }

        Ok(Self { files, unreadable })
    }

    /// Entries that failed to decompress, with the reason.
    pub fn unreadable_entries(&self) -> &BTreeMap<String, String> {
        &self.unreadable
    }
}

impl ArtifactSource for ZipArtifactSource {
    fn list_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .keys()
            .chain(self.unreadable.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn read_entry(&self, name: &str) -> Result<Vec<u8>, AuditError> {
        if let Some(message) = self.unreadable.get(name) {
            return Err(AuditError::ArtifactUnreadable {
                name: name.to_string(),
                message: message.clone(),
            });
        }
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| AuditError::ArtifactUnreadable {
                name: name.to_string(),
                message: "entry not found".to_string(),
            })
    }
}

/// In-memory entries, for tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactSource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryArtifactSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), data.into());
    }
}

impl ArtifactSource for MemoryArtifactSource {
    fn list_entries(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn read_entry(&self, name: &str) -> Result<Vec<u8>, AuditError> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| AuditError::ArtifactUnreadable {
                name: name.to_string(),
                message: "entry not found".to_string(),
            })
    }
}

/// An unpacked report folder; entry names are `/`-separated relative paths.
pub struct DirArtifactSource {
    root: PathBuf,
}

impl DirArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactSource for DirArtifactSource {
    fn list_entries(&self) -> Vec<String> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let relative = e.path().strip_prefix(&self.root).ok()?;
                let parts: Vec<&str> = relative
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect();
                Some(parts.join("/"))
            })
            .collect()
    }

    fn read_entry(&self, name: &str) -> Result<Vec<u8>, AuditError> {
        let path = name
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part));
        std::fs::read(&path).map_err(|e| AuditError::ArtifactUnreadable {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

/// Open a report path: a directory is read in place, anything else as an archive.
pub fn open_report(path: &Path) -> Result<Box<dyn ArtifactSource>, AuditError> {
    if path.is_dir() {
        Ok(Box::new(DirArtifactSource::new(path)))
    } else {
        Ok(Box::new(ZipArtifactSource::from_path(path)?))
    }
}

/// `.json` entries whose name contains none of the skip substrings.
pub fn scannable_entries(source: &dyn ArtifactSource, config: &AuditConfig) -> Vec<String> {
    let skip: Vec<String> = config
        .artifact_skip_substrings
        .iter()
        .map(|s| s.to_lowercase())
        .collect();
    source
        .list_entries()
        .into_iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            lower.ends_with(".json") && !skip.iter().any(|s| lower.contains(s.as_str()))
        })
        .collect()
}

/// Decode an entry: BOM-marked encodings first, then BOM-less UTF-16LE, then strict UTF-8.
pub fn decode_entry(bytes: &[u8]) -> Result<String, String> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        if had_errors {
            return Err(format!("invalid {} data", encoding.name()));
        }
        return Ok(text.into_owned());
    }

    if bytes.len() >= 2 && bytes[0] != 0 && bytes[1] == 0 {
        let (text, had_errors) = UTF_16LE.decode_without_bom_handling(bytes);
        if !had_errors {
            return Ok(text.into_owned());
        }
    }

    String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())
}
