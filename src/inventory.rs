use std::path::{Component, Path, PathBuf};

use ahash::AHashSet;
use anyhow::{bail, Context, Result};
use glob::{glob, Pattern};
use rayon::prelude::*;
use serde::Serialize;

use crate::metadata::LicenseTable;

// A validated schema file from the inventory.
// The id is its path below the inventory root: <owner>/<repo>/<commit>/<path in repo>.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaRecord {
    pub id: String,
    pub organization: String,
    pub repository: String,
    pub commit: String,
    pub path: String,
    pub content: String,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct InventoryStats {
    pub discovered: usize,
    pub loaded: usize,
    pub malformed_path: usize,
    pub unreadable: usize,
    pub license_rejected: usize,
}

// Identifier fields derived from a path relative to the inventory root.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordKey {
    pub id: String,
    pub repository: String,
    pub commit: String,
    pub path: String,
}

impl RecordKey {
    // Needs at least owner, repo, commit and a file name.
    pub fn from_relative_path(relative: &Path) -> Option<RecordKey> {
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                _ => return None,
            }
        }
        if parts.len() < 4 {
            return None;
        }
        Some(RecordKey {
            id: parts.join("/"),
            repository: format!("{}/{}", parts[0], parts[1]),
            commit: parts[2].to_owned(),
            path: parts[3..].join("/"),
        })
    }
}

impl SchemaRecord {
    pub fn new(key: RecordKey, content: String) -> Self {
        SchemaRecord {
            id: key.id,
            organization: key.repository.clone(),
            repository: key.repository,
            commit: key.commit,
            path: key.path,
            content,
        }
    }
}

pub fn find_schema_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Inventory directory {} does not exist", root.display());
    }
    let pattern = format!("{}/**/*.json", Pattern::escape(&root.to_string_lossy()));
    let mut files = Vec::new();
    for entry in glob(&pattern).with_context(|| format!("Invalid file pattern: {}", pattern))? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => log::warn!("Skipping unreadable inventory entry: {}", e),
        }
    }
    Ok(files)
}

enum Loaded {
    Record(SchemaRecord),
    MalformedPath,
    Unreadable,
    LicenseRejected,
}

// Read every schema file below `root` in parallel.
// When `permissive` is given, only files whose repository license is in it are kept.
// Per-file problems are logged and counted, never fatal. Output order follows the
// sorted file listing, so repeated runs see records in the same order.
pub fn load_inventory(
    root: &Path,
    licenses: &LicenseTable,
    permissive: Option<&AHashSet<String>>,
) -> Result<(Vec<SchemaRecord>, InventoryStats)> {
    let files = find_schema_files(root)?;
    log::info!("Found {} schema files under {}", files.len(), root.display());

    let loaded: Vec<Loaded> = files
        .par_iter()
        .map(|file| {
            let key = match file
                .strip_prefix(root)
                .ok()
                .and_then(RecordKey::from_relative_path)
            {
                Some(key) => key,
                None => {
                    log::warn!("Skipping {}: not <owner>/<repo>/<commit>/<path>", file.display());
                    return Loaded::MalformedPath;
                }
            };
            if let Some(allowed) = permissive {
                match licenses.license(&key.repository) {
                    Some(license) if allowed.contains(license) => {}
                    _ => return Loaded::LicenseRejected,
                }
            }
            match std::fs::read_to_string(file) {
                Ok(content) => Loaded::Record(SchemaRecord::new(key, content)),
                Err(e) => {
                    log::warn!("Skipping {}: {}", file.display(), e);
                    Loaded::Unreadable
                }
            }
        })
        .collect();

    let mut stats = InventoryStats {
        discovered: files.len(),
        ..Default::default()
    };
    let mut records = Vec::with_capacity(loaded.len());
    for item in loaded {
        match item {
            Loaded::Record(record) => records.push(record),
            Loaded::MalformedPath => stats.malformed_path += 1,
            Loaded::Unreadable => stats.unreadable += 1,
            Loaded::LicenseRejected => stats.license_rejected += 1,
        }
    }
    stats.loaded = records.len();
    log::info!(
        "Loaded {} schemas ({} malformed paths, {} unreadable, {} rejected by license)",
        stats.loaded,
        stats.malformed_path,
        stats.unreadable,
        stats.license_rejected
    );
    Ok((records, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn record_key_from_path() {
        let key = RecordKey::from_relative_path(Path::new("acme/widgets/abc123/schemas/a.json"))
            .unwrap();
        assert_eq!(key.id, "acme/widgets/abc123/schemas/a.json");
        assert_eq!(key.repository, "acme/widgets");
        assert_eq!(key.commit, "abc123");
        assert_eq!(key.path, "schemas/a.json");

        assert!(RecordKey::from_relative_path(Path::new("acme/widgets/a.json")).is_none());
        assert!(RecordKey::from_relative_path(Path::new("../widgets/abc/a.json")).is_none());
    }

    #[test]
    fn loads_records_and_skips_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "acme/widgets/abc/b.json", b"{\"b\": 1}");
        write(root, "acme/widgets/abc/a.json", b"{\"a\": 1}");
        write(root, "acme/shallow.json", b"{}");
        write(root, "zeta/tools/def/bad.json", &[0xff, 0xfe, 0x00]);
        write(root, "zeta/tools/def/notes.txt", b"ignored");

        let licenses = LicenseTable::default();
        let (records, stats) = load_inventory(root, &licenses, None).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["acme/widgets/abc/a.json", "acme/widgets/abc/b.json"]);
        assert_eq!(records[0].organization, "acme/widgets");
        assert_eq!(records[0].content, "{\"a\": 1}");
        assert_eq!(stats.discovered, 4);
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.malformed_path, 1);
        assert_eq!(stats.unreadable, 1);
    }

    #[test]
    fn filters_by_permissive_license() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "acme/widgets/abc/a.json", b"{}");
        write(root, "beta/closed/abc/a.json", b"{}");
        write(root, "gamma/unknown/abc/a.json", b"{}");

        let licenses = LicenseTable::from_entries(vec![
            ("acme/widgets".to_string(), Some("MIT".to_string())),
            ("beta/closed".to_string(), Some("GPL-3.0".to_string())),
        ]);
        let permissive: AHashSet<String> = ["MIT".to_string()].into_iter().collect();
        let (records, stats) = load_inventory(root, &licenses, Some(&permissive)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].repository, "acme/widgets");
        assert_eq!(stats.license_rejected, 2);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let licenses = LicenseTable::default();
        assert!(load_inventory(&dir.path().join("nope"), &licenses, None).is_err());
    }
}
