use std::io::BufRead;
use std::path::Path;

use ahash::AHashMap;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::open_lines;

// Repository-level tables are line-delimited JSON objects, one per repository.
// Lines that fail to parse are skipped with a warning; a missing file is fatal.
fn read_repository_table(path: &Path, key: &str) -> Result<AHashMap<String, Option<String>>> {
    let reader =
        open_lines(path).with_context(|| format!("Failed to open table {}", path.display()))?;
    let mut table = AHashMap::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let data: Value = match serde_json::from_str(&line) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Skipping line {} of {}: {}", line_number + 1, path.display(), e);
                continue;
            }
        };
        let repository = match data["repository"].as_str() {
            Some(repository) => repository.to_owned(),
            None => {
                log::warn!(
                    "Skipping line {} of {}: no repository",
                    line_number + 1,
                    path.display()
                );
                continue;
            }
        };
        table.insert(repository, data[key].as_str().map(|s| s.to_owned()));
    }
    Ok(table)
}

// repository -> SPDX license id, or None when the repository has no detected license.
#[derive(Default)]
pub struct LicenseTable {
    licenses: AHashMap<String, Option<String>>,
}

impl LicenseTable {
    pub fn read_from_file(path: &Path) -> Result<LicenseTable> {
        let licenses = read_repository_table(path, "license")?;
        log::info!("Read licenses for {} repositories", licenses.len());
        Ok(LicenseTable { licenses })
    }

    pub fn from_entries(entries: Vec<(String, Option<String>)>) -> LicenseTable {
        LicenseTable {
            licenses: entries.into_iter().collect(),
        }
    }

    pub fn license(&self, repository: &str) -> Option<&str> {
        self.licenses.get(repository).and_then(|l| l.as_deref())
    }
}

// repository -> dominant natural language of its schema descriptions.
#[derive(Default)]
pub struct LanguageTable {
    languages: AHashMap<String, Option<String>>,
}

impl LanguageTable {
    pub fn read_from_file(path: &Path) -> Result<LanguageTable> {
        let languages = read_repository_table(path, "language")?;
        log::info!("Read languages for {} repositories", languages.len());
        Ok(LanguageTable { languages })
    }

    pub fn from_entries(entries: Vec<(String, Option<String>)>) -> LanguageTable {
        LanguageTable {
            languages: entries.into_iter().collect(),
        }
    }

    pub fn language(&self, repository: &str) -> Option<&str> {
        self.languages.get(repository).and_then(|l| l.as_deref())
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct Commit {
    pub sha: String,
    pub date: String,
}

// One line of the commit history table: the commits that touched `path`.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommitHistoryEntry {
    pub repository: String,
    pub path: String,
    #[serde(default)]
    pub repo_stars: Value,
    #[serde(default)]
    pub repo_last_fetched: Option<String>,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

// Star counts arrive as integers, numeric strings, empty strings or garbage.
// Integers are kept as given, sign included; anything else is unknown, never zero.
pub fn parse_stars(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JoinKey {
    pub repository: String,
    pub commit: String,
    pub path: String,
}

impl JoinKey {
    pub fn new(repository: &str, commit: &str, path: &str) -> Self {
        JoinKey {
            repository: repository.to_owned(),
            commit: commit.to_owned(),
            path: path.to_owned(),
        }
    }
}

// Everything attached to a schema besides its content.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEnvelope {
    pub repository: String,
    pub commit: String,
    pub commit_date: String,
    pub path: String,
    pub repo_stars: Option<i64>,
    pub repo_last_fetched: Option<String>,
    pub license: Option<String>,
    pub language: Option<String>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct MetadataStats {
    pub history_entries: usize,
    pub join_rows: usize,
    pub duplicate_keys: usize,
    pub malformed_lines: usize,
    pub unknown_stars: usize,
}

// Join index keyed by (repository, commit, path). The first row for a key wins.
#[derive(Default)]
pub struct MetadataIndex {
    rows: AHashMap<JoinKey, MetadataEnvelope>,
    stats: MetadataStats,
}

impl MetadataIndex {
    pub fn build<I>(entries: I, licenses: &LicenseTable, languages: &LanguageTable) -> Self
    where
        I: IntoIterator<Item = CommitHistoryEntry>,
    {
        let mut index = MetadataIndex::default();
        for entry in entries {
            index.add_entry(entry, licenses, languages);
        }
        index
    }

    pub fn read_from_file(
        path: &Path,
        licenses: &LicenseTable,
        languages: &LanguageTable,
    ) -> Result<Self> {
        let reader = open_lines(path)
            .with_context(|| format!("Failed to open commit history {}", path.display()))?;
        let mut index = MetadataIndex::default();
        for (line_number, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CommitHistoryEntry>(&line) {
                Ok(entry) => index.add_entry(entry, licenses, languages),
                Err(e) => {
                    log::warn!("Skipping line {} of {}: {}", line_number + 1, path.display(), e);
                    index.stats.malformed_lines += 1;
                }
            }
        }
        log::info!(
            "Built metadata index with {} rows from {} history entries ({} duplicate keys, {} unknown star counts)",
            index.stats.join_rows,
            index.stats.history_entries,
            index.stats.duplicate_keys,
            index.stats.unknown_stars
        );
        Ok(index)
    }

    fn add_entry(
        &mut self,
        entry: CommitHistoryEntry,
        licenses: &LicenseTable,
        languages: &LanguageTable,
    ) {
        self.stats.history_entries += 1;
        let repo_stars = parse_stars(&entry.repo_stars);
        if repo_stars.is_none() {
            self.stats.unknown_stars += 1;
        }
        let license = licenses.license(&entry.repository).map(|s| s.to_owned());
        let language = languages.language(&entry.repository).map(|s| s.to_owned());
        for commit in entry.commits {
            let key = JoinKey::new(&entry.repository, &commit.sha, &entry.path);
            if self.rows.contains_key(&key) {
                self.stats.duplicate_keys += 1;
                log::debug!(
                    "Duplicate metadata for {}/{}/{}",
                    key.repository,
                    key.commit,
                    key.path
                );
                continue;
            }
            let envelope = MetadataEnvelope {
                repository: entry.repository.clone(),
                commit: commit.sha,
                commit_date: commit.date,
                path: entry.path.clone(),
                repo_stars,
                repo_last_fetched: entry.repo_last_fetched.clone(),
                license: license.clone(),
                language: language.clone(),
            };
            self.rows.insert(key, envelope);
            self.stats.join_rows += 1;
        }
    }

    pub fn lookup(&self, repository: &str, commit: &str, path: &str) -> Option<&MetadataEnvelope> {
        self.rows.get(&JoinKey::new(repository, commit, path))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn stats(&self) -> &MetadataStats {
        &self.stats
    }
}
