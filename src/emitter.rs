use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;

use ahash::AHashMap;
use anyhow::{bail, Result};
use serde::Serialize;
use threadpool::ThreadPool;

use crate::inventory::SchemaRecord;
use crate::io::GzJsonlWriter;
use crate::metadata::MetadataIndex;
use crate::splitter::{Split, SplitAssignment};

// Records by id, shared read-only by the emission workers.
pub struct RecordStore {
    records: Vec<SchemaRecord>,
    by_id: AHashMap<String, usize>,
}

impl RecordStore {
    pub fn new(records: Vec<SchemaRecord>) -> Self {
        let by_id = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        RecordStore { records, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&SchemaRecord> {
        self.by_id.get(id).map(|&i| &self.records[i])
    }
}

// One line of a dataset shard.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRow<'a> {
    pub repository: &'a str,
    pub commit: &'a str,
    pub commit_date: &'a str,
    pub path: &'a str,
    pub repo_stars: Option<i64>,
    pub repo_last_fetched: Option<&'a str>,
    pub content: &'a str,
    pub license: Option<&'a str>,
    pub language: Option<&'a str>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct EmitStats {
    pub written: usize,
    pub dropped: usize,
}

// Join the records of one split against the metadata index and stream them to
// `path` in the order of `ids`. Records with no metadata are dropped and counted.
// The shard appears under `path` only if every record was written.
pub fn emit_split(
    path: &Path,
    ids: &[String],
    store: &RecordStore,
    metadata: &MetadataIndex,
) -> io::Result<EmitStats> {
    let mut writer = GzJsonlWriter::create(path)?;
    let mut stats = EmitStats::default();
    for id in ids {
        let record = match store.get(id) {
            Some(record) => record,
            None => {
                stats.dropped += 1;
                continue;
            }
        };
        let envelope = match metadata.lookup(&record.repository, &record.commit, &record.path) {
            Some(envelope) => envelope,
            None => {
                log::debug!("No metadata for {}", id);
                stats.dropped += 1;
                continue;
            }
        };
        let row = DatasetRow {
            repository: &envelope.repository,
            commit: &envelope.commit,
            commit_date: &envelope.commit_date,
            path: &envelope.path,
            repo_stars: envelope.repo_stars,
            repo_last_fetched: envelope.repo_last_fetched.as_deref(),
            content: &record.content,
            license: envelope.license.as_deref(),
            language: envelope.language.as_deref(),
        };
        writer.write_record(&row)?;
        stats.written += 1;
    }
    writer.finish()?;
    Ok(stats)
}

// Emit the three splits concurrently into `output_dir`.
// Each worker owns its shard writer. All workers run to completion before any
// failure is reported.
pub fn emit_all(
    output_dir: &Path,
    assignment: &SplitAssignment,
    store: Arc<RecordStore>,
    metadata: Arc<MetadataIndex>,
    processes: usize,
) -> Result<Vec<(Split, EmitStats)>> {
    let threadpool = ThreadPool::new(processes.clamp(1, Split::ALL.len()));
    let (tx, rx) = channel();
    for split in Split::ALL {
        let path: PathBuf = output_dir.join(split.file_name());
        let ids = assignment.ids(split).to_vec();
        let store = store.clone();
        let metadata = metadata.clone();
        let tx = tx.clone();
        threadpool.execute(move || {
            log::info!("Writing {} schemas to {}...", ids.len(), path.display());
            let result = emit_split(&path, &ids, &store, &metadata);
            match &result {
                Ok(stats) => log::info!(
                    "Wrote {} schemas to {} ({} dropped without metadata)",
                    stats.written,
                    path.display(),
                    stats.dropped
                ),
                Err(e) => log::error!("Failed to write {}: {}", path.display(), e),
            }
            let _ = tx.send((split, result.map_err(|e| e.to_string())));
        });
    }
    drop(tx);
    threadpool.join();

    let mut results: Vec<(Split, EmitStats)> = Vec::new();
    let mut failures = Vec::new();
    for (split, result) in rx.iter() {
        match result {
            Ok(stats) => results.push((split, stats)),
            Err(e) => failures.push(format!("{}: {}", split, e)),
        }
    }
    if !failures.is_empty() || results.len() != Split::ALL.len() {
        bail!(
            "{} of {} splits failed to write: {}",
            Split::ALL.len() - results.len(),
            Split::ALL.len(),
            failures.join("; ")
        );
    }
    results.sort_by_key(|(split, _)| Split::ALL.iter().position(|s| s == split));
    Ok(results)
}
