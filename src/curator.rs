use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashSet;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::emitter::{emit_all, EmitStats, RecordStore};
use crate::grouper::{build_groups, GroupingStats};
use crate::inventory::{load_inventory, InventoryStats};
use crate::metadata::{LanguageTable, LicenseTable, MetadataIndex, MetadataStats};
use crate::splitter::{split_groups, Split};

use curator_config::*;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SplitReport {
    pub split: Split,
    pub groups: usize,
    pub assigned: usize,
    pub realized_fraction: f64,
    pub written: usize,
    pub dropped: usize,
}

// Diagnostics for a whole run, written to the diagnostics file when one is configured.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RunReport {
    pub seed: u64,
    pub similarity: f64,
    pub train_fraction: f64,
    pub inventory: InventoryStats,
    pub metadata: MetadataStats,
    pub grouping: GroupingStats,
    pub splits: Vec<SplitReport>,
    pub validation_test_skew: f64,
    pub total_dropped: usize,
}

impl RunReport {
    pub fn split(&self, split: Split) -> Option<&SplitReport> {
        self.splits.iter().find(|s| s.split == split)
    }
}

fn read_permissive_licenses(path: &Path) -> Result<AHashSet<String>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open permissive license list {}", path.display()))?;
    let licenses: Vec<String> = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("{} is not a JSON list of license ids", path.display()))?;
    Ok(licenses.into_iter().collect())
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create diagnostics file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)?;
    Ok(())
}

// Build the dataset: inventory, grouping, split, join, emission.
// The configuration is validated before anything is read or written.
pub fn run(config: CuratorConfig) -> Result<RunReport> {
    config.validate()?;
    let start_time = Instant::now();

    // Every table is read before the inventory is walked.
    let licenses = LicenseTable::read_from_file(&config.licenses_file)?;
    let languages = LanguageTable::read_from_file(&config.languages_file)?;
    let permissive = match &config.permissive_licenses_file {
        Some(path) => Some(read_permissive_licenses(path)?),
        None => None,
    };
    let metadata =
        MetadataIndex::read_from_file(&config.commits_file, &licenses, &languages)?;
    let metadata_stats = metadata.stats().clone();

    let (records, inventory_stats) =
        load_inventory(&config.input_dir, &licenses, permissive.as_ref())?;

    log::info!("Grouping {} schemas...", records.len());
    let (groups, grouping_stats) = build_groups(&records, config.similarity);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let assignment = split_groups(&groups, config.train_fraction, &mut rng);
    drop(groups);

    let store = Arc::new(RecordStore::new(records));
    let emitted = emit_all(
        &config.output_dir,
        &assignment,
        store,
        Arc::new(metadata),
        config.processes,
    )?;

    let splits: Vec<SplitReport> = emitted
        .into_iter()
        .map(|(split, EmitStats { written, dropped })| SplitReport {
            split,
            groups: assignment.group_count(split),
            assigned: assignment.item_count(split),
            realized_fraction: assignment.realized_fraction(split),
            written,
            dropped,
        })
        .collect();
    let total_dropped = splits.iter().map(|s| s.dropped).sum();
    if total_dropped > 0 {
        log::warn!("Dropped {} schemas with no commit metadata", total_dropped);
    }

    let report = RunReport {
        seed: config.seed,
        similarity: config.similarity,
        train_fraction: config.train_fraction,
        inventory: inventory_stats,
        metadata: metadata_stats,
        grouping: grouping_stats,
        splits,
        validation_test_skew: assignment.validation_test_skew(),
        total_dropped,
    };
    if let Some(path) = &config.diagnostics_file {
        write_report(path, &report)?;
        log::info!("Wrote diagnostics to {}", path.display());
    }

    log::info!("Done in {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(report)
}

pub mod curator_config {
    use anyhow::{bail, Result};
    use serde::{Deserialize, Serialize};
    use std::fs::File;
    use std::io;
    use std::path::PathBuf;

    fn default_seed() -> u64 {
        38
    }

    fn default_train_fraction() -> f64 {
        0.8
    }

    fn default_processes() -> usize {
        num_cpus::get()
    }

    #[derive(Serialize, Deserialize, Clone, Debug)]
    pub struct CuratorConfig {
        // Directory of validated schemas laid out as <owner>/<repo>/<commit>/<path>
        pub input_dir: PathBuf,
        pub output_dir: PathBuf,
        pub commits_file: PathBuf,
        pub licenses_file: PathBuf,
        pub languages_file: PathBuf,
        // JSON list of SPDX ids; when set, only schemas from these licenses are kept
        #[serde(default)]
        pub permissive_licenses_file: Option<PathBuf>,
        #[serde(default)]
        pub diagnostics_file: Option<PathBuf>,
        // Normalized edit distance for merging near-duplicates; 0 disables it
        #[serde(default)]
        pub similarity: f64,
        #[serde(default = "default_seed")]
        pub seed: u64,
        #[serde(default = "default_train_fraction")]
        pub train_fraction: f64,
        #[serde(default = "default_processes")]
        pub processes: usize,
    }

    impl CuratorConfig {
        pub fn read_from_file(path: &str) -> Result<CuratorConfig, io::Error> {
            let file = File::open(path)?;
            let reader = io::BufReader::new(file);
            let config: CuratorConfig = serde_json::from_reader(reader)?;
            Ok(config)
        }

        pub fn parse_from_string(s: &str) -> Result<CuratorConfig, io::Error> {
            let config: CuratorConfig = serde_json::from_str(s)?;
            Ok(config)
        }

        pub fn validate(&self) -> Result<()> {
            if !self.similarity.is_finite() || self.similarity < 0.0 || self.similarity > 1.0 {
                bail!(
                    "similarity must be between 0 (disabled) and 1, got {}",
                    self.similarity
                );
            }
            if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
                bail!(
                    "train fraction must be strictly between 0 and 1, got {}",
                    self.train_fraction
                );
            }
            if self.processes == 0 {
                bail!("processes must be at least 1");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::curator_config::CuratorConfig;

    fn config(similarity: f64, train_fraction: f64) -> CuratorConfig {
        CuratorConfig::parse_from_string(&format!(
            r#"{{
                "input_dir": "valid_data",
                "output_dir": "data",
                "commits_file": "commits.json",
                "licenses_file": "licenses.json",
                "languages_file": "languages.json",
                "similarity": {},
                "train_fraction": {}
            }}"#,
            similarity, train_fraction
        ))
        .unwrap()
    }

    #[test]
    fn defaults_are_filled_in() {
        let config = config(0.0, 0.8);
        assert_eq!(config.seed, 38);
        assert!(config.processes >= 1);
        assert!(config.permissive_licenses_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_similarity() {
        assert!(config(-0.1, 0.8).validate().is_err());
        assert!(config(1.5, 0.8).validate().is_err());
        assert!(config(1.0, 0.8).validate().is_ok());
    }

    #[test]
    fn rejects_bad_fraction() {
        assert!(config(0.0, 0.0).validate().is_err());
        assert!(config(0.0, 1.0).validate().is_err());
        assert!(config(0.0, -0.5).validate().is_err());
        assert!(config(0.0, 0.5).validate().is_ok());
    }

    #[test]
    fn invalid_config_fails_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(0.3, 2.0);
        config.output_dir = dir.path().join("out");
        let err = super::run(config).unwrap_err();
        assert!(err.to_string().contains("train fraction"));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn missing_commits_file_fails_before_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let table = "{\"repository\": \"acme/widgets\", \"license\": \"MIT\", \"language\": \"en\"}\n";
        std::fs::write(dir.path().join("licenses.json"), table).unwrap();
        std::fs::write(dir.path().join("languages.json"), table).unwrap();

        let mut config = config(0.3, 0.8);
        config.input_dir = dir.path().join("no_such_inventory");
        config.output_dir = dir.path().join("out");
        config.commits_file = dir.path().join("no_such_commits.json");
        config.licenses_file = dir.path().join("licenses.json");
        config.languages_file = dir.path().join("languages.json");

        let err = format!("{:#}", super::run(config).unwrap_err());
        assert!(err.contains("no_such_commits.json"), "{}", err);
        assert!(!err.contains("no_such_inventory"), "{}", err);
        assert!(!dir.path().join("out").exists());
    }
}
