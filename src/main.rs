use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use schema_split::CuratorConfig;

#[derive(Parser, Debug)]
#[command(name = "schema-split")]
#[command(about = "Groups near-duplicate JSON schemas and writes leakage-free train/validation/test splits")]
struct Args {
    /// JSON config file; when given, the other options are ignored
    #[arg(long)]
    config: Option<String>,

    /// Normalized edit distance under which schemas are grouped (0 disables)
    #[arg(long, default_value = "0")]
    similarity: f64,

    /// Random seed for the split
    #[arg(long, default_value = "38")]
    seed: u64,

    /// Fraction of schemas that go to the training split
    #[arg(long, default_value = "0.8")]
    split: f64,

    /// Directory of validated schemas (<owner>/<repo>/<commit>/<path>)
    #[arg(long, default_value = "valid_data")]
    input_dir: PathBuf,

    /// Directory for train/validation/test shards
    #[arg(long, default_value = "data")]
    output_dir: PathBuf,

    #[arg(long, default_value = "commits.json")]
    commits_file: PathBuf,

    #[arg(long, default_value = "licenses.json")]
    licenses_file: PathBuf,

    #[arg(long, default_value = "languages.json")]
    languages_file: PathBuf,

    /// JSON list of SPDX ids to keep
    #[arg(long)]
    permissive_licenses: Option<PathBuf>,

    /// Where to write the run report
    #[arg(long)]
    diagnostics_file: Option<PathBuf>,

    /// Number of emission workers
    #[arg(long, default_value_t = num_cpus::get())]
    processes: usize,
}

impl Args {
    fn into_config(self) -> Result<CuratorConfig> {
        if let Some(path) = &self.config {
            return CuratorConfig::read_from_file(path)
                .with_context(|| format!("Failed to read config {}", path));
        }
        Ok(CuratorConfig {
            input_dir: self.input_dir,
            output_dir: self.output_dir,
            commits_file: self.commits_file,
            licenses_file: self.licenses_file,
            languages_file: self.languages_file,
            permissive_licenses_file: self.permissive_licenses,
            diagnostics_file: self.diagnostics_file,
            similarity: self.similarity,
            seed: self.seed,
            train_fraction: self.split,
            processes: self.processes,
        })
    }
}

fn main() -> Result<()> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "schema_split=info");
    }
    env_logger::init();

    let config = Args::parse().into_config()?;
    let report = schema_split::run(config)?;
    log::info!("{}", serde_json::to_string(&report)?);
    Ok(())
}
