use anyhow::{Context, Result};
use ragvault_core::chunk::ChunkParams;
use ragvault_core::ivf::IvfParams;
use ragvault_core::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub engine: EngineSection,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSection {
    pub dims: usize,
    #[serde(default = "default_fetch_batch")]
    pub fetch_batch: usize,
}

fn default_fetch_batch() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default)]
    pub lists: Option<usize>,
    #[serde(default = "default_probes")]
    pub probes: usize,
    #[serde(default = "default_max_lists")]
    pub max_lists: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_min_train_size")]
    pub min_train_size: usize,
    #[serde(default = "default_rebuild_growth_factor")]
    pub rebuild_growth_factor: f64,
    #[serde(default = "default_auto_rebuild")]
    pub auto_rebuild: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            lists: None,
            probes: default_probes(),
            max_lists: default_max_lists(),
            max_iterations: default_max_iterations(),
            sample_size: default_sample_size(),
            seed: default_seed(),
            min_train_size: default_min_train_size(),
            rebuild_growth_factor: default_rebuild_growth_factor(),
            auto_rebuild: default_auto_rebuild(),
        }
    }
}

fn default_probes() -> usize {
    4
}
fn default_max_lists() -> usize {
    1024
}
fn default_max_iterations() -> usize {
    25
}
fn default_sample_size() -> usize {
    50_000
}
fn default_seed() -> u64 {
    42
}
fn default_min_train_size() -> usize {
    64
}
fn default_rebuild_growth_factor() -> f64 {
    2.0
}
fn default_auto_rebuild() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_backfill_batch_size")]
    pub backfill_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embed_batch_size: default_embed_batch_size(),
            backfill_batch_size: default_backfill_batch_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    150
}
fn default_embed_batch_size() -> usize {
    64
}
fn default_backfill_batch_size() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Engine settings derived from the `[engine]`, `[index]` and `[ingest]` sections.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            dims: self.engine.dims,
            fetch_batch: self.engine.fetch_batch,
            index: IvfParams {
                lists: self.index.lists,
                max_lists: self.index.max_lists,
                probes: self.index.probes,
                max_iterations: self.index.max_iterations,
                sample_size: self.index.sample_size,
                seed: self.index.seed,
                min_train_size: self.index.min_train_size,
                rebuild_growth_factor: self.index.rebuild_growth_factor,
            },
            chunk: ChunkParams {
                size: self.ingest.chunk_size,
                overlap: self.ingest.chunk_overlap,
            },
            embed_batch_size: self.ingest.embed_batch_size,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.engine.dims == 0 {
        anyhow::bail!("engine.dims must be > 0");
    }
    if config.engine.fetch_batch == 0 {
        anyhow::bail!("engine.fetch_batch must be > 0");
    }

    let index = &config.index;
    if index.probes == 0 {
        anyhow::bail!("index.probes must be >= 1");
    }
    if index.lists == Some(0) {
        anyhow::bail!("index.lists must be >= 1 when set");
    }
    if index.max_lists == 0 {
        anyhow::bail!("index.max_lists must be >= 1");
    }
    if index.max_iterations == 0 {
        anyhow::bail!("index.max_iterations must be >= 1");
    }
    if index.sample_size == 0 {
        anyhow::bail!("index.sample_size must be > 0");
    }
    if index.rebuild_growth_factor.is_nan() || index.rebuild_growth_factor <= 1.0 {
        anyhow::bail!("index.rebuild_growth_factor must be > 1.0");
    }

    let ingest = &config.ingest;
    if ingest.chunk_size == 0 {
        anyhow::bail!("ingest.chunk_size must be > 0");
    }
    if ingest.chunk_overlap >= ingest.chunk_size {
        anyhow::bail!(
            "ingest.chunk_overlap ({}) must be less than ingest.chunk_size ({})",
            ingest.chunk_overlap,
            ingest.chunk_size
        );
    }
    if ingest.embed_batch_size == 0 {
        anyhow::bail!("ingest.embed_batch_size must be > 0");
    }
    if ingest.backfill_batch_size == 0 {
        anyhow::bail!("ingest.backfill_batch_size must be > 0");
    }

    Ok(())
}
