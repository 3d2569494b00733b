use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub budgets: BudgetConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Where the store file lives.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/mnemo.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Root of the index subdirectories (`chunks/` and `items/`).
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_true")]
    pub enable_semantic: bool,
    #[serde(default = "default_true")]
    pub enable_keyword: bool,
    #[serde(default)]
    pub result_grouping: bool,
    #[serde(default)]
    pub highlight_matches: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_relevance: default_min_relevance(),
            max_results: default_max_results(),
            enable_semantic: true,
            enable_keyword: true,
            result_grouping: false,
            highlight_matches: false,
        }
    }
}

fn default_min_relevance() -> f64 {
    0.1
}
fn default_max_results() -> usize {
    50
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            overlap_ratio: default_overlap_ratio(),
        }
    }
}

fn default_min_chunk_size() -> usize {
    100
}
fn default_max_chunk_size() -> usize {
    1500
}
fn default_overlap_ratio() -> f64 {
    0.2
}

/// Result-size budgets. Defaults match the constants in [`crate::search`];
/// overriding them here tightens or loosens what a single search may return.
#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    #[serde(default = "default_max_chunk_content_size")]
    pub max_chunk_content_size: usize,
    #[serde(default = "default_max_matched_chunks")]
    pub max_matched_chunks: usize,
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,
    #[serde(default = "default_max_result_content_size")]
    pub max_result_content_size: usize,
    #[serde(default = "default_max_total_content_size")]
    pub max_total_content_size: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_chunk_content_size: default_max_chunk_content_size(),
            max_matched_chunks: default_max_matched_chunks(),
            max_context_chunks: default_max_context_chunks(),
            max_result_content_size: default_max_result_content_size(),
            max_total_content_size: default_max_total_content_size(),
        }
    }
}

fn default_max_chunk_content_size() -> usize {
    crate::search::MAX_CHUNK_CONTENT_SIZE
}
fn default_max_matched_chunks() -> usize {
    crate::search::MAX_MATCHED_CHUNKS
}
fn default_max_context_chunks() -> usize {
    crate::search::MAX_CONTEXT_CHUNKS
}
fn default_max_result_content_size() -> usize {
    crate::search::MAX_RESULT_CONTENT_SIZE
}
fn default_max_total_content_size() -> usize {
    crate::search::MAX_TOTAL_CONTENT_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

/// Load the config file at `path`, or fall back to defaults when the file
/// does not exist (so `mnemo init` works out of the box).
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chunk_size == 0 {
        anyhow::bail!("chunking.max_chunk_size must be > 0");
    }
    if config.chunking.min_chunk_size > config.chunking.max_chunk_size {
        anyhow::bail!("chunking.min_chunk_size must not exceed chunking.max_chunk_size");
    }
    if !(0.0..1.0).contains(&config.chunking.overlap_ratio) {
        anyhow::bail!("chunking.overlap_ratio must be in [0.0, 1.0)");
    }
    if config.search.max_results == 0 {
        anyhow::bail!("search.max_results must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.search.min_relevance) {
        anyhow::bail!("search.min_relevance must be in [0.0, 1.0]");
    }
    if config.budgets.max_chunk_content_size == 0 || config.budgets.max_total_content_size == 0 {
        anyhow::bail!("budget sizes must be > 0");
    }
    Ok(())
}
