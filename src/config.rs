//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/pulse.sqlite"
//!
//! [pipeline]
//! workers = 2
//! queue_capacity = 32
//!
//! [[sources]]
//! type = "rss-feed"
//! url = "https://blog.rust-lang.org/feed.xml"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::source_type::SourceType;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Number of ingestion workers draining the activity queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the bounded activity and error queues.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Re-stream every source on this cadence; unset streams each source once.
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            refresh_interval_secs: None,
        }
    }
}

fn default_workers() -> usize {
    1
}
fn default_queue_capacity() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default = "default_summarizer_provider")]
    pub provider: String,
    #[serde(default = "default_summarizer_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: default_summarizer_provider(),
            model: default_summarizer_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_summarizer_provider() -> String {
    "excerpt".to_string()
}
fn default_summarizer_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_limit() -> usize {
    20
}
fn default_max_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// `"pretty"` (default) or `"json"`.
    #[serde(default)]
    pub format: Option<String>,
}

/// One `[[sources]]` table: a type tag plus the adapter's own settings.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceEntry {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(flatten)]
    pub settings: toml::Table,
}

impl SourceEntry {
    /// The adapter settings as the generic structured form sources deserialize from.
    pub fn settings_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.settings)
            .with_context(|| format!("Failed to convert settings for '{}' source", self.source_type))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.pipeline.workers == 0 {
        anyhow::bail!("pipeline.workers must be >= 1");
    }
    if config.pipeline.queue_capacity == 0 {
        anyhow::bail!("pipeline.queue_capacity must be >= 1");
    }
    if config.pipeline.refresh_interval_secs == Some(0) {
        anyhow::bail!("pipeline.refresh_interval_secs must be > 0 when set");
    }

    if config.search.max_limit == 0 {
        anyhow::bail!("search.max_limit must be >= 1");
    }
    if config.search.default_limit == 0 || config.search.default_limit > config.search.max_limit {
        anyhow::bail!("search.default_limit must be in [1, search.max_limit]");
    }

    match config.summarizer.provider.as_str() {
        "excerpt" | "openai" => {}
        other => anyhow::bail!(
            "Unknown summarizer provider: '{}'. Must be excerpt or openai.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    for entry in &config.sources {
        entry
            .source_type
            .parse::<SourceType>()
            .with_context(|| "Invalid [[sources]] entry")?;
    }

    match config.logging.format.as_deref() {
        None | Some("pretty") | Some("json") => {}
        Some(other) => anyhow::bail!("Unknown logging.format: '{}'. Must be pretty or json.", other),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/pulse.sqlite"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.pipeline.workers, 1);
        assert_eq!(config.pipeline.queue_capacity, 32);
        assert_eq!(config.pipeline.refresh_interval_secs, None);
        assert_eq!(config.summarizer.provider, "excerpt");
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.search.default_limit, 20);
        assert_eq!(config.search.max_limit, 100);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_sources_keep_adapter_settings() {
        let config = parse_config(
            r#"
[db]
path = "pulse.sqlite"

[[sources]]
type = "github-releases"
repositories = ["rust-lang/rust", "tokio-rs/tokio"]
include_prereleases = true
"#,
        )
        .unwrap();

        assert_eq!(config.sources.len(), 1);
        let settings = config.sources[0].settings_json().unwrap();
        assert_eq!(settings["repositories"][1], "tokio-rs/tokio");
        assert_eq!(settings["include_prereleases"], true);
        assert!(settings.get("type").is_none());
    }

    #[test]
    fn test_unknown_source_type_rejected() {
        let err = parse_config(
            r#"
[db]
path = "pulse.sqlite"

[[sources]]
type = "myspace"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("unknown source type"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = parse_config(
            r#"
[db]
path = "pulse.sqlite"

[pipeline]
workers = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("pipeline.workers"));
    }

    #[test]
    fn test_enabled_embedding_requires_dims_and_model() {
        let err = parse_config(
            r#"
[db]
path = "pulse.sqlite"

[embedding]
provider = "openai"
model = "text-embedding-3-large"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }
}
