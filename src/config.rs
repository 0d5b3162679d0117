use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file picked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/bugreport.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    #[serde(default = "default_template_file")]
    pub template_file: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            template_file: default_template_file(),
            output_dir: default_output_dir(),
            state_file: default_state_file(),
        }
    }
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data/responses.xlsx")
}
fn default_template_file() -> PathBuf {
    PathBuf::from("templates/questionnaire_template.docx")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_state_file() -> PathBuf {
    PathBuf::from("data/state.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    /// Field delimiter for `.csv`/`.txt` sources. `.tsv` always uses a tab.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Rows per batch when a delimited source is read lazily.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
            name_column: default_name_column(),
            delimiter: default_delimiter(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_id_column() -> String {
    "BugReportID".to_string()
}
fn default_name_column() -> String {
    "Name".to_string()
}
fn default_delimiter() -> String {
    ",".to_string()
}
fn default_chunk_size() -> usize {
    100_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub run_on_start: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            run_on_start: false,
        }
    }
}

fn default_debounce_ms() -> u64 {
    3_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_file_prefix() -> String {
    "BugReport".to_string()
}

impl DatasetConfig {
    /// The delimiter as a single byte, accepting `\t` spelled out.
    pub fn delimiter_byte(&self) -> u8 {
        if self.delimiter == "\\t" {
            b'\t'
        } else {
            self.delimiter.as_bytes().first().copied().unwrap_or(b',')
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

/// Resolve the configuration for the CLI.
///
/// An explicit path must exist. Without one, [`DEFAULT_CONFIG_PATH`] is used
/// when present and the built-in defaults otherwise.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_PATH);
            if fallback.exists() {
                load_config(fallback)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.dataset.chunk_size == 0 {
        anyhow::bail!("dataset.chunk_size must be > 0");
    }
    if config.dataset.id_column.trim().is_empty() {
        anyhow::bail!("dataset.id_column must not be empty");
    }
    if config.dataset.name_column.trim().is_empty() {
        anyhow::bail!("dataset.name_column must not be empty");
    }
    if config.dataset.delimiter != "\\t" && config.dataset.delimiter.len() != 1 {
        anyhow::bail!(
            "dataset.delimiter must be a single ASCII character or \\t, got '{}'",
            config.dataset.delimiter
        );
    }
    if config.watch.debounce_ms == 0 {
        anyhow::bail!("watch.debounce_ms must be > 0");
    }
    if config.output.file_prefix.is_empty() {
        anyhow::bail!("output.file_prefix must not be empty");
    }
    Ok(())
}
