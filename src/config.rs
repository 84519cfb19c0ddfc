// ABOUTME: TOML configuration for source, target, loader and sample runs
// ABOUTME: Validated once at startup and resolved into per-mode run settings

use crate::error::{LoaderError, Result};
use crate::filters::NameFilter;
use crate::loader::LoadMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides `source.password`.
pub const PASSWORD_ENV: &str = "LOADER_SOURCE_PASSWORD";

/// Only source driver this loader speaks.
pub const ORACLE_DRIVER: &str = "oracle";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub loader: LoaderSettings,
    #[serde(default)]
    pub sample: SampleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Easy Connect string, e.g. `//db.example.com:1521/ORCLPDB1`
    pub connect_string: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Owner whose objects are copied
    pub schema: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// DuckDB file, or `:memory:`
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub enabled: bool,
    pub threads: usize,
    pub batch_size: usize,
    /// Total attempts per table, including the first
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Comma-separated glob patterns
    pub blacklist: String,
    pub job_label: Option<String>,
    pub schedule_interval_secs: u64,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threads: 4,
            batch_size: 1000,
            max_retries: 3,
            retry_backoff_ms: 1000,
            blacklist: String::new(),
            job_label: None,
            schedule_interval_secs: 3600,
        }
    }
}

/// Sample-mode overrides; unset fields fall back to `[loader]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleSettings {
    pub path: Option<String>,
    pub row_limit: i64,
    pub threads: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub blacklist: Option<String>,
    pub job_label: Option<String>,
}

impl Default for SampleSettings {
    fn default() -> Self {
        Self {
            path: None,
            row_limit: crate::loader::DEFAULT_SAMPLE_ROWS as i64,
            threads: None,
            batch_size: None,
            max_retries: None,
            blacklist: None,
            job_label: None,
        }
    }
}

/// Everything one run of the engine needs, resolved for one mode.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub schema: String,
    pub mode: LoadMode,
    pub threads: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub blacklist: NameFilter,
    pub job_label: String,
}

impl RunSettings {
    /// Settings with defaults, mostly for embedding and tests.
    pub fn new(schema: &str, mode: LoadMode) -> Self {
        let loader = LoaderSettings::default();
        Self {
            schema: schema.to_string(),
            job_label: mode.default_job_label().to_string(),
            mode,
            threads: loader.threads,
            batch_size: loader.batch_size,
            max_retries: loader.max_retries,
            retry_backoff: Duration::from_millis(loader.retry_backoff_ms),
            blacklist: NameFilter::empty(),
        }
    }
}

fn default_driver() -> String {
    ORACLE_DRIVER.to_string()
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&contents)?;
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.source.password = Some(password);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating or reading the environment.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| LoaderError::config(format!("Invalid config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        require("source.schema", &self.source.schema)?;
        require("source.connect_string", &self.source.connect_string)?;
        require("source.username", &self.source.username)?;
        require("target.path", &self.target.path)?;

        if !self.source.driver.eq_ignore_ascii_case(ORACLE_DRIVER) {
            return Err(LoaderError::config(format!(
                "Unsupported source driver '{}' (only '{}' is supported)",
                self.source.driver, ORACLE_DRIVER
            )));
        }

        let threads = [Some(self.loader.threads), self.sample.threads];
        if threads.iter().flatten().any(|t| *t == 0) {
            return Err(LoaderError::config("threads must be at least 1"));
        }
        let batch_sizes = [Some(self.loader.batch_size), self.sample.batch_size];
        if batch_sizes.iter().flatten().any(|b| *b == 0) {
            return Err(LoaderError::config("batch_size must be at least 1"));
        }
        let retries = [Some(self.loader.max_retries), self.sample.max_retries];
        if retries.iter().flatten().any(|r| *r == 0) {
            return Err(LoaderError::config("max_retries must be at least 1"));
        }
        Ok(())
    }

    /// Settings for a full refresh into `target.path`.
    pub fn full_run(&self) -> RunSettings {
        let mode = LoadMode::Full;
        RunSettings {
            schema: self.source.schema.trim().to_string(),
            job_label: self
                .loader
                .job_label
                .clone()
                .unwrap_or_else(|| mode.default_job_label().to_string()),
            mode,
            threads: self.loader.threads,
            batch_size: self.loader.batch_size,
            max_retries: self.loader.max_retries,
            retry_backoff: Duration::from_millis(self.loader.retry_backoff_ms),
            blacklist: NameFilter::new(&self.loader.blacklist),
        }
    }

    /// Settings for a sample refresh. `row_limit` overrides `sample.row_limit`.
    pub fn sample_run(&self, row_limit: Option<i64>) -> RunSettings {
        let mode = LoadMode::sample(row_limit.unwrap_or(self.sample.row_limit));
        RunSettings {
            schema: self.source.schema.trim().to_string(),
            job_label: self
                .sample
                .job_label
                .clone()
                .unwrap_or_else(|| mode.default_job_label().to_string()),
            mode,
            threads: self.sample.threads.unwrap_or(self.loader.threads),
            batch_size: self.sample.batch_size.unwrap_or(self.loader.batch_size),
            max_retries: self.sample.max_retries.unwrap_or(self.loader.max_retries),
            retry_backoff: Duration::from_millis(self.loader.retry_backoff_ms),
            blacklist: NameFilter::new(
                self.sample
                    .blacklist
                    .as_deref()
                    .unwrap_or(&self.loader.blacklist),
            ),
        }
    }

    /// Sample database path; defaults to `<target stem>-sample.<ext>` next to
    /// the main target.
    pub fn sample_path(&self) -> String {
        if let Some(path) = &self.sample.path {
            return path.clone();
        }
        if self.target.path == crate::target::IN_MEMORY {
            return self.target.path.clone();
        }
        let target = Path::new(&self.target.path);
        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "target".to_string());
        let file = match target.extension() {
            Some(ext) => format!("{}-sample.{}", stem, ext.to_string_lossy()),
            None => format!("{}-sample", stem),
        };
        target.with_file_name(file).to_string_lossy().to_string()
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LoaderError::config(format!("{} must not be empty", field)));
    }
    Ok(())
}
