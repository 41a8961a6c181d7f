//! `cfgtree.toml` configuration with `CFGTREE_*` environment overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use cfgtree_core::{BuildOptions, CacheConfig, MergePolicy, ValidatorOptions, DEFAULT_CAPACITY};
use cfgtree_parser::{ParseOptions, DEFAULT_MAX_DEPTH};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "CFGTREE_";

/// Default file size limit: larger files are skipped.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100_000_000;

/// Scanning, parsing and validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Worker threads; `None` uses the available parallelism.
    pub workers: Option<usize>,
    /// File extensions to parse, without the dot.
    pub extensions: Vec<String>,
    pub max_file_size: u64,
    pub max_depth: usize,
    pub strict: bool,
    pub section_prefixes: Vec<String>,
    pub merge_policy: MergePolicy,
    pub suggestion_distance: usize,
    /// Stop dispatching new sources after this many seconds.
    pub deadline_secs: Option<u64>,
    /// Root folder for the directory provider.
    pub source_root: Option<PathBuf>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            extensions: ["cpp", "hpp", "h", "inc"].iter().map(|s| s.to_string()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
            strict: false,
            section_prefixes: vec!["Cfg".to_string()],
            merge_policy: MergePolicy::LatestWins,
            suggestion_distance: 3,
            deadline_secs: None,
            source_root: None,
        }
    }
}

/// In-memory cache limits and the optional on-disk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
    pub max_age_secs: u64,
    /// Directory for persisted hierarchies; `None` keeps everything in memory.
    pub dir: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_age_secs: 3600,
            dir: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CfgtreeConfig {
    pub scanner: ScannerConfig,
    pub cache: CacheSettings,
}

impl CfgtreeConfig {
    /// Reads a TOML file, loads `.env` if present, applies `CFGTREE_*`
    /// overrides and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config = Self::parse(&content)?;
        load_dotenv();
        config.apply_vars(std::env::vars())?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        load_dotenv();
        config.apply_vars(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates TOML text. No environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: CfgtreeConfig = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.scanner.extensions = normalize_extensions(&config.scanner.extensions);
        Ok(config)
    }

    /// Applies `CFGTREE_*` pairs; other names are ignored.
    pub fn apply_vars<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();
            match key {
                "WORKERS" => self.scanner.workers = Some(parse_var(&name, value)?),
                "EXTENSIONS" => self.scanner.extensions = normalize_extensions(&split_list(value)),
                "MAX_FILE_SIZE" => self.scanner.max_file_size = parse_var(&name, value)?,
                "MAX_DEPTH" => self.scanner.max_depth = parse_var(&name, value)?,
                "STRICT" => self.scanner.strict = parse_bool(&name, value)?,
                "SECTION_PREFIXES" => self.scanner.section_prefixes = split_list(value),
                "MERGE_POLICY" => {
                    self.scanner.merge_policy = value
                        .parse()
                        .map_err(|e: String| ConfigError::Invalid(format!("{name}: {e}")))?
                }
                "SUGGESTION_DISTANCE" => self.scanner.suggestion_distance = parse_var(&name, value)?,
                "DEADLINE_SECS" => self.scanner.deadline_secs = Some(parse_var(&name, value)?),
                "SOURCE_ROOT" => self.scanner.source_root = Some(PathBuf::from(value)),
                "CACHE_CAPACITY" => self.cache.capacity = parse_var(&name, value)?,
                "CACHE_MAX_AGE_SECS" => self.cache.max_age_secs = parse_var(&name, value)?,
                "CACHE_DIR" => self.cache.dir = Some(PathBuf::from(value)),
                _ => debug!("Ignoring unknown override {}", name),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.workers == Some(0) {
            return Err(ConfigError::OutOfRange("scanner.workers must be at least 1".into()));
        }
        if self.scanner.extensions.is_empty() {
            return Err(ConfigError::Invalid("scanner.extensions must not be empty".into()));
        }
        if self.scanner.max_file_size == 0 {
            return Err(ConfigError::OutOfRange("scanner.max_file_size must be positive".into()));
        }
        if self.scanner.max_depth == 0 {
            return Err(ConfigError::OutOfRange("scanner.max_depth must be at least 1".into()));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::OutOfRange("cache.capacity must be at least 1".into()));
        }
        if self.cache.max_age_secs == 0 {
            return Err(ConfigError::OutOfRange("cache.max_age_secs must be positive".into()));
        }
        Ok(())
    }

    /// Configured workers, or the available parallelism.
    pub fn worker_count(&self) -> usize {
        self.scanner.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            max_depth: self.scanner.max_depth,
        }
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            merge_policy: self.scanner.merge_policy,
            section_prefixes: self.scanner.section_prefixes.clone(),
        }
    }

    pub fn validator_options(&self) -> ValidatorOptions {
        ValidatorOptions {
            strict: self.scanner.strict,
            suggestion_distance: self.scanner.suggestion_distance,
            ..Default::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache.capacity,
            max_age: Duration::from_secs(self.cache.max_age_secs),
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.scanner.deadline_secs.map(Duration::from_secs)
    }

    /// Whether a file with this path should be parsed.
    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.scanner.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
    }
}

fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => debug!("Ignoring unreadable .env: {}", e),
    }
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name}: cannot parse '{value}'")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{name}: expected a boolean, got '{value}'"))),
    }
}
