use clap::{ArgGroup, Parser};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const RUN_ID_ENV_VAR: &str = "ANALYZER_RUN_ID";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/";
pub const DEFAULT_MIN_LOADING_DURATION_MS: u64 = 600;
pub const DEFAULT_MAX_INPUT_LENGTH: usize = 250;
const CONFIG_DIR_NAME: &str = "text-analyzer";
const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to open config file {path}. {error:?}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },
    #[error("Config file {path} is not valid. {error}")]
    Parse {
        path: String,
        #[source]
        error: serde_yaml::Error,
    },
    #[error("API base url `{url}` is not valid. {error}")]
    InvalidUrl {
        url: String,
        #[source]
        error: url::ParseError,
    },
}

#[derive(Parser, Debug, Default)]
#[clap(group = ArgGroup::new("config"))]
pub struct ConfigOptions {
    /// Origin the online analysis requests are sent to.
    #[arg(long, env = "ANALYZER_API_BASE_URL", global(true))]
    api_base_url: Option<String>,

    /// Minimum time, in milliseconds, an analysis stays in the loading state.
    #[arg(long, env = "ANALYZER_MIN_LOADING_MS", global(true))]
    min_loading_ms: Option<u64>,

    /// Longest input, in characters, that will be analyzed.
    #[arg(long, env = "ANALYZER_MAX_INPUT_LENGTH", global(true))]
    max_input_length: Option<usize>,

    /// Keep at most this many analyses in history. Unbounded when unset.
    #[arg(long, env = "ANALYZER_HISTORY_CAPACITY", global(true))]
    history_capacity: Option<NonZeroUsize>,

    /// Extra YAML config file. Values from it override the default config file.
    #[arg(long = "config", env = "ANALYZER_CONFIG", global(true))]
    config_file: Option<PathBuf>,

    /// When set, the default config file will not be loaded.
    #[arg(
        long,
        env = "ANALYZER_DISABLE_DEFAULT_CONFIG",
        default_value = "false",
        global(true)
    )]
    disable_default_config: bool,

    /// The run-id names the log file of this run.
    #[arg(long, global(true), env = RUN_ID_ENV_VAR)]
    run_id: Option<String>,
}

/// Shape of the YAML config file. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    pub api_base_url: Option<String>,
    pub min_loading_duration_ms: Option<u64>,
    pub max_input_length: Option<usize>,
    pub history_capacity: Option<NonZeroUsize>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            error,
        })?;
        serde_yaml::from_reader(file).map_err(|error| ConfigError::Parse {
            path: path.display().to_string(),
            error,
        })
    }

    /// Values set in `other` win.
    fn overlay(self, other: ConfigFile) -> Self {
        Self {
            api_base_url: other.api_base_url.or(self.api_base_url),
            min_loading_duration_ms: other.min_loading_duration_ms.or(self.min_loading_duration_ms),
            max_input_length: other.max_input_length.or(self.max_input_length),
            history_capacity: other.history_capacity.or(self.history_capacity),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl ConfigOptions {
    pub fn generate_run_id() -> String {
        let id = nanoid::nanoid!(4, &nanoid::alphabet::SAFE);
        let now = chrono::Local::now();
        let current_time = now.format("%Y%m%d");
        format!("{}-{}", current_time, id)
    }

    pub fn get_run_id(&self) -> String {
        self.run_id.clone().unwrap_or_else(Self::generate_run_id)
    }

    pub fn load_config(&self) -> Result<FoundConfig, ConfigError> {
        let mut file_config = ConfigFile::default();

        if !self.disable_default_config {
            if let Some(path) = default_config_path() {
                debug!("Checking if {} exists", path.display());
                if path.exists() {
                    file_config = file_config.overlay(ConfigFile::load(&path)?);
                }
            }
        }

        if let Some(path) = &self.config_file {
            debug!("Loading config from {}", path.display());
            file_config = file_config.overlay(ConfigFile::load(path)?);
        }

        let found = FoundConfig::resolve(self, file_config)?;
        debug!("Loaded config {:?}", found);
        Ok(found)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoundConfig {
    pub api_base_url: Url,
    pub min_loading_duration: Duration,
    pub max_input_length: usize,
    pub history_capacity: Option<NonZeroUsize>,
    pub run_id: String,
}

impl FoundConfig {
    pub fn empty() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_BASE_URL).expect("default url is valid"),
            min_loading_duration: Duration::from_millis(DEFAULT_MIN_LOADING_DURATION_MS),
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
            history_capacity: None,
            run_id: ConfigOptions::generate_run_id(),
        }
    }

    fn resolve(options: &ConfigOptions, file: ConfigFile) -> Result<Self, ConfigError> {
        let url = options
            .api_base_url
            .clone()
            .or(file.api_base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = Url::parse(&url).map_err(|error| ConfigError::InvalidUrl {
            url: url.clone(),
            error,
        })?;

        let min_loading_ms = options
            .min_loading_ms
            .or(file.min_loading_duration_ms)
            .unwrap_or(DEFAULT_MIN_LOADING_DURATION_MS);

        Ok(Self {
            api_base_url,
            min_loading_duration: Duration::from_millis(min_loading_ms),
            max_input_length: options
                .max_input_length
                .or(file.max_input_length)
                .unwrap_or(DEFAULT_MAX_INPUT_LENGTH),
            history_capacity: options.history_capacity.or(file.history_capacity),
            run_id: options.get_run_id(),
        })
    }
}
