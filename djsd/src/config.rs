//! # Daemon configuration
//!
//! Sources, highest precedence first:
//! 1. command-line flags ([`Overrides`])
//! 2. environment variables (`DJS_CHANNEL`, `DJS_PUSH_THRESHOLD`, `DJS_LOG_LEVEL`)
//! 3. `<repo>/djs.toml`
//! 4. built-in defaults

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use djs_common::logging::{LogSettings, DEFAULT_LOG_BACKUPS, DEFAULT_LOG_MAX_BYTES};
use djs_common::{CHANNEL_ENV, CONFIG_FILE, DEFAULT_CHANNEL, LOGS_DIR, PUSH_SCRIPT};

pub const DEFAULT_PUSH_THRESHOLD: u64 = 10_240; // 10 KiB
pub const DEFAULT_LATITUDE: f64 = 31.5326;
pub const DEFAULT_LONGITUDE: f64 = 35.0998;
pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com";

const PUSH_THRESHOLD_ENV: &str = "DJS_PUSH_THRESHOLD";
const LOG_LEVEL_ENV: &str = "DJS_LOG_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("repo path not found: {0}")]
    RepoMissing(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {name} value '{value}'")]
    Env { name: &'static str, value: String },
}

/// When the push script runs once a day file is past the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushPolicy {
    /// Once per day file, on the first append that leaves it at or above.
    #[default]
    OnCrossing,
    /// After every append while the file is at or above the threshold.
    EveryAppend,
}

impl FromStr for PushPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "on-crossing" | "once" => Ok(PushPolicy::OnCrossing),
            "every-append" | "always" => Ok(PushPolicy::EveryAppend),
            other => Err(format!(
                "unknown push policy '{}', expected 'on-crossing' or 'every-append'",
                other
            )),
        }
    }
}

impl fmt::Display for PushPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushPolicy::OnCrossing => f.write_str("on-crossing"),
            PushPolicy::EveryAppend => f.write_str("every-append"),
        }
    }
}

/// Contents of `djs.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub channel: Option<PathBuf>,
    pub with_weather: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub weather_url: Option<String>,
    pub push_threshold: Option<u64>,
    pub push_policy: Option<PushPolicy>,
    pub push_script: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_max_bytes: Option<u64>,
    pub log_backups: Option<usize>,
}

impl FileConfig {
    /// Load `<repo>/djs.toml`; a missing file yields the defaults.
    pub fn load(repo_root: &Path) -> Result<Self, ConfigError> {
        let path = repo_root.join(CONFIG_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub channel: Option<PathBuf>,
    pub with_weather: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub push_threshold: Option<u64>,
    pub push_policy: Option<PushPolicy>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSettings {
    pub latitude: f64,
    pub longitude: f64,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub repo_root: PathBuf,
    pub channel: PathBuf,
    /// `None` keeps weather out of day headers.
    pub weather: Option<WeatherSettings>,
    pub push_threshold: u64,
    pub push_policy: PushPolicy,
    /// Relative paths are taken from the repo root.
    pub push_script: PathBuf,
    pub log: LogSettings,
}

impl DaemonConfig {
    pub fn resolve(repo: &Path, overrides: Overrides) -> Result<Self, ConfigError> {
        Self::resolve_with_env(repo, overrides, |name| std::env::var(name).ok())
    }

    pub fn resolve_with_env(
        repo: &Path,
        overrides: Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let repo_root = repo
            .canonicalize()
            .map_err(|_| ConfigError::RepoMissing(repo.to_path_buf()))?;
        if !repo_root.is_dir() {
            return Err(ConfigError::RepoMissing(repo.to_path_buf()));
        }

        let file = FileConfig::load(&repo_root)?;
        let env = |name: &str| env(name).filter(|raw| !raw.trim().is_empty());

        let channel = overrides
            .channel
            .or_else(|| env(CHANNEL_ENV).map(PathBuf::from))
            .or(file.channel)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHANNEL));

        let env_threshold = match env(PUSH_THRESHOLD_ENV) {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| ConfigError::Env {
                name: PUSH_THRESHOLD_ENV,
                value: raw,
            })?),
            None => None,
        };
        let push_threshold = overrides
            .push_threshold
            .or(env_threshold)
            .or(file.push_threshold)
            .unwrap_or(DEFAULT_PUSH_THRESHOLD);

        let weather = if overrides.with_weather || file.with_weather.unwrap_or(false) {
            Some(WeatherSettings {
                latitude: overrides
                    .latitude
                    .or(file.latitude)
                    .unwrap_or(DEFAULT_LATITUDE),
                longitude: overrides
                    .longitude
                    .or(file.longitude)
                    .unwrap_or(DEFAULT_LONGITUDE),
                base_url: file
                    .weather_url
                    .unwrap_or_else(|| DEFAULT_WEATHER_URL.to_string()),
            })
        } else {
            None
        };

        let log = LogSettings {
            level: overrides
                .log_level
                .or_else(|| env(LOG_LEVEL_ENV))
                .or(file.log_level),
            max_bytes: file.log_max_bytes.unwrap_or(DEFAULT_LOG_MAX_BYTES),
            backups: file.log_backups.unwrap_or(DEFAULT_LOG_BACKUPS),
        };

        Ok(Self {
            repo_root,
            channel,
            weather,
            push_threshold,
            push_policy: overrides
                .push_policy
                .or(file.push_policy)
                .unwrap_or_default(),
            push_script: file
                .push_script
                .unwrap_or_else(|| PathBuf::from(PUSH_SCRIPT)),
            log,
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.repo_root.join(LOGS_DIR)
    }
}
