//! The config module parses the TOML configuration file. Unknown keys are rejected so that typos
//! surface as errors instead of silently falling back to defaults.
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::events::EventKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found ({0})")]
    NotFound(PathBuf),
    #[error("Failed to decode configuration file ({path}): {message}")]
    Decode { path: PathBuf, message: String },
    #[error("Missing key {key} in configuration file")]
    MissingKey { key: String },
    #[error("Invalid value for {key} in configuration file: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stderr,
    File,
}

/// Which change events the stores emit right after opening. READ is off by default because every
/// lookup would otherwise wake every subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EventsConfig {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            create: true,
            read: false,
            update: true,
            delete: true,
        }
    }
}

impl EventsConfig {
    pub fn is_enabled(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Create => self.create,
            EventKind::Read => self.read,
            EventKind::Update => self.update,
            EventKind::Delete => self.delete,
            EventKind::Mutate => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    pub output: LogOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub library_dir: PathBuf,
    pub audio_items_file: String,
    pub playlists_file: String,
    pub persist: bool,
    pub max_proc: usize,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    library_dir: Option<String>,
    audio_items_file: Option<String>,
    playlists_file: Option<String>,
    persist: Option<bool>,
    max_proc: Option<i64>,
    events: Option<EventsConfig>,
    logging: Option<LoggingConfig>,
}

const DEFAULT_AUDIO_ITEMS_FILE: &str = "audio_items.json";
const DEFAULT_PLAYLISTS_FILE: &str = "playlists.json";

pub fn default_config_path() -> PathBuf {
    match ProjectDirs::from("", "", "mediastore") {
        Some(dirs) => dirs.config_dir().join("config.toml"),
        None => PathBuf::from("mediastore.toml"),
    }
}

impl Config {
    /// A config with every optional key at its default.
    pub fn new(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
            audio_items_file: DEFAULT_AUDIO_ITEMS_FILE.to_string(),
            playlists_file: DEFAULT_PLAYLISTS_FILE.to_string(),
            persist: true,
            max_proc: num_cpus::get().max(1),
            events: EventsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn parse(config_path_override: Option<&Path>) -> Result<Config, ConfigError> {
        let cfgpath = config_path_override
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);
        debug!("reading configuration from {}", cfgpath.display());

        let contents = fs::read_to_string(&cfgpath).map_err(|_| ConfigError::NotFound(cfgpath.clone()))?;
        Self::parse_str(&cfgpath, &contents)
    }

    fn parse_str(cfgpath: &Path, contents: &str) -> Result<Config, ConfigError> {
        let raw: RawConfig = toml::from_str(contents).map_err(|e| ConfigError::Decode {
            path: cfgpath.to_path_buf(),
            message: e.to_string(),
        })?;

        let library_dir = raw.library_dir.ok_or_else(|| ConfigError::MissingKey {
            key: "library_dir".to_string(),
        })?;
        let library_dir = PathBuf::from(shellexpand::tilde(&library_dir).into_owned());

        let mut config = Config::new(library_dir);

        if let Some(name) = raw.audio_items_file {
            config.audio_items_file = validate_file_name("audio_items_file", name)?;
        }
        if let Some(name) = raw.playlists_file {
            config.playlists_file = validate_file_name("playlists_file", name)?;
        }
        if config.audio_items_file == config.playlists_file {
            return Err(ConfigError::InvalidValue {
                key: "playlists_file".to_string(),
                message: "must differ from audio_items_file".to_string(),
            });
        }
        if let Some(persist) = raw.persist {
            config.persist = persist;
        }
        if let Some(max_proc) = raw.max_proc {
            if max_proc <= 0 {
                return Err(ConfigError::InvalidValue {
                    key: "max_proc".to_string(),
                    message: format!("must be a positive integer: got {max_proc}"),
                });
            }
            config.max_proc = max_proc as usize;
        }
        if let Some(events) = raw.events {
            config.events = events;
        }
        if let Some(logging) = raw.logging {
            config.logging = logging;
        }

        Ok(config)
    }

    pub fn audio_items_path(&self) -> PathBuf {
        self.library_dir.join(&self.audio_items_file)
    }

    pub fn playlists_path(&self) -> PathBuf {
        self.library_dir.join(&self.playlists_file)
    }
}

fn validate_file_name(key: &str, name: String) -> Result<String, ConfigError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a plain file name: got {name:?}"),
        });
    }
    Ok(trimmed.to_string())
}
