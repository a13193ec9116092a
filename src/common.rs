//! The common module holds the small value types shared by every other module (artists, labels,
//! albums), the name-matching helper used by lookups, and logging initialisation.
use std::collections::HashSet;
use std::fs;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use directories::ProjectDirs;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, EnvFilter};
use unicode_normalization::UnicodeNormalization;

use crate::config::LogOutput;
use crate::error::{MediaError, Result};

/// An artist is identified by name and country code. Two artists with the same pair are the same
/// key in every index.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub name: String,
    #[serde(default)]
    pub country_code: String,
}

impl Hash for Artist {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.country_code.hash(state);
    }
}

impl Artist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            country_code: String::new(),
        }
    }

    pub fn with_country(name: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            country_code: country_code.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub country_code: String,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            country_code: String::new(),
        }
    }
}

/// Grouping key for audio items inside an artist catalog. Albums are never stored on their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub name: String,
    #[serde(default)]
    pub album_artist: Artist,
    #[serde(default)]
    pub is_compilation: bool,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub label: Label,
}

impl Album {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_artist(name: impl Into<String>, album_artist: Artist) -> Self {
        Self {
            name: name.into(),
            album_artist,
            ..Default::default()
        }
    }
}

pub fn uniq<T: Clone + Eq + Hash>(xs: Vec<T>) -> Vec<T> {
    let mut rv = Vec::new();
    let mut seen = HashSet::new();
    for x in xs {
        if seen.insert(x.clone()) {
            rv.push(x);
        }
    }
    rv
}

/// Lowercased NFC form of a name, so lookups match regardless of case or composition.
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect::<String>().to_lowercase()
}

/// Case-insensitive containment match used by the name lookups.
pub fn name_contains(haystack: &str, needle: &str) -> bool {
    normalize_name(haystack).contains(&normalize_name(needle))
}

static LOGGING_INITIALIZED: Lazy<Mutex<HashSet<Option<String>>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));
static FILE_LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub fn initialize_logging(logger_name: Option<&str>, output: LogOutput) -> Result<()> {
    {
        let mut initialized = LOGGING_INITIALIZED
            .lock()
            .map_err(|_| MediaError::Generic("logging state lock poisoned".to_string()))?;
        if !initialized.insert(logger_name.map(|s| s.to_string())) {
            return Ok(());
        }
    }

    let log_despite_testing = std::env::var("LOG_TEST").is_ok();
    let is_testing = std::env::var("CARGO_TEST").is_ok();
    if is_testing && !log_despite_testing {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match output {
        LogOutput::Stderr => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(!log_despite_testing)
                .with_thread_ids(log_despite_testing)
                .with_line_number(log_despite_testing)
                .with_file(log_despite_testing)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| MediaError::Generic(format!("failed to install logger: {e}")))?;
        }
        LogOutput::File => {
            let proj_dirs = ProjectDirs::from("", "", "mediastore")
                .ok_or_else(|| MediaError::Generic("Failed to get project directories".to_string()))?;
            let log_dir = if cfg!(target_os = "macos") {
                proj_dirs.cache_dir()
            } else {
                proj_dirs.state_dir().unwrap_or(proj_dirs.cache_dir())
            };
            fs::create_dir_all(log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .max_log_files(10)
                .filename_prefix("mediastore")
                .filename_suffix("log")
                .build(log_dir)
                .map_err(|e| MediaError::Generic(format!("failed to open log file: {e}")))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = FILE_LOG_GUARD.set(guard);

            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| MediaError::Generic(format!("failed to install logger: {e}")))?;
        }
    }

    Ok(())
}
