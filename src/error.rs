use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Media error: {0}")]
    Generic(String),
    #[error(transparent)]
    Expected(#[from] MediaExpectedError),
    #[error("Consistency error: {0}")]
    Consistency(String),
    #[error("Failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("Failed to manipulate metadata of {path}: {source}")]
    Manipulation {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures caused by the caller's request rather than by a defect or the environment. These are
/// safe to surface to a user verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaExpectedError {
    #[error("{0}")]
    Generic(String),
    #[error("Playlist {name} already exists")]
    PlaylistAlreadyExists { name: String },
    #[error("Playlist {name} does not exist")]
    PlaylistDoesNotExist { name: String },
    #[error("Playlist with id {id} does not exist")]
    PlaylistIdDoesNotExist { id: u64 },
    #[error("No entity with id {id} in {store}")]
    EntityDoesNotExist { store: String, id: u64 },
    #[error("Audio item {id} does not exist")]
    AudioItemDoesNotExist { id: u64 },
    #[error("Playlist {name} is not a directory")]
    NotADirectory { name: String },
    #[error("Cannot move playlist {name} into its own subtree ({destination})")]
    CyclicHierarchy { name: String, destination: String },
    #[error("An album view needs at least one audio item")]
    EmptyAlbumView,
    #[error("Album view for {expected} cannot hold an item of album {found}")]
    HeterogeneousAlbumView { expected: String, found: String },
}

impl MediaError {
    pub fn manipulation<E>(path: impl Into<PathBuf>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        MediaError::Manipulation {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MediaError::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is a "not found" failure for a referenced id or name.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MediaError::Expected(
                MediaExpectedError::EntityDoesNotExist { .. }
                    | MediaExpectedError::PlaylistDoesNotExist { .. }
                    | MediaExpectedError::PlaylistIdDoesNotExist { .. }
                    | MediaExpectedError::AudioItemDoesNotExist { .. }
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
