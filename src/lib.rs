pub mod audio_items;
pub mod audiotags;
pub mod catalog;
pub mod common;
pub mod config;
pub mod error;
pub mod events;
pub mod library;
pub mod persistence;
pub mod playlists;
pub mod store;

pub use audio_items::AudioItem;
pub use audiotags::{AudioTags, MetadataIo};
pub use catalog::{AlbumView, ArtistCatalog, ArtistCatalogIndex};
pub use common::{Album, Artist, Label};
pub use config::{Config, ConfigError};
pub use error::{MediaError, MediaExpectedError, Result};
pub use events::{ChangeEvent, EventBus, EventKind, SubscriptionId};
pub use library::MediaLibrary;
pub use persistence::{JsonRepository, PlaylistRecord};
pub use playlists::{EdgeMap, Playlist, PlaylistHierarchy, PlaylistTree};
pub use store::{Entity, EntityStore, Upsert, UpsertSummary};

#[cfg(test)]
mod testing;

#[cfg(test)]
mod audio_items_test;
#[cfg(test)]
mod audiotags_test;
#[cfg(test)]
mod common_test;
#[cfg(test)]
mod config_test;
#[cfg(test)]
mod persistence_test;
