//! The library module wires the stores, the catalog index, the playlist hierarchy and the JSON
//! repositories together into one [`MediaLibrary`].
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::audio_items::AudioItem;
use crate::audiotags::{read_audio_tags, write_audio_tags, MetadataIo};
use crate::catalog::ArtistCatalogIndex;
use crate::common::initialize_logging;
use crate::config::Config;
use crate::error::{MediaExpectedError, Result};
use crate::persistence::{load_audio_items, load_playlists, JsonRepository};
use crate::playlists::{Playlist, PlaylistHierarchy};
use crate::store::EntityStore;

pub struct MediaLibrary {
    config: Config,
    audio_items: Arc<EntityStore<AudioItem>>,
    catalog: Arc<ArtistCatalogIndex>,
    playlists: Arc<PlaylistHierarchy>,
    audio_item_repository: Option<Arc<JsonRepository<AudioItem>>>,
    playlist_repository: Option<Arc<JsonRepository<Playlist>>>,
}

impl std::fmt::Debug for MediaLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaLibrary")
            .field("library_dir", &self.config.library_dir)
            .field("audio_items", &self.audio_items.len())
            .field("playlists", &self.playlists.store().len())
            .finish()
    }
}

impl MediaLibrary {
    /// Loads both documents, builds the catalog index from the loaded audio items, then starts
    /// listening for changes. With `persist` on, every change is written back.
    pub fn open(config: Config) -> Result<Self> {
        if let Err(e) = initialize_logging(Some("mediastore"), config.logging.output) {
            debug!("keeping the installed logger: {}", e);
        }
        fs::create_dir_all(&config.library_dir)?;

        let audio_items = Arc::new(EntityStore::with_events("audio_items", &config.events));
        load_audio_items(&config.audio_items_path(), &audio_items)?;

        let catalog = Arc::new(ArtistCatalogIndex::new());
        catalog.rebuild(&audio_items.entities(), config.max_proc)?;
        catalog.attach(&audio_items)?;

        let playlist_store = Arc::new(EntityStore::with_events("playlists", &config.events));
        let playlists = Arc::new(PlaylistHierarchy::new(playlist_store, Arc::clone(&audio_items)));
        load_playlists(&config.playlists_path(), &playlists, &audio_items)?;
        playlists.attach_audio_items()?;

        let (audio_item_repository, playlist_repository) = if config.persist {
            let audio_item_repository = Arc::new(JsonRepository::new(config.audio_items_path())?);
            audio_item_repository.attach(&audio_items)?;
            let playlist_repository = Arc::new(JsonRepository::new(config.playlists_path())?);
            playlist_repository.attach(playlists.store())?;
            (Some(audio_item_repository), Some(playlist_repository))
        } else {
            debug!("persistence disabled for {}", config.library_dir.display());
            (None, None)
        };

        info!(
            "opened media library at {} with {} audio items and {} playlists",
            config.library_dir.display(),
            audio_items.len(),
            playlists.store().len()
        );
        Ok(Self {
            config,
            audio_items,
            catalog,
            playlists,
            audio_item_repository,
            playlist_repository,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audio_items(&self) -> &Arc<EntityStore<AudioItem>> {
        &self.audio_items
    }

    pub fn catalog(&self) -> &Arc<ArtistCatalogIndex> {
        &self.catalog
    }

    pub fn playlists(&self) -> &Arc<PlaylistHierarchy> {
        &self.playlists
    }

    /// Reads the tags of `path` and stores them as an audio item. A path that is already known
    /// refreshes the existing item instead.
    pub fn import(&self, path: &Path, io: &dyn MetadataIo) -> Result<AudioItem> {
        let tags = read_audio_tags(io, path)?;
        if let Some(existing) = self.audio_items.get_matching(|a| a.path == path) {
            self.audio_items.modify(existing.id, |item| tags.apply_to(item))?;
            info!("refreshed audio item {} from {}", existing.id, path.display());
            return self
                .audio_items
                .get(existing.id)
                .ok_or_else(|| MediaExpectedError::AudioItemDoesNotExist { id: existing.id }.into());
        }
        let item = tags.into_audio_item(self.audio_items.next_id(), path);
        self.audio_items.add(item.clone());
        info!("imported audio item {} from {}", item.id, path.display());
        Ok(item)
    }

    /// Writes the stored metadata of an audio item back to its file.
    pub fn write_tags(&self, id: u64, io: &dyn MetadataIo) -> Result<()> {
        let item = self
            .audio_items
            .get(id)
            .ok_or(MediaExpectedError::AudioItemDoesNotExist { id })?;
        write_audio_tags(io, &item)
    }

    /// Blocks until every change made so far has reached the catalog index, the playlists and the
    /// disk.
    pub fn flush(&self) {
        self.audio_items.wait_for_events();
        self.playlists.store().wait_for_events();
        self.catalog.wait_for_events();
        if let Some(repository) = &self.audio_item_repository {
            repository.flush();
        }
        if let Some(repository) = &self.playlist_repository {
            repository.flush();
        }
    }

    /// Writes both documents right away, whether or not `persist` is on.
    pub fn save(&self) -> Result<()> {
        self.flush();
        match &self.audio_item_repository {
            Some(repository) => repository.save(&self.audio_items.entities())?,
            None => JsonRepository::new(self.config.audio_items_path())?.save(&self.audio_items.entities())?,
        }
        match &self.playlist_repository {
            Some(repository) => repository.save(&self.playlists.store().entities())?,
            None => JsonRepository::new(self.config.playlists_path())?.save(&self.playlists.store().entities())?,
        }
        Ok(())
    }
}
