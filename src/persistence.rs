//! The persistence module stores each entity store as one JSON document: an object keyed by decimal
//! id. A [`JsonRepository`] rewrites the whole document from a dedicated writer thread whenever its
//! store changes; the load functions rebuild a store from such a document.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::audio_items::AudioItem;
use crate::error::{MediaError, Result};
use crate::events::{ChangeEvent, EventKind, Pending, SubscriptionId};
use crate::playlists::{Playlist, PlaylistHierarchy};
use crate::store::{Entity, EntityStore};

/// An entity with a JSON wire shape.
pub trait Record: Entity {
    type Wire: Serialize + DeserializeOwned;

    fn to_wire(&self) -> Self::Wire;
}

impl Record for AudioItem {
    type Wire = AudioItem;

    fn to_wire(&self) -> AudioItem {
        self.clone()
    }
}

/// Wire shape of a playlist: children and audio items are stored as ids only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistRecord {
    pub id: u64,
    #[serde(default)]
    pub is_directory: bool,
    pub name: String,
    #[serde(default)]
    pub audio_item_ids: Vec<u64>,
    #[serde(default)]
    pub playlist_ids: Vec<u64>,
}

impl Record for Playlist {
    type Wire = PlaylistRecord;

    fn to_wire(&self) -> PlaylistRecord {
        PlaylistRecord {
            id: self.id,
            is_directory: self.is_directory,
            name: self.name.clone(),
            audio_item_ids: self.audio_item_ids.clone(),
            playlist_ids: self.child_ids.iter().copied().collect(),
        }
    }
}

/// Writes a whole document: first to a sibling temp file, then renamed over `path`.
pub fn write_document<E: Record>(path: &Path, entities: &[E]) -> Result<()> {
    let document: BTreeMap<u64, E::Wire> = entities.iter().map(|e| (e.id(), e.to_wire())).collect();
    let json = serde_json::to_string_pretty(&document)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    debug!("wrote {} entities to {}", entities.len(), path.display());
    Ok(())
}

/// Reads a document. A missing or blank file reads as an empty document.
pub fn read_document<W: DeserializeOwned>(path: &Path) -> Result<BTreeMap<u64, W>> {
    if !path.exists() {
        debug!("no document at {}, starting empty", path.display());
        return Ok(BTreeMap::new());
    }
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&text).map_err(|e| MediaError::load(path, format!("invalid document: {e}")))
}

fn check_key(path: &Path, key: u64, id: u64) -> Result<()> {
    if key != id {
        return Err(MediaError::load(
            path,
            format!("key {key} implies id {key}, but the stored value has id {id}"),
        ));
    }
    Ok(())
}

/// Loads audio items into `store` with every event kind suppressed. Returns how many were loaded.
pub fn load_audio_items(path: &Path, store: &EntityStore<AudioItem>) -> Result<usize> {
    let document: BTreeMap<u64, AudioItem> = read_document(path)?;
    let mut items = Vec::with_capacity(document.len());
    for (key, item) in document {
        check_key(path, key, item.id)?;
        items.push(item);
    }
    let count = items.len();
    {
        let _quiet = store.suppress_events();
        store.add_or_replace_all(items)?;
    }
    info!("loaded {} audio items from {}", count, path.display());
    Ok(count)
}

/// Loads playlists into `hierarchy` in two phases. The first instantiates every node from its
/// scalar fields, the second resolves the audio item and child ids against the audio-item store
/// and the instantiated nodes. Declaration order in the document does not matter. Nothing is
/// registered unless every reference resolves. Events stay suppressed throughout.
pub fn load_playlists(path: &Path, hierarchy: &PlaylistHierarchy, audio_items: &EntityStore<AudioItem>) -> Result<usize> {
    let document: BTreeMap<u64, PlaylistRecord> = read_document(path)?;
    let _quiet = hierarchy.store().suppress_events();

    let mut arena: BTreeMap<u64, Playlist> = BTreeMap::new();
    let mut names: HashSet<String> = HashSet::new();
    for (key, record) in &document {
        check_key(path, *key, record.id)?;
        if !names.insert(record.name.clone()) {
            return Err(MediaError::load(path, format!("playlist name {} is used twice", record.name)));
        }
        let node = if record.is_directory {
            Playlist::directory(record.id, record.name.clone())
        } else {
            Playlist::new(record.id, record.name.clone())
        };
        arena.insert(record.id, node);
    }

    let mut parents: HashMap<u64, u64> = HashMap::new();
    for record in document.values() {
        let mut audio_item_ids = Vec::with_capacity(record.audio_item_ids.len());
        for audio_item in &record.audio_item_ids {
            if !audio_items.contains(*audio_item) {
                return Err(MediaError::load(
                    path,
                    format!("playlist {} references unknown audio item {}", record.name, audio_item),
                ));
            }
            audio_item_ids.push(*audio_item);
        }
        if !record.is_directory && !record.playlist_ids.is_empty() {
            return Err(MediaError::load(
                path,
                format!("playlist {} holds playlists but is not a directory", record.name),
            ));
        }
        for child in &record.playlist_ids {
            if !arena.contains_key(child) || *child == record.id {
                return Err(MediaError::load(
                    path,
                    format!("playlist {} references unknown playlist {}", record.name, child),
                ));
            }
            if let Some(other) = parents.insert(*child, record.id) {
                if other != record.id {
                    return Err(MediaError::load(
                        path,
                        format!("playlist {child} has two parents ({other} and {})", record.id),
                    ));
                }
            }
        }
        if let Some(node) = arena.get_mut(&record.id) {
            node.audio_item_ids = audio_item_ids;
            node.child_ids = record.playlist_ids.iter().copied().collect();
        }
    }

    for start in arena.keys() {
        let mut seen = HashSet::from([*start]);
        let mut current = *start;
        while let Some(parent) = parents.get(&current) {
            if !seen.insert(*parent) {
                return Err(MediaError::load(path, format!("playlist {start} is its own ancestor")));
            }
            current = *parent;
        }
    }

    let count = arena.len();
    hierarchy.restore(arena.into_values().collect())?;
    info!("loaded {} playlists from {}", count, path.display());
    Ok(count)
}

/// Keeps one JSON document in sync with one store. Writes happen on a single writer thread in the
/// order they were scheduled; snapshots that queue up while a write is in flight are coalesced into
/// the newest one.
pub struct JsonRepository<E: Record> {
    path: PathBuf,
    tx: Sender<Vec<E>>,
    pending: Arc<Pending>,
    io: Arc<Mutex<()>>,
}

impl<E: Record> std::fmt::Debug for JsonRepository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRepository").field("path", &self.path).finish()
    }
}

impl<E: Record> JsonRepository<E> {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (tx, rx) = unbounded::<Vec<E>>();
        let pending = Arc::new(Pending::default());
        let io = Arc::new(Mutex::new(()));

        let writer_path = path.clone();
        let writer_pending = Arc::clone(&pending);
        let writer_io = Arc::clone(&io);
        let thread_name = format!(
            "{}-writer",
            path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default()
        );
        thread::Builder::new().name(thread_name).spawn(move || {
            while let Ok(mut snapshot) = rx.recv() {
                let mut handled = 1;
                while let Ok(newer) = rx.try_recv() {
                    snapshot = newer;
                    handled += 1;
                }
                if handled > 1 {
                    debug!("coalesced {} snapshots of {}", handled, writer_path.display());
                }
                {
                    let _io = writer_io.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Err(e) = write_document(&writer_path, &snapshot) {
                        error!("failed to write {}: {}", writer_path.display(), e);
                    }
                }
                for _ in 0..handled {
                    writer_pending.done();
                }
            }
            debug!("writer for {} stopped", writer_path.display());
        })?;

        Ok(Self { path, tx, pending, io })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a full rewrite of the document.
    pub fn schedule(&self, snapshot: Vec<E>) {
        self.pending.add();
        if self.tx.send(snapshot).is_err() {
            self.pending.done();
            warn!("writer for {} is gone, dropping snapshot", self.path.display());
        }
    }

    /// Rewrites the document whenever `store` reports a CREATE, UPDATE or DELETE.
    pub fn attach(self: &Arc<Self>, store: &Arc<EntityStore<E>>) -> Result<SubscriptionId> {
        let repository = Arc::clone(self);
        let source: Weak<EntityStore<E>> = Arc::downgrade(store);
        store.subscribe(move |event: &ChangeEvent<E>| {
            if !matches!(event.kind, EventKind::Create | EventKind::Update | EventKind::Delete) {
                return;
            }
            if let Some(store) = source.upgrade() {
                repository.schedule(store.entities());
            }
        })
    }

    /// Writes `entities` right away, in the calling thread.
    pub fn save(&self, entities: &[E]) -> Result<()> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        write_document(&self.path, entities)
    }

    /// Blocks until every scheduled write has hit the disk.
    pub fn flush(&self) {
        self.pending.wait_idle();
    }
}

impl<E: Record> Drop for JsonRepository<E> {
    fn drop(&mut self) {
        self.flush();
    }
}
