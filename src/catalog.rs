//! The catalog module maintains the per-artist index over audio items. The index is a materialized
//! view: it is kept current by the change events of an audio-item store, and rebuilt from scratch
//! only when bootstrapping from a freshly loaded store.
//!
//! Catalogs are keyed by artist identity, and album views inside a catalog by album name. An audio
//! item lives in exactly one album view of exactly one catalog.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::audio_items::AudioItem;
use crate::common::{name_contains, Artist};
use crate::error::{MediaError, MediaExpectedError, Result};
use crate::events::{ChangeEvent, EventBus, EventKind, SubscriptionId};
use crate::store::EntityStore;

/// The audio items of one album within one catalog, ordered by disc then track number.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumView {
    name: String,
    items: Vec<AudioItem>,
}

impl AlbumView {
    /// Builds a view from items of a single album. Duplicate ids keep their first occurrence.
    pub fn new(items: Vec<AudioItem>) -> Result<Self> {
        let name = match items.first() {
            Some(first) => first.album.name.clone(),
            None => return Err(MediaExpectedError::EmptyAlbumView.into()),
        };
        if let Some(stranger) = items.iter().find(|i| i.album.name != name) {
            return Err(MediaExpectedError::HeterogeneousAlbumView {
                expected: name,
                found: stranger.album.name.clone(),
            }
            .into());
        }
        let mut seen = HashSet::new();
        let mut items: Vec<AudioItem> = items.into_iter().filter(|i| seen.insert(i.id)).collect();
        items.sort_by(|a, b| a.album_order(b));
        Ok(Self { name, items })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[AudioItem] {
        &self.items
    }

    pub fn ids(&self) -> Vec<u64> {
        self.items.iter().map(|i| i.id).collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.items.iter().any(|i| i.id == id)
    }

    /// Inserts or replaces the item with the same id, keeping the view sorted.
    fn upsert(&mut self, item: AudioItem) {
        self.items.retain(|i| i.id != item.id);
        let pos = self
            .items
            .partition_point(|i| i.album_order(&item) == std::cmp::Ordering::Less);
        self.items.insert(pos, item);
    }

    /// Replaces the stored snapshot without moving it. The caller guarantees the position is
    /// unchanged.
    fn refresh(&mut self, item: AudioItem) -> bool {
        match self.items.iter_mut().find(|i| i.id == item.id) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, id: u64) -> Option<AudioItem> {
        let pos = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(pos))
    }
}

/// Everything known for one artist identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistCatalog {
    pub artist: Artist,
    pub albums: BTreeMap<String, AlbumView>,
}

impl ArtistCatalog {
    fn new(artist: Artist) -> Self {
        Self {
            artist,
            albums: BTreeMap::new(),
        }
    }

    /// Number of audio items across every album view.
    pub fn len(&self) -> usize {
        self.albums.values().map(AlbumView::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
    }

    pub fn album(&self, name: &str) -> Option<&AlbumView> {
        self.albums.get(name)
    }

    pub fn album_names(&self) -> Vec<String> {
        self.albums.keys().cloned().collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.albums.values().any(|v| v.contains(id))
    }

    pub fn audio_items(&self) -> impl Iterator<Item = &AudioItem> {
        self.albums.values().flat_map(|v| v.items.iter())
    }
}

#[derive(Debug, Default)]
struct IndexState {
    catalogs: BTreeMap<Artist, ArtistCatalog>,
    /// Audio item id to (artist, album name) of the view holding it.
    locations: HashMap<u64, (Artist, String)>,
}

impl IndexState {
    fn insert(&mut self, item: AudioItem) {
        let artist = item.artist.clone();
        let album = item.album.name.clone();
        self.locations.insert(item.id, (artist.clone(), album.clone()));
        let catalog = self
            .catalogs
            .entry(artist.clone())
            .or_insert_with(|| ArtistCatalog::new(artist));
        match catalog.albums.get_mut(&album) {
            Some(view) => view.upsert(item),
            None => {
                catalog.albums.insert(
                    album.clone(),
                    AlbumView {
                        name: album,
                        items: vec![item],
                    },
                );
            }
        }
    }

    /// Removes an item, dropping its view and catalog when they become empty.
    fn remove(&mut self, id: u64) -> Option<AudioItem> {
        let (artist, album) = self.locations.remove(&id)?;
        let catalog = self.catalogs.get_mut(&artist)?;
        let view = catalog.albums.get_mut(&album)?;
        let removed = view.remove(id);
        if view.is_empty() {
            catalog.albums.remove(&album);
        }
        if catalog.is_empty() {
            self.catalogs.remove(&artist);
        }
        removed
    }

    fn location(&self, id: u64) -> Option<&(Artist, String)> {
        self.locations.get(&id)
    }
}

/// Records the state of every catalog a batch touches before its first change, so the batch can be
/// reported as one transition.
#[derive(Default)]
struct Transition {
    before: BTreeMap<Artist, Option<ArtistCatalog>>,
    structural: BTreeSet<Artist>,
}

#[derive(Default)]
struct TransitionEvents {
    created: Vec<ArtistCatalog>,
    updated: Vec<ArtistCatalog>,
    updated_before: Vec<ArtistCatalog>,
    reordered: Vec<ArtistCatalog>,
    reordered_before: Vec<ArtistCatalog>,
    deleted: Vec<ArtistCatalog>,
}

impl Transition {
    fn touch(&mut self, state: &IndexState, artist: &Artist, structural: bool) {
        self.before
            .entry(artist.clone())
            .or_insert_with(|| state.catalogs.get(artist).cloned());
        if structural {
            self.structural.insert(artist.clone());
        }
    }

    fn finish(self, state: &IndexState) -> TransitionEvents {
        let mut events = TransitionEvents::default();
        for (artist, before) in self.before {
            let after = state.catalogs.get(&artist).cloned();
            match (before, after) {
                (None, Some(after)) => events.created.push(after),
                (Some(before), None) => events.deleted.push(before),
                (Some(before), Some(after)) if before != after => {
                    if self.structural.contains(&artist) {
                        events.updated.push(after);
                        events.updated_before.push(before);
                    } else {
                        events.reordered.push(after);
                        events.reordered_before.push(before);
                    }
                }
                _ => {}
            }
        }
        events
    }
}

impl TransitionEvents {
    fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.reordered.is_empty() && self.deleted.is_empty()
    }
}

fn by_artist(c: &ArtistCatalog) -> Artist {
    c.artist.clone()
}

pub struct ArtistCatalogIndex {
    state: Mutex<IndexState>,
    bus: EventBus<ArtistCatalog>,
}

impl std::fmt::Debug for ArtistCatalogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtistCatalogIndex").field("catalogs", &self.len()).finish()
    }
}

impl Default for ArtistCatalogIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtistCatalogIndex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IndexState::default()),
            bus: EventBus::new("catalogs"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds items not yet present anywhere in the index. Returns whether the index changed.
    pub fn add_audio_items(&self, items: &[AudioItem]) -> bool {
        let mut state = self.lock();
        let mut transition = Transition::default();
        for item in items {
            if state.location(item.id).is_some() {
                debug!("no-op: audio item {} is already indexed", item.id);
                continue;
            }
            transition.touch(&state, &item.artist, true);
            state.insert(item.clone());
        }
        self.publish(transition.finish(&state))
    }

    /// Removes items by id. Returns whether the index changed.
    pub fn remove_audio_items(&self, items: &[AudioItem]) -> bool {
        let mut state = self.lock();
        let mut transition = Transition::default();
        for item in items {
            let Some((artist, _)) = state.location(item.id).cloned() else {
                debug!("no-op: audio item {} is not indexed", item.id);
                continue;
            };
            transition.touch(&state, &artist, true);
            state.remove(item.id);
        }
        self.publish(transition.finish(&state))
    }

    /// Applies updated audio items. `previous[i]` must be the prior snapshot of `updated[i]`.
    ///
    /// A change of artist or album moves the item as a delete followed by an add. A change of disc
    /// or track number only reorders its view and is reported as a MUTATE event. Any other change
    /// refreshes the indexed snapshot without an event.
    pub fn update_catalog(&self, updated: &[AudioItem], previous: &[AudioItem]) -> Result<bool> {
        if updated.len() != previous.len() {
            return Err(MediaError::Consistency(format!(
                "{} updated audio items but {} prior snapshots",
                updated.len(),
                previous.len()
            )));
        }
        if let Some((new, old)) = updated.iter().zip(previous).find(|(n, o)| n.id != o.id) {
            return Err(MediaError::Consistency(format!(
                "no prior snapshot for audio item {} (found {} in its position)",
                new.id, old.id
            )));
        }

        let mut state = self.lock();
        let mut transition = Transition::default();
        for (new, old) in updated.iter().zip(previous) {
            let Some((artist, album)) = state.location(new.id).cloned() else {
                transition.touch(&state, &new.artist, true);
                state.insert(new.clone());
                continue;
            };
            if new.artist != old.artist || new.album != old.album || new.artist != artist || new.album.name != album {
                debug!("moving audio item {} from {}/{} to {}/{}", new.id, artist.name, album, new.artist.name, new.album.name);
                transition.touch(&state, &artist, true);
                transition.touch(&state, &new.artist, true);
                state.remove(new.id);
                state.insert(new.clone());
            } else if new.position_differs(old) {
                transition.touch(&state, &artist, false);
                if let Some(view) = state.catalogs.get_mut(&artist).and_then(|c| c.albums.get_mut(&album)) {
                    view.upsert(new.clone());
                }
            } else if let Some(view) = state.catalogs.get_mut(&artist).and_then(|c| c.albums.get_mut(&album)) {
                view.refresh(new.clone());
            }
        }
        Ok(self.publish(transition.finish(&state)))
    }

    fn publish(&self, events: TransitionEvents) -> bool {
        if events.is_empty() {
            return false;
        }
        let TransitionEvents {
            created,
            updated,
            updated_before,
            reordered,
            reordered_before,
            deleted,
        } = events;
        if !created.is_empty() {
            info!("created {} artist catalogs", created.len());
            self.bus.publish(ChangeEvent::created(created));
        }
        if !updated.is_empty() {
            self.publish_snapshots(EventKind::Update, updated, updated_before);
        }
        if !reordered.is_empty() {
            self.publish_snapshots(EventKind::Mutate, reordered, reordered_before);
        }
        if !deleted.is_empty() {
            info!("deleted {} artist catalogs", deleted.len());
            self.bus.publish(ChangeEvent::deleted(deleted));
        }
        true
    }

    fn publish_snapshots(&self, kind: EventKind, catalogs: Vec<ArtistCatalog>, before: Vec<ArtistCatalog>) {
        match ChangeEvent::with_snapshots(kind, catalogs, before, by_artist) {
            Ok(event) => {
                self.bus.publish(event);
            }
            Err(e) => error!("dropping {:?} catalog event: {}", kind, e),
        }
    }

    pub fn find_catalog(&self, artist: &Artist) -> Option<ArtistCatalog> {
        self.lock().catalogs.get(artist).cloned()
    }

    /// Catalogs whose artist name contains `name`, ignoring case.
    pub fn find_catalogs_by_name(&self, name: &str) -> Vec<ArtistCatalog> {
        self.lock()
            .catalogs
            .values()
            .filter(|c| name_contains(&c.artist.name, name))
            .cloned()
            .collect()
    }

    /// The ordered items of one album of one artist; empty when either is unknown.
    pub fn find_album_audio_items(&self, artist: &Artist, album_name: &str) -> Vec<AudioItem> {
        self.lock()
            .catalogs
            .get(artist)
            .and_then(|c| c.albums.get(album_name))
            .map(|v| v.items.clone())
            .unwrap_or_default()
    }

    pub fn catalogs(&self) -> Vec<ArtistCatalog> {
        self.lock().catalogs.values().cloned().collect()
    }

    pub fn contains_audio_item(&self, id: u64) -> bool {
        self.lock().locations.contains_key(&id)
    }

    /// Number of catalogs.
    pub fn len(&self) -> usize {
        self.lock().catalogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().catalogs.is_empty()
    }

    /// Replaces the whole index with one built from `items`, grouping on `max_proc` threads. Emits
    /// no events. Returns the number of catalogs.
    pub fn rebuild(&self, items: &[AudioItem], max_proc: usize) -> Result<usize> {
        let groups = if items.len() < 50 {
            debug!("rebuilding catalogs in the calling thread because len={} < 50", items.len());
            group_audio_items(items)
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(max_proc.max(1))
                .build()
                .map_err(|e| MediaError::Generic(format!("failed to start catalog rebuild pool: {e}")))?;
            let batch_size = (items.len() / max_proc.max(1)).max(50);
            pool.install(|| {
                items
                    .par_chunks(batch_size)
                    .map(group_audio_items)
                    .reduce(BTreeMap::new, merge_groups)
            })
        };

        let mut state = IndexState::default();
        for (artist, albums) in groups {
            let mut catalog = ArtistCatalog::new(artist.clone());
            for (album, album_items) in albums {
                for item in &album_items {
                    state.locations.insert(item.id, (artist.clone(), album.clone()));
                }
                catalog.albums.insert(album, AlbumView::new(album_items)?);
            }
            state.catalogs.insert(artist, catalog);
        }
        let count = state.catalogs.len();
        *self.lock() = state;
        info!("rebuilt {} artist catalogs from {} audio items", count, items.len());
        Ok(count)
    }

    /// Keeps the index in sync with an audio-item store: CREATE adds, UPDATE updates (and removes
    /// whatever the same batch removed) and DELETE removes.
    pub fn attach(self: &Arc<Self>, store: &EntityStore<AudioItem>) -> Result<SubscriptionId> {
        let index: Weak<Self> = Arc::downgrade(self);
        store.subscribe(move |event: &ChangeEvent<AudioItem>| {
            let Some(index) = index.upgrade() else {
                return;
            };
            index.apply(event);
        })
    }

    fn apply(&self, event: &ChangeEvent<AudioItem>) {
        match event.kind {
            EventKind::Create => {
                self.add_audio_items(&event.entities);
            }
            EventKind::Delete => {
                self.remove_audio_items(&event.entities);
            }
            EventKind::Update => {
                let pairs = match event.pairs() {
                    Ok(pairs) => pairs,
                    Err(e) => {
                        error!("ignoring audio item update: {}", e);
                        return;
                    }
                };
                let (previous, updated): (Vec<AudioItem>, Vec<AudioItem>) =
                    pairs.into_iter().map(|(old, new)| (old.clone(), new.clone())).unzip();
                if let Err(e) = self.update_catalog(&updated, &previous) {
                    error!("failed to update catalogs: {}", e);
                }
                if !event.removed_entities.is_empty() {
                    self.remove_audio_items(&event.removed_entities);
                }
            }
            EventKind::Read | EventKind::Mutate => {}
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&ChangeEvent<ArtistCatalog>) + Send + Sync + 'static,
    {
        self.bus.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn wait_for_events(&self) {
        self.bus.wait_for_events();
    }
}

type Groups = BTreeMap<Artist, BTreeMap<String, Vec<AudioItem>>>;

fn group_audio_items(items: &[AudioItem]) -> Groups {
    let mut groups = Groups::new();
    for item in items {
        groups
            .entry(item.artist.clone())
            .or_default()
            .entry(item.album.name.clone())
            .or_default()
            .push(item.clone());
    }
    groups
}

fn merge_groups(mut left: Groups, right: Groups) -> Groups {
    for (artist, albums) in right {
        let target = left.entry(artist).or_default();
        for (album, items) in albums {
            target.entry(album).or_default().extend(items);
        }
    }
    left
}
