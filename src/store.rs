//! The store module holds the generic keyed entity collection. Every mutation updates the in-memory
//! state under one collection-wide lock and queues its change event before the lock is released,
//! so the order of events always matches the order of mutations.
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::config::EventsConfig;
use crate::error::{MediaError, MediaExpectedError, Result};
use crate::events::{ChangeEvent, EventBus, EventKind, SubscriptionId};

pub trait Entity: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// Numeric id, assigned once and never changed.
    fn id(&self) -> u64;

    /// Secondary string identity; may change when the entity changes.
    fn unique_id(&self) -> String;
}

impl<E: Entity> ChangeEvent<E> {
    /// An UPDATE event; `old_entities` must match `entities` position by position.
    pub fn updated(entities: Vec<E>, old_entities: Vec<E>) -> Result<Self> {
        Self::with_snapshots(EventKind::Update, entities, old_entities, |e| e.id())
    }

    /// `(old, new)` pairs of an UPDATE event, matched by id.
    pub fn pairs(&self) -> Result<Vec<(&E, &E)>> {
        self.pairs_by(|e| e.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Replaced,
    /// An identical value was already stored.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub created: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub removed: usize,
}

impl UpsertSummary {
    pub fn changed(&self) -> bool {
        self.created + self.replaced + self.removed > 0
    }
}

#[derive(Debug)]
struct StoreState<E> {
    entities: BTreeMap<u64, E>,
    unique_ids: HashMap<String, u64>,
    next_id: u64,
}

impl<E: Entity> StoreState<E> {
    fn insert(&mut self, entity: E) -> Option<E> {
        let id = entity.id();
        self.next_id = self.next_id.max(id.saturating_add(1));
        let previous = self.entities.insert(id, entity.clone());
        if let Some(old) = &previous {
            self.unique_ids.remove(&old.unique_id());
        }
        self.unique_ids.insert(entity.unique_id(), id);
        previous
    }

    fn take(&mut self, id: u64) -> Option<E> {
        let removed = self.entities.remove(&id)?;
        self.unique_ids.remove(&removed.unique_id());
        Some(removed)
    }
}

pub struct EntityStore<E: Entity> {
    name: String,
    state: RwLock<StoreState<E>>,
    bus: EventBus<E>,
}

impl<E: Entity> Debug for EntityStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

impl<E: Entity> EntityStore<E> {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            bus: EventBus::new(name.clone()),
            name,
            state: RwLock::new(StoreState {
                entities: BTreeMap::new(),
                unique_ids: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// A store whose event kinds start enabled or disabled as configured.
    pub fn with_events(name: impl Into<String>, events: &EventsConfig) -> Self {
        let store = Self::new(name);
        for kind in EventKind::ALL {
            store.bus.set_enabled(kind, events.is_enabled(kind));
        }
        store
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState<E>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState<E>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a new entity. Returns false, without emitting anything, if the id is taken.
    pub fn add(&self, entity: E) -> bool {
        let mut state = self.write();
        if state.entities.contains_key(&entity.id()) {
            debug!("no-op: {} already holds id {}", self.name, entity.id());
            return false;
        }
        state.insert(entity.clone());
        self.bus.publish(ChangeEvent::created(vec![entity]));
        true
    }

    pub fn add_or_replace(&self, entity: E) -> Result<Upsert> {
        let mut state = self.write();
        let identical = state.entities.get(&entity.id()).map(|existing| *existing == entity);
        match identical {
            Some(true) => Ok(Upsert::Unchanged),
            Some(false) => {
                let old = state
                    .insert(entity.clone())
                    .ok_or_else(|| MediaError::Consistency(format!("{} lost id {}", self.name, entity.id())))?;
                self.bus.publish(ChangeEvent::updated(vec![entity], vec![old])?);
                Ok(Upsert::Replaced)
            }
            None => {
                state.insert(entity.clone());
                self.bus.publish(ChangeEvent::created(vec![entity]));
                Ok(Upsert::Created)
            }
        }
    }

    /// Upserts a batch atomically. Emits at most one CREATE carrying every new entity and at most
    /// one UPDATE carrying every replaced entity with its prior snapshot. When an id appears more
    /// than once in the batch, the last occurrence wins.
    pub fn add_or_replace_all(&self, entities: Vec<E>) -> Result<UpsertSummary> {
        self.apply(entities, &[])
    }

    /// Upserts `entities` and removes `removals` under one lock, so no reader ever sees half of
    /// the batch. New entities go out as one CREATE. Replacements and removals go out together as
    /// one UPDATE whose `removed_entities` holds the removed values; without replacements the
    /// removals are a plain DELETE. An id both upserted and removed is upserted.
    pub fn apply(&self, entities: Vec<E>, removals: &[u64]) -> Result<UpsertSummary> {
        let mut batch: Vec<E> = Vec::with_capacity(entities.len());
        let mut positions: HashMap<u64, usize> = HashMap::new();
        for entity in entities {
            match positions.get(&entity.id()) {
                Some(&pos) => batch[pos] = entity,
                None => {
                    positions.insert(entity.id(), batch.len());
                    batch.push(entity);
                }
            }
        }

        let mut state = self.write();
        let mut summary = UpsertSummary::default();
        let mut created = Vec::new();
        let mut replaced = Vec::new();
        let mut previous = Vec::new();
        for entity in batch {
            let identical = state.entities.get(&entity.id()).map(|existing| *existing == entity);
            match identical {
                Some(true) => summary.unchanged += 1,
                Some(false) => {
                    if let Some(old) = state.insert(entity.clone()) {
                        previous.push(old);
                        replaced.push(entity);
                    }
                }
                None => {
                    state.insert(entity.clone());
                    created.push(entity);
                }
            }
        }
        let removed: Vec<E> = removals
            .iter()
            .filter(|id| !positions.contains_key(id))
            .filter_map(|id| state.take(*id))
            .collect();
        summary.created = created.len();
        summary.replaced = replaced.len();
        summary.removed = removed.len();

        if !created.is_empty() {
            self.bus.publish(ChangeEvent::created(created));
        }
        if !replaced.is_empty() {
            self.bus
                .publish(ChangeEvent::updated(replaced, previous)?.with_removed(removed));
        } else if !removed.is_empty() {
            self.bus.publish(ChangeEvent::deleted(removed));
        }
        if summary.changed() {
            debug!(
                "{}: created {}, replaced {}, removed {}, unchanged {}",
                self.name, summary.created, summary.replaced, summary.removed, summary.unchanged
            );
        }
        Ok(summary)
    }

    /// Applies `f` to the stored entity under the store lock. Emits an UPDATE carrying deep
    /// before/after snapshots when the value changed. Returns whether it changed.
    pub fn modify<F>(&self, id: u64, f: F) -> Result<bool>
    where
        F: FnOnce(&mut E),
    {
        let mut state = self.write();
        let old = state
            .entities
            .get(&id)
            .cloned()
            .ok_or_else(|| MediaExpectedError::EntityDoesNotExist {
                store: self.name.clone(),
                id,
            })?;
        let mut new = old.clone();
        f(&mut new);
        if new.id() != id {
            return Err(MediaError::Consistency(format!(
                "modification of {} entity {id} changed its id to {}",
                self.name,
                new.id()
            )));
        }
        if new == old {
            return Ok(false);
        }
        state.insert(new.clone());
        self.bus.publish(ChangeEvent::updated(vec![new], vec![old])?);
        Ok(true)
    }

    pub fn remove(&self, id: u64) -> bool {
        let mut state = self.write();
        match state.take(id) {
            Some(removed) => {
                self.bus.publish(ChangeEvent::deleted(vec![removed]));
                true
            }
            None => {
                debug!("no-op: {} holds no entity with id {}", self.name, id);
                false
            }
        }
    }

    pub fn remove_all(&self, ids: &[u64]) -> bool {
        let mut state = self.write();
        let removed: Vec<E> = ids.iter().filter_map(|id| state.take(*id)).collect();
        if removed.is_empty() {
            return false;
        }
        info!("removed {} entities from {}", removed.len(), self.name);
        self.bus.publish(ChangeEvent::deleted(removed));
        true
    }

    pub fn find_by_id(&self, id: u64) -> Option<E> {
        let state = self.read();
        let found = state.entities.get(&id).cloned();
        self.emit_read(found.iter().cloned().collect());
        found
    }

    pub fn find_by_unique_id(&self, unique_id: &str) -> Option<E> {
        let state = self.read();
        let found = state
            .unique_ids
            .get(unique_id)
            .and_then(|id| state.entities.get(id))
            .cloned();
        self.emit_read(found.iter().cloned().collect());
        found
    }

    pub fn search<P>(&self, predicate: P) -> Vec<E>
    where
        P: Fn(&E) -> bool,
    {
        let state = self.read();
        let found: Vec<E> = state.entities.values().filter(|e| predicate(e)).cloned().collect();
        self.emit_read(found.clone());
        found
    }

    /// Like `find_by_id`, but never emits a READ event. Meant for internal bookkeeping.
    pub fn get(&self, id: u64) -> Option<E> {
        self.read().entities.get(&id).cloned()
    }

    /// First entity, in id order, matching `predicate`. Never emits a READ event.
    pub fn get_matching<P>(&self, predicate: P) -> Option<E>
    where
        P: Fn(&E) -> bool,
    {
        self.read().entities.values().find(|e| predicate(e)).cloned()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.read().entities.contains_key(&id)
    }

    pub fn contains_matching<P>(&self, predicate: P) -> bool
    where
        P: Fn(&E) -> bool,
    {
        self.read().entities.values().any(predicate)
    }

    pub fn len(&self) -> usize {
        self.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entities.is_empty()
    }

    /// Snapshot of every entity, in id order.
    pub fn entities(&self) -> Vec<E> {
        self.read().entities.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.read().entities.keys().copied().collect()
    }

    /// Reserves a fresh id, greater than every id stored so far.
    pub fn next_id(&self) -> u64 {
        let mut state = self.write();
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&ChangeEvent<E>) + Send + Sync + 'static,
    {
        self.bus.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn set_event_enabled(&self, kind: EventKind, enabled: bool) {
        self.bus.set_enabled(kind, enabled);
    }

    pub fn is_event_enabled(&self, kind: EventKind) -> bool {
        self.bus.is_enabled(kind)
    }

    /// Disables every event kind until the returned guard is dropped, then restores the previous
    /// settings.
    pub fn suppress_events(&self) -> SuppressedEvents<'_, E> {
        let previous = EventKind::ALL.map(|kind| (kind, self.bus.is_enabled(kind)));
        for kind in EventKind::ALL {
            self.bus.set_enabled(kind, false);
        }
        debug!("suppressing events on {}", self.name);
        SuppressedEvents { store: self, previous }
    }

    /// Blocks until every queued event has reached its subscribers.
    pub fn wait_for_events(&self) {
        self.bus.wait_for_events();
    }

    fn emit_read(&self, found: Vec<E>) {
        if !found.is_empty() && self.bus.is_enabled(EventKind::Read) {
            self.bus.publish(ChangeEvent::read(found));
        }
    }
}

pub struct SuppressedEvents<'a, E: Entity> {
    store: &'a EntityStore<E>,
    previous: [(EventKind, bool); 5],
}

impl<'a, E: Entity> Drop for SuppressedEvents<'a, E> {
    fn drop(&mut self) {
        for (kind, enabled) in self.previous {
            self.store.bus.set_enabled(kind, enabled);
        }
        debug!("restored events on {}", self.store.name);
    }
}
