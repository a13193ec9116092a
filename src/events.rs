//! The events module implements the per-store change notification channel.
//!
//! Every subscriber owns a FIFO queue and a dedicated worker thread. Publishing only enqueues a
//! shared copy of the event for each subscriber, so a mutation never waits on a handler and a slow
//! handler never delays another one. Each subscriber observes events in submission order.
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Create,
    Read,
    Update,
    Delete,
    /// Ordering-only change; the grouping of the entities is unchanged.
    Mutate,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Create,
        EventKind::Read,
        EventKind::Update,
        EventKind::Delete,
        EventKind::Mutate,
    ];

    fn index(self) -> usize {
        match self {
            EventKind::Create => 0,
            EventKind::Read => 1,
            EventKind::Update => 2,
            EventKind::Delete => 3,
            EventKind::Mutate => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent<T> {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub entities: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_entities: Option<Vec<T>>,
    /// Entities removed by the same batch as an UPDATE.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_entities: Vec<T>,
}

impl<T> ChangeEvent<T> {
    pub fn new(kind: EventKind, entities: Vec<T>) -> Self {
        Self {
            kind,
            entities,
            old_entities: None,
            removed_entities: Vec::new(),
        }
    }

    pub fn created(entities: Vec<T>) -> Self {
        Self::new(EventKind::Create, entities)
    }

    pub fn read(entities: Vec<T>) -> Self {
        Self::new(EventKind::Read, entities)
    }

    pub fn deleted(entities: Vec<T>) -> Self {
        Self::new(EventKind::Delete, entities)
    }

    /// Builds an event carrying prior snapshots. `old_entities[i]` must be the previous value of
    /// `entities[i]` as identified by `key`.
    pub fn with_snapshots<K, F>(kind: EventKind, entities: Vec<T>, old_entities: Vec<T>, key: F) -> Result<Self>
    where
        K: PartialEq + Debug,
        F: Fn(&T) -> K,
    {
        check_snapshots(&entities, &old_entities, &key)?;
        Ok(Self {
            kind,
            entities,
            old_entities: Some(old_entities),
            removed_entities: Vec::new(),
        })
    }

    pub fn with_removed(mut self, removed: Vec<T>) -> Self {
        self.removed_entities = removed;
        self
    }

    /// Pairs every entity with its prior snapshot as `(old, new)`.
    pub fn pairs_by<K, F>(&self, key: F) -> Result<Vec<(&T, &T)>>
    where
        K: PartialEq + Debug,
        F: Fn(&T) -> K,
    {
        let old = self.old_entities.as_ref().ok_or_else(|| {
            MediaError::Consistency(format!("{:?} event carries no prior snapshots", self.kind))
        })?;
        check_snapshots(&self.entities, old, &key)?;
        Ok(old.iter().zip(self.entities.iter()).collect())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn check_snapshots<T, K, F>(entities: &[T], old: &[T], key: &F) -> Result<()>
where
    K: PartialEq + Debug,
    F: Fn(&T) -> K,
{
    if entities.len() != old.len() {
        return Err(MediaError::Consistency(format!(
            "{} updated entities but {} prior snapshots",
            entities.len(),
            old.len()
        )));
    }
    for (new, prev) in entities.iter().zip(old.iter()) {
        let (new_key, old_key) = (key(new), key(prev));
        if new_key != old_key {
            return Err(MediaError::Consistency(format!(
                "no prior snapshot for {new_key:?} (found {old_key:?} in its position)"
            )));
        }
    }
    Ok(())
}

pub type EventHandler<T> = Arc<dyn Fn(&ChangeEvent<T>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Counts work that was queued but not yet handled.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    pub(crate) fn add(&self) {
        if let Ok(mut count) = self.count.lock() {
            *count += 1;
        }
    }

    pub(crate) fn done(&self) {
        if let Ok(mut count) = self.count.lock() {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.idle.notify_all();
            }
        }
    }

    pub(crate) fn wait_idle(&self) {
        let Ok(mut count) = self.count.lock() else {
            return;
        };
        while *count > 0 {
            count = match self.idle.wait(count) {
                Ok(guard) => guard,
                Err(_) => return,
            };
        }
    }
}

struct Subscriber<T> {
    id: SubscriptionId,
    tx: Sender<Arc<ChangeEvent<T>>>,
}

pub struct EventBus<T> {
    name: String,
    enabled: [AtomicBool; 5],
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_subscription: AtomicU64,
    pending: Arc<Pending>,
}

impl<T: Send + Sync + 'static> Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T: Send + Sync + 'static> EventBus<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: [
                AtomicBool::new(true),
                AtomicBool::new(true),
                AtomicBool::new(true),
                AtomicBool::new(true),
                AtomicBool::new(true),
            ],
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            pending: Arc::new(Pending::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_enabled(&self, kind: EventKind, enabled: bool) {
        debug!("{} events {:?} on bus {}", if enabled { "enabling" } else { "disabling" }, kind, self.name);
        self.enabled[kind.index()].store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self, kind: EventKind) -> bool {
        self.enabled[kind.index()].load(Ordering::SeqCst)
    }

    /// Registers a handler. It runs on its own worker thread, once per published event.
    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&ChangeEvent<T>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = unbounded::<Arc<ChangeEvent<T>>>();
        let pending = Arc::clone(&self.pending);
        let bus_name = self.name.clone();
        let handler: EventHandler<T> = Arc::new(handler);

        thread::Builder::new()
            .name(format!("{}-events-{}", self.name, id.0))
            .spawn(move || {
                for event in rx {
                    let outcome = catch_unwind(AssertUnwindSafe(|| handler(event.as_ref())));
                    if outcome.is_err() {
                        error!("subscriber {} on bus {} panicked while handling a {:?} event", id.0, bus_name, event.kind);
                    }
                    pending.done();
                }
                debug!("subscriber {} on bus {} stopped", id.0, bus_name);
            })?;

        self.lock_subscribers()?.push(Subscriber { id, tx });
        debug!("registered subscriber {} on bus {}", id.0, self.name);
        Ok(id)
    }

    /// Removes a subscriber. Events already queued for it are still delivered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut subscribers) = self.lock_subscribers() else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Queues an event for every subscriber. Returns false when the kind is disabled or the event
    /// is empty.
    pub fn publish(&self, event: ChangeEvent<T>) -> bool {
        if !self.is_enabled(event.kind) {
            debug!("dropping {:?} event on bus {}: kind disabled", event.kind, self.name);
            return false;
        }
        if event.is_empty() {
            return false;
        }
        let Ok(subscribers) = self.lock_subscribers() else {
            warn!("dropping {:?} event on bus {}: subscriber list poisoned", event.kind, self.name);
            return false;
        };
        let event = Arc::new(event);
        for subscriber in subscribers.iter() {
            self.pending.add();
            if subscriber.tx.send(Arc::clone(&event)).is_err() {
                self.pending.done();
                warn!("subscriber {} on bus {} is gone", subscriber.id.0, self.name);
            }
        }
        true
    }

    /// Blocks until every queued event has been handled. Must not be called from a handler of this
    /// same bus.
    pub fn wait_for_events(&self) {
        self.pending.wait_idle();
    }

    fn lock_subscribers(&self) -> Result<std::sync::MutexGuard<'_, Vec<Subscriber<T>>>> {
        self.subscribers
            .lock()
            .map_err(|_| MediaError::Consistency(format!("subscriber list of bus {} poisoned", self.name)))
    }
}
