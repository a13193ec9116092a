use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use crate::audio_items::AudioItem;
use crate::common::{Album, Artist};
use crate::config::Config;
use crate::events::ChangeEvent;

static INIT: Once = Once::new();

pub fn init() -> TempDir {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
    TempDir::new().expect("failed to create temp dir")
}

// A library config rooted in `dir` with a small rayon pool.
pub fn config(dir: &Path) -> Config {
    let mut config = Config::new(dir);
    config.max_proc = 2;
    config
}

// Timestamps are pinned so that two fixtures built from the same arguments compare equal.
pub fn audio_item(id: u64, artist: &str, album: &str, track: Option<u16>) -> AudioItem {
    let mut item = AudioItem::new(
        id,
        format!("/music/{artist}/{album}/{id:02}.flac"),
        format!("Track {id}"),
        Artist::new(artist),
        Album::with_artist(album, Artist::new(artist)),
    )
    .with_position(Some(1), track);
    let pinned = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
    item.date_of_creation = pinned;
    item.last_date_modified = pinned;
    item
}

pub fn moby(id: u64, track: u16) -> AudioItem {
    audio_item(id, "Moby", "Play", Some(track))
}

pub fn bjork(id: u64, track: u16) -> AudioItem {
    audio_item(id, "Bjork", "Homogenic", Some(track))
}

pub type EventLog<T> = Arc<Mutex<Vec<ChangeEvent<T>>>>;

// Returns a shared log and a handler that appends every delivered event to it.
pub fn recorder<T: Clone + Send + Sync + 'static>() -> (EventLog<T>, impl Fn(&ChangeEvent<T>) + Send + Sync + 'static) {
    let log: EventLog<T> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |event: &ChangeEvent<T>| sink.lock().unwrap().push(event.clone()))
}

pub fn recorded<T: Clone>(log: &EventLog<T>) -> Vec<ChangeEvent<T>> {
    log.lock().unwrap().clone()
}
