use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{Album, Artist};
use crate::store::Entity;

/// A single audio file known to the library. Every setter is a change point: it refreshes
/// `last_date_modified`. Timestamps are kept at whole-second precision, which is what the JSON
/// document stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioItem {
    pub id: u64,
    pub path: PathBuf,
    #[serde(default)]
    pub title: String,
    #[serde(default, with = "duration_seconds")]
    pub duration: Duration,
    #[serde(default)]
    pub bit_rate: u32,
    #[serde(default)]
    pub artist: Artist,
    #[serde(default)]
    pub album: Album,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub track_number: Option<u16>,
    #[serde(default)]
    pub disc_number: Option<u16>,
    #[serde(default)]
    pub bpm: Option<f32>,
    #[serde(default)]
    pub encoder: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date_of_creation: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_date_modified: DateTime<Utc>,
    #[serde(default)]
    pub play_count: u32,
}

pub(crate) fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

impl AudioItem {
    pub fn new(id: u64, path: impl Into<PathBuf>, title: impl Into<String>, artist: Artist, album: Album) -> Self {
        let now = now_seconds();
        Self {
            id,
            path: path.into(),
            title: title.into(),
            duration: Duration::ZERO,
            bit_rate: 0,
            artist,
            album,
            genre: String::new(),
            comments: String::new(),
            track_number: None,
            disc_number: None,
            bpm: None,
            encoder: String::new(),
            encoding: String::new(),
            date_of_creation: now,
            last_date_modified: now,
            play_count: 0,
        }
    }

    pub fn with_position(mut self, disc_number: Option<u16>, track_number: Option<u16>) -> Self {
        self.disc_number = disc_number;
        self.track_number = track_number;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn touch(&mut self) {
        self.last_date_modified = now_seconds();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn set_artist(&mut self, artist: Artist) {
        self.artist = artist;
        self.touch();
    }

    pub fn set_album(&mut self, album: Album) {
        self.album = album;
        self.touch();
    }

    pub fn set_genre(&mut self, genre: impl Into<String>) {
        self.genre = genre.into();
        self.touch();
    }

    pub fn set_comments(&mut self, comments: impl Into<String>) {
        self.comments = comments.into();
        self.touch();
    }

    pub fn set_track_number(&mut self, track_number: Option<u16>) {
        self.track_number = track_number;
        self.touch();
    }

    pub fn set_disc_number(&mut self, disc_number: Option<u16>) {
        self.disc_number = disc_number;
        self.touch();
    }

    pub fn set_bpm(&mut self, bpm: Option<f32>) {
        self.bpm = bpm;
        self.touch();
    }

    pub fn increment_play_count(&mut self) {
        self.play_count += 1;
        self.touch();
    }

    /// Ordering inside an album view: disc, then track, missing numbers last, then id.
    pub fn album_order(&self, other: &AudioItem) -> Ordering {
        fn last_if_missing(n: Option<u16>) -> (bool, u16) {
            (n.is_none(), n.unwrap_or(0))
        }
        last_if_missing(self.disc_number)
            .cmp(&last_if_missing(other.disc_number))
            .then_with(|| last_if_missing(self.track_number).cmp(&last_if_missing(other.track_number)))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Whether `other` sits at a different position of the same album.
    pub fn position_differs(&self, other: &AudioItem) -> bool {
        self.disc_number != other.disc_number || self.track_number != other.track_number
    }
}

impl Entity for AudioItem {
    fn id(&self) -> u64 {
        self.id
    }

    fn unique_id(&self) -> String {
        format!("{}:{}", self.id, self.path.display())
    }
}

/// Durations are persisted as whole seconds.
mod duration_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
