//! The audiotags module defines the boundary to tag reading and writing. Parsing audio files is the
//! job of an external implementation of [`MetadataIo`]; this crate only maps the tags it returns
//! onto audio items and wraps its failures.
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::audio_items::{now_seconds, AudioItem};
use crate::common::{Album, Artist};
use crate::error::{MediaError, Result};

/// The tags read from one audio file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioTags {
    pub title: Option<String>,
    pub artist: Option<Artist>,
    pub album: Option<Album>,
    pub genre: Option<String>,
    pub comments: Option<String>,
    pub track_number: Option<u16>,
    pub disc_number: Option<u16>,
    pub bpm: Option<f32>,
    pub duration: Duration,
    pub bit_rate: u32,
    pub encoder: Option<String>,
    pub encoding: Option<String>,
    pub cover_image: Option<Vec<u8>>,
}

/// Error type implementations of [`MetadataIo`] report.
pub type MetadataIoError = Box<dyn std::error::Error + Send + Sync>;

pub trait MetadataIo: Send + Sync {
    fn read_metadata(&self, path: &Path) -> std::result::Result<AudioTags, MetadataIoError>;

    fn write_metadata(&self, item: &AudioItem) -> std::result::Result<(), MetadataIoError>;
}

impl AudioTags {
    /// Builds a new audio item. A missing title falls back to the file stem.
    pub fn into_audio_item(self, id: u64, path: impl Into<PathBuf>) -> AudioItem {
        let path = path.into();
        let title = self.title.clone().unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        });
        let mut item = AudioItem::new(
            id,
            path,
            title,
            self.artist.clone().unwrap_or_default(),
            self.album.clone().unwrap_or_default(),
        );
        self.apply_to(&mut item);
        item
    }

    /// Copies every tag present onto `item`. Tags the file does not carry are left untouched.
    pub fn apply_to(self, item: &mut AudioItem) {
        if let Some(title) = self.title {
            item.title = title;
        }
        if let Some(artist) = self.artist {
            item.artist = artist;
        }
        if let Some(album) = self.album {
            item.album = album;
        }
        if let Some(genre) = self.genre {
            item.genre = genre;
        }
        if let Some(comments) = self.comments {
            item.comments = comments;
        }
        if let Some(encoder) = self.encoder {
            item.encoder = encoder;
        }
        if let Some(encoding) = self.encoding {
            item.encoding = encoding;
        }
        item.track_number = self.track_number.or(item.track_number);
        item.disc_number = self.disc_number.or(item.disc_number);
        item.bpm = self.bpm.or(item.bpm);
        item.duration = self.duration;
        item.bit_rate = self.bit_rate;
        item.last_date_modified = now_seconds();
    }
}

pub fn read_audio_tags(io: &dyn MetadataIo, path: &Path) -> Result<AudioTags> {
    debug!("reading tags of {}", path.display());
    io.read_metadata(path).map_err(|e| MediaError::manipulation(path, e))
}

pub fn write_audio_tags(io: &dyn MetadataIo, item: &AudioItem) -> Result<()> {
    io.write_metadata(item)
        .map_err(|e| MediaError::manipulation(&item.path, e))?;
    info!("wrote tags of {} to {}", item.title, item.path.display());
    Ok(())
}
