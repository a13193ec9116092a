use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::audio_items::AudioItem;
use crate::audiotags::*;
use crate::common::{Album, Artist};
use crate::error::MediaError;
use crate::testing;

// In-memory tag storage keyed by path.
#[derive(Default)]
struct FakeTags {
    files: Mutex<HashMap<PathBuf, AudioTags>>,
    written: Mutex<Vec<u64>>,
}

impl MetadataIo for FakeTags {
    fn read_metadata(&self, path: &Path) -> Result<AudioTags, MetadataIoError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| format!("no such file: {}", path.display()).into())
    }

    fn write_metadata(&self, item: &AudioItem) -> Result<(), MetadataIoError> {
        if item.path.extension().is_some_and(|e| e == "wav") {
            return Err("wav files carry no tags".into());
        }
        self.written.lock().unwrap().push(item.id);
        Ok(())
    }
}

fn play_tags() -> AudioTags {
    AudioTags {
        title: Some("Porcelain".to_string()),
        artist: Some(Artist::new("Moby")),
        album: Some(Album::with_artist("Play", Artist::new("Moby"))),
        genre: Some("Electronic".to_string()),
        track_number: Some(4),
        disc_number: Some(1),
        duration: Duration::from_secs(241),
        bit_rate: 320,
        encoding: Some("FLAC".to_string()),
        ..Default::default()
    }
}

#[test]
fn test_read_audio_tags() {
    let _temp = testing::init();
    let io = FakeTags::default();
    io.files.lock().unwrap().insert(PathBuf::from("/music/porcelain.flac"), play_tags());

    let tags = read_audio_tags(&io, Path::new("/music/porcelain.flac")).unwrap();
    assert_eq!(tags, play_tags());
}

#[test]
fn test_read_failure_is_wrapped() {
    let io = FakeTags::default();
    let result = read_audio_tags(&io, Path::new("/music/missing.flac"));
    match result {
        Err(MediaError::Manipulation { path, source }) => {
            assert_eq!(path, PathBuf::from("/music/missing.flac"));
            assert!(source.to_string().contains("no such file"));
        }
        other => panic!("expected a manipulation error, got {other:?}"),
    }
}

#[test]
fn test_write_audio_tags() {
    let _temp = testing::init();
    let io = FakeTags::default();
    write_audio_tags(&io, &testing::moby(1, 1)).unwrap();
    assert_eq!(*io.written.lock().unwrap(), vec![1]);

    let wav = AudioItem::new(2, "/music/raw.wav", "Raw", Artist::new("Moby"), Album::new("Play"));
    let result = write_audio_tags(&io, &wav);
    assert!(matches!(result, Err(MediaError::Manipulation { path, .. }) if path == PathBuf::from("/music/raw.wav")));
}

#[test]
fn test_into_audio_item() {
    let item = play_tags().into_audio_item(9, "/music/porcelain.flac");
    assert_eq!(item.id, 9);
    assert_eq!(item.title, "Porcelain");
    assert_eq!(item.artist, Artist::new("Moby"));
    assert_eq!(item.album.name, "Play");
    assert_eq!(item.genre, "Electronic");
    assert_eq!(item.track_number, Some(4));
    assert_eq!(item.duration, Duration::from_secs(241));
    assert_eq!(item.encoding, "FLAC");
}

#[test]
fn test_into_audio_item_falls_back_to_file_stem() {
    let item = AudioTags::default().into_audio_item(1, "/music/Untitled 03.mp3");
    assert_eq!(item.title, "Untitled 03");
    assert_eq!(item.artist, Artist::default());
}

#[test]
fn test_apply_keeps_missing_tags() {
    let mut item = testing::moby(1, 2);
    item.genre = "Ambient".to_string();
    let tags = AudioTags {
        title: Some("Natural Blues".to_string()),
        ..Default::default()
    };
    tags.apply_to(&mut item);
    assert_eq!(item.title, "Natural Blues");
    assert_eq!(item.genre, "Ambient");
    assert_eq!(item.track_number, Some(2));
    assert_eq!(item.artist, Artist::new("Moby"));
}
