use std::cmp::Ordering;
use std::time::Duration;

use crate::audio_items::*;
use crate::common::{Album, Artist, Label};
use crate::store::Entity;
use crate::testing;

#[test]
fn test_unique_id() {
    let item = testing::moby(7, 1);
    assert_eq!(item.id(), 7);
    assert_eq!(item.unique_id(), "7:/music/Moby/Play/07.flac");
}

#[test]
fn test_setters_touch_last_date_modified() {
    let mut item = testing::moby(1, 1);
    let pinned = item.last_date_modified;

    item.set_title("Honey");
    assert_eq!(item.title, "Honey");
    assert!(item.last_date_modified > pinned);
    assert_eq!(item.date_of_creation, pinned);

    item.last_date_modified = pinned;
    item.increment_play_count();
    assert_eq!(item.play_count, 1);
    assert!(item.last_date_modified > pinned);

    item.last_date_modified = pinned;
    item.set_track_number(Some(4));
    assert_eq!(item.track_number, Some(4));
    assert!(item.last_date_modified > pinned);
}

#[test]
fn test_album_order() {
    let a = testing::moby(1, 1);
    let b = testing::moby(2, 2);
    assert_eq!(a.album_order(&b), Ordering::Less);

    // Disc number comes first.
    let c = testing::moby(3, 1).with_position(Some(2), Some(1));
    assert_eq!(b.album_order(&c), Ordering::Less);

    // Missing numbers sort last.
    let unnumbered = testing::audio_item(4, "Moby", "Play", None);
    assert_eq!(unnumbered.album_order(&b), Ordering::Greater);
    let no_disc = testing::moby(5, 1).with_position(None, Some(1));
    assert_eq!(c.album_order(&no_disc), Ordering::Less);

    // Ties are broken by id.
    let twin = testing::moby(6, 1);
    assert_eq!(a.album_order(&twin), Ordering::Less);
    assert_eq!(twin.album_order(&a), Ordering::Greater);
}

#[test]
fn test_position_differs() {
    let a = testing::moby(1, 1);
    assert!(!a.position_differs(&a.clone()));
    assert!(a.position_differs(&a.clone().with_position(Some(1), Some(2))));
    assert!(a.position_differs(&a.clone().with_position(Some(2), Some(1))));
}

#[test]
fn test_json_shape() {
    let mut item = testing::moby(1, 3);
    item.duration = Duration::from_secs(245);
    item.bit_rate = 320;
    item.album.year = Some(1999);
    item.album.label = Label::new("Mute");
    item.artist = Artist::with_country("Moby", "US");

    let json = serde_json::to_value(&item).unwrap();
    assert_eq!(json["id"], 1);
    assert_eq!(json["path"], "/music/Moby/Play/01.flac");
    assert_eq!(json["duration"], 245);
    assert_eq!(json["bitRate"], 320);
    assert_eq!(json["artist"], serde_json::json!({"name": "Moby", "countryCode": "US"}));
    assert_eq!(json["album"]["albumArtist"]["name"], "Moby");
    assert_eq!(json["album"]["isCompilation"], false);
    assert_eq!(json["album"]["label"]["name"], "Mute");
    assert_eq!(json["trackNumber"], 3);
    assert_eq!(json["discNumber"], 1);
    assert_eq!(json["dateOfCreation"], 1_600_000_000);
    assert_eq!(json["lastDateModified"], 1_600_000_000);
    assert_eq!(json["playCount"], 0);

    let back: AudioItem = serde_json::from_value(json).unwrap();
    assert_eq!(back, item);
}

#[test]
fn test_deserialize_sparse_item() {
    let item: AudioItem = serde_json::from_str(
        r#"{
            "id": 3,
            "path": "/music/a.mp3",
            "title": "A",
            "artist": {"name": "Bjork"},
            "album": {"name": "Debut", "albumArtist": {"name": "Bjork"}, "label": {"name": "One Little Indian"}},
            "dateOfCreation": 1600000000,
            "lastDateModified": 1600000100
        }"#,
    )
    .unwrap();
    assert_eq!(item.artist, Artist::new("Bjork"));
    assert_eq!(item.album.name, "Debut");
    assert!(!item.album.is_compilation);
    assert_eq!(item.album.year, None);
    assert_eq!(item.track_number, None);
    assert_eq!(item.duration, Duration::ZERO);
    assert_eq!(item.last_date_modified.timestamp(), 1_600_000_100);
}

#[test]
fn test_new_item_defaults() {
    let item = AudioItem::new(1, "/a.flac", "A", Artist::new("X"), Album::new("Y"));
    assert_eq!(item.path(), std::path::Path::new("/a.flac"));
    assert_eq!(item.date_of_creation, item.last_date_modified);
    assert_eq!(item.play_count, 0);
    assert_eq!(item.bpm, None);
}
