use std::collections::HashSet;

use crate::common::*;
use crate::config::LogOutput;
use crate::testing;

#[test]
fn test_artist_identity_is_name_and_country() {
    let mut set = HashSet::new();
    set.insert(Artist::with_country("Moby", "US"));
    assert!(set.contains(&Artist::with_country("Moby", "US")));
    assert!(!set.contains(&Artist::with_country("Moby", "FR")));
    assert!(!set.contains(&Artist::new("Moby")));
}

#[test]
fn test_album_identity() {
    let a = Album::with_artist("Play", Artist::new("Moby"));
    let mut b = a.clone();
    assert_eq!(a, b);
    b.year = Some(1999);
    assert_ne!(a, b);
    let mut c = a.clone();
    c.label = Label::new("Mute");
    assert_ne!(a, c);
}

#[test]
fn test_artist_json_shape() {
    let json = serde_json::to_value(Artist::with_country("Bjork", "IS")).unwrap();
    assert_eq!(json, serde_json::json!({"name": "Bjork", "countryCode": "IS"}));

    // countryCode is optional on read.
    let artist: Artist = serde_json::from_str(r#"{"name": "Bjork"}"#).unwrap();
    assert_eq!(artist, Artist::new("Bjork"));
}

#[test]
fn test_album_json_shape() {
    let album: Album = serde_json::from_str(
        r#"{"name": "Play", "albumArtist": {"name": "Moby"}, "isCompilation": false, "year": 1999, "label": {"name": "Mute"}}"#,
    )
    .unwrap();
    assert_eq!(album.name, "Play");
    assert_eq!(album.album_artist, Artist::new("Moby"));
    assert_eq!(album.year, Some(1999));
    assert_eq!(album.label, Label::new("Mute"));
}

#[test]
fn test_uniq() {
    assert_eq!(uniq(vec![3, 1, 3, 2, 1]), vec![3, 1, 2]);
    assert!(uniq::<u64>(vec![]).is_empty());
}

#[test]
fn test_name_contains() {
    assert!(name_contains("Moby", "mob"));
    assert!(name_contains("MOBY", "Moby"));
    assert!(!name_contains("Moby", "bjork"));
    // Composed and decomposed forms match each other.
    assert!(name_contains("Bj\u{f6}rk", "bjo\u{308}r"));
    assert_eq!(normalize_name("Bjo\u{308}RK"), "bj\u{f6}rk");
}

#[test]
fn test_initialize_logging_once_per_logger_name() {
    let _temp = testing::init();
    // The test subscriber may already own the global slot, so only the repeat call is pinned down.
    let _ = initialize_logging(Some("common_test"), LogOutput::Stderr);
    initialize_logging(Some("common_test"), LogOutput::Stderr).unwrap();
    initialize_logging(Some("common_test"), LogOutput::File).unwrap();
}
