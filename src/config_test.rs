use std::path::PathBuf;

use tempfile::TempDir;

use crate::config::*;
use crate::events::EventKind;

fn parse(contents: &str) -> (Result<Config, ConfigError>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, contents).unwrap();
    (Config::parse(Some(&config_path)), temp_dir)
}

#[test]
fn test_config_minimal() {
    let (config, _temp) = parse(r#"library_dir = "~/.media""#);
    let config = config.unwrap();

    assert_eq!(config.library_dir, PathBuf::from(shellexpand::tilde("~/.media").into_owned()));
    assert_eq!(config.audio_items_file, "audio_items.json");
    assert_eq!(config.playlists_file, "playlists.json");
    assert!(config.persist);
    assert!(config.max_proc >= 1);
    assert_eq!(config.events, EventsConfig::default());
    assert_eq!(config.logging.output, LogOutput::Stderr);
}

#[test]
fn test_config_full() {
    let (config, temp) = parse(
        r#"
        library_dir = "/srv/media"
        audio_items_file = "tracks.json"
        playlists_file = "lists.json"
        persist = false
        max_proc = 8

        [events]
        read = true
        delete = false

        [logging]
        output = "file"
        "#,
    );
    let config = config.unwrap();
    drop(temp);

    assert_eq!(config.library_dir, PathBuf::from("/srv/media"));
    assert_eq!(config.audio_items_path(), PathBuf::from("/srv/media/tracks.json"));
    assert_eq!(config.playlists_path(), PathBuf::from("/srv/media/lists.json"));
    assert!(!config.persist);
    assert_eq!(config.max_proc, 8);
    assert!(config.events.create);
    assert!(config.events.read);
    assert!(config.events.update);
    assert!(!config.events.delete);
    assert_eq!(config.logging.output, LogOutput::File);
}

#[test]
fn test_config_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");
    let result = Config::parse(Some(&missing));
    assert!(matches!(result, Err(ConfigError::NotFound(p)) if p == missing));
}

#[test]
fn test_config_missing_library_dir() {
    let (result, _temp) = parse("persist = true");
    assert!(matches!(result, Err(ConfigError::MissingKey { key }) if key == "library_dir"));
}

#[test]
fn test_config_unknown_keys_rejected() {
    let (result, _temp) = parse(
        r#"
        library_dir = "/srv/media"
        libary_dir = "/typo"
        "#,
    );
    assert!(matches!(result, Err(ConfigError::Decode { .. })));

    let (result, _temp) = parse(
        r#"
        library_dir = "/srv/media"
        [events]
        mutate = false
        "#,
    );
    assert!(matches!(result, Err(ConfigError::Decode { .. })));
}

#[test]
fn test_config_invalid_max_proc() {
    for value in ["0", "-1"] {
        let (result, _temp) = parse(&format!("library_dir = \"/srv/media\"\nmax_proc = {value}"));
        assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "max_proc"));
    }

    let (result, _temp) = parse("library_dir = \"/srv/media\"\nmax_proc = \"lots\"");
    assert!(matches!(result, Err(ConfigError::Decode { .. })));
}

#[test]
fn test_config_invalid_file_names() {
    let (result, _temp) = parse(
        r#"
        library_dir = "/srv/media"
        audio_items_file = "nested/items.json"
        "#,
    );
    assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "audio_items_file"));

    let (result, _temp) = parse(
        r#"
        library_dir = "/srv/media"
        audio_items_file = "same.json"
        playlists_file = "same.json"
        "#,
    );
    assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "playlists_file"));
}

#[test]
fn test_events_config_is_enabled() {
    let events = EventsConfig::default();
    assert!(events.is_enabled(EventKind::Create));
    assert!(!events.is_enabled(EventKind::Read));
    assert!(events.is_enabled(EventKind::Update));
    assert!(events.is_enabled(EventKind::Delete));
    assert!(events.is_enabled(EventKind::Mutate));
}
