use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::audio_items::AudioItem;
use crate::config::EventsConfig;
use crate::error::MediaError;
use crate::events::EventKind;
use crate::persistence::*;
use crate::playlists::{Playlist, PlaylistHierarchy};
use crate::store::EntityStore;
use crate::testing;

fn audio_store() -> Arc<EntityStore<AudioItem>> {
    Arc::new(EntityStore::with_events("audio_items", &EventsConfig::default()))
}

fn hierarchy(audio_items: &Arc<EntityStore<AudioItem>>) -> Arc<PlaylistHierarchy> {
    let playlists = Arc::new(EntityStore::with_events("playlists", &EventsConfig::default()));
    Arc::new(PlaylistHierarchy::new(playlists, Arc::clone(audio_items)))
}

fn load_reason(result: crate::error::Result<usize>) -> String {
    match result {
        Err(MediaError::Load { reason, .. }) => reason,
        other => panic!("expected a load error, got {other:?}"),
    }
}

// Two audio items and a hierarchy loaded from `json`.
fn load_json(dir: &Path, json: &str) -> (crate::error::Result<usize>, Arc<PlaylistHierarchy>) {
    let audio_items = audio_store();
    audio_items
        .add_or_replace_all(vec![testing::moby(1, 1), testing::moby(2, 2)])
        .unwrap();
    let path = dir.join("playlists.json");
    fs::write(&path, json).unwrap();
    let hierarchy = hierarchy(&audio_items);
    (load_playlists(&path, &hierarchy, &audio_items), hierarchy)
}

#[test]
fn test_audio_items_round_trip() {
    let temp = testing::init();
    let path = temp.path().join("audio_items.json");
    let mut tagged = testing::bjork(7, 3);
    tagged.bpm = Some(92.5);
    tagged.genre = "Electronic".to_string();
    let items = vec![testing::moby(1, 1), testing::moby(2, 2), tagged];
    write_document(&path, &items).unwrap();

    let store = audio_store();
    assert_eq!(load_audio_items(&path, &store).unwrap(), 3);
    assert_eq!(store.entities(), items);
    assert_eq!(store.next_id(), 8);
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn test_audio_item_document_shape() {
    let temp = testing::init();
    let path = temp.path().join("audio_items.json");
    write_document(&path, &[testing::moby(3, 4)]).unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let item = &json["3"];
    assert_eq!(item["id"], 3);
    assert_eq!(item["trackNumber"], 4);
    assert_eq!(item["discNumber"], 1);
    assert_eq!(item["dateOfCreation"], 1_600_000_000);
    assert_eq!(item["artist"]["name"], "Moby");
    assert_eq!(item["duration"], 0);
}

#[test]
fn test_playlist_document_shape() {
    let temp = testing::init();
    let path = temp.path().join("playlists.json");
    let mut fifties = Playlist::directory(2, "50s");
    fifties.child_ids.insert(1);
    write_document(&path, &[Playlist::new(1, "Rock").with_audio_items(vec![2, 1]), fifties]).unwrap();

    let document: std::collections::BTreeMap<u64, PlaylistRecord> = read_document(&path).unwrap();
    assert_eq!(
        document[&1],
        PlaylistRecord {
            id: 1,
            is_directory: false,
            name: "Rock".to_string(),
            audio_item_ids: vec![2, 1],
            playlist_ids: vec![],
        }
    );
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["2"]["isDirectory"], true);
    assert_eq!(json["2"]["playlistIds"], serde_json::json!([1]));
    assert_eq!(json["1"]["audioItemIds"], serde_json::json!([2, 1]));
}

#[test]
fn test_missing_or_blank_document_loads_empty() {
    let temp = testing::init();
    let store = audio_store();
    assert_eq!(load_audio_items(&temp.path().join("absent.json"), &store).unwrap(), 0);

    let blank = temp.path().join("blank.json");
    fs::write(&blank, "  \n").unwrap();
    assert_eq!(load_audio_items(&blank, &store).unwrap(), 0);
    assert!(store.is_empty());

    let broken = temp.path().join("broken.json");
    fs::write(&broken, "{ \"1\": ").unwrap();
    assert!(matches!(load_audio_items(&broken, &store), Err(MediaError::Load { .. })));
}

#[test]
fn test_key_must_match_id() {
    let temp = testing::init();
    let path = temp.path().join("audio_items.json");
    write_document(&path, &[testing::moby(3, 1)]).unwrap();
    let text = fs::read_to_string(&path).unwrap().replacen("\"3\"", "\"4\"", 1);
    fs::write(&path, text).unwrap();

    let store = audio_store();
    let reason = load_reason(load_audio_items(&path, &store));
    assert_eq!(reason, "key 4 implies id 4, but the stored value has id 3");
    assert!(store.is_empty());
}

#[test]
fn test_load_is_silent() {
    let temp = testing::init();
    let path = temp.path().join("audio_items.json");
    write_document(&path, &[testing::moby(1, 1)]).unwrap();
    let store = audio_store();
    let (log, handler) = testing::recorder::<AudioItem>();
    store.subscribe(handler).unwrap();

    load_audio_items(&path, &store).unwrap();
    store.wait_for_events();
    assert!(testing::recorded(&log).is_empty());
    assert!(store.is_event_enabled(EventKind::Create));
    assert!(!store.is_event_enabled(EventKind::Read));

    store.remove(1);
    store.wait_for_events();
    assert_eq!(testing::recorded(&log).len(), 1);
}

#[test]
fn test_child_declared_before_parent() {
    let temp = testing::init();
    let json = r#"{
        "1": { "id": 1, "isDirectory": false, "name": "Rock", "audioItemIds": [2, 1], "playlistIds": [] },
        "2": { "id": 2, "isDirectory": true, "name": "50s", "audioItemIds": [], "playlistIds": [1] },
        "3": { "id": 3, "isDirectory": true, "name": "Best hits", "playlistIds": [2] }
    }"#;
    let (result, hierarchy) = load_json(temp.path(), json);

    assert_eq!(result.unwrap(), 3);
    assert_eq!(hierarchy.find_parent_playlist(1).unwrap().map(|p| p.name), Some("50s".to_string()));
    assert_eq!(hierarchy.find_parent_playlist(2).unwrap().map(|p| p.id), Some(3));
    assert_eq!(hierarchy.find_by_id(1).unwrap().audio_item_ids, vec![2, 1]);
    assert_eq!(hierarchy.roots().len(), 1);
    assert_eq!(hierarchy.tree(3).unwrap().len(), 3);
    assert_eq!(hierarchy.edges().len(), 2);
    hierarchy.check_consistency().unwrap();
}

#[test]
fn test_playlist_load_errors() {
    let temp = testing::init();
    let cases = [
        (
            r#"{ "1": { "id": 1, "name": "Rock", "audioItemIds": [9] } }"#,
            "playlist Rock references unknown audio item 9",
        ),
        (
            r#"{ "1": { "id": 1, "isDirectory": true, "name": "Dir", "playlistIds": [5] } }"#,
            "playlist Dir references unknown playlist 5",
        ),
        (
            r#"{ "1": { "id": 1, "isDirectory": true, "name": "Dir", "playlistIds": [1] } }"#,
            "playlist Dir references unknown playlist 1",
        ),
        (
            r#"{ "2": { "id": 1, "name": "Rock" } }"#,
            "key 2 implies id 2, but the stored value has id 1",
        ),
        (
            r#"{ "1": { "id": 1, "name": "Rock" }, "2": { "id": 2, "name": "Rock" } }"#,
            "playlist name Rock is used twice",
        ),
        (
            r#"{ "1": { "id": 1, "name": "Rock", "playlistIds": [2] }, "2": { "id": 2, "name": "Pop" } }"#,
            "playlist Rock holds playlists but is not a directory",
        ),
        (
            r#"{
                "1": { "id": 1, "isDirectory": true, "name": "A", "playlistIds": [3] },
                "2": { "id": 2, "isDirectory": true, "name": "B", "playlistIds": [3] },
                "3": { "id": 3, "name": "Rock" }
            }"#,
            "playlist 3 has two parents (1 and 2)",
        ),
        (
            r#"{
                "1": { "id": 1, "isDirectory": true, "name": "A", "playlistIds": [2] },
                "2": { "id": 2, "isDirectory": true, "name": "B", "playlistIds": [1] }
            }"#,
            "playlist 1 is its own ancestor",
        ),
    ];
    for (json, expected) in cases {
        let (result, hierarchy) = load_json(temp.path(), json);
        assert_eq!(load_reason(result), expected);
        assert!(hierarchy.store().is_empty());
        assert!(hierarchy.edges().is_empty());
    }
}

#[test]
fn test_repository_follows_store() {
    let temp = testing::init();
    let path = temp.path().join("audio_items.json");
    let store = audio_store();
    let repository = Arc::new(JsonRepository::new(&path).unwrap());
    repository.attach(&store).unwrap();
    assert_eq!(repository.path(), path);

    store.add(testing::moby(1, 1));
    store.add(testing::moby(2, 2));
    store.modify(1, |item| item.set_title("Honey")).unwrap();
    store.wait_for_events();
    repository.flush();

    let document: std::collections::BTreeMap<u64, AudioItem> = read_document(&path).unwrap();
    assert_eq!(document.len(), 2);
    assert_eq!(document[&1].title, "Honey");

    store.remove(1);
    store.wait_for_events();
    repository.flush();
    let document: std::collections::BTreeMap<u64, AudioItem> = read_document(&path).unwrap();
    assert_eq!(document.keys().copied().collect::<Vec<_>>(), vec![2]);
}

#[test]
fn test_repository_keeps_newest_snapshot() {
    let temp = testing::init();
    let path = temp.path().join("playlists.json");
    let repository: JsonRepository<Playlist> = JsonRepository::new(&path).unwrap();
    for n in 1..=20 {
        let snapshot: Vec<Playlist> = (1..=n).map(|id| Playlist::new(id, format!("Playlist {id}"))).collect();
        repository.schedule(snapshot);
    }
    repository.flush();

    let document: std::collections::BTreeMap<u64, PlaylistRecord> = read_document(&path).unwrap();
    assert_eq!(document.len(), 20);
    assert_eq!(document[&20].name, "Playlist 20");
}

#[test]
fn test_repository_save_and_reload_playlists() {
    let temp = testing::init();
    let path = temp.path().join("playlists.json");
    let audio_items = audio_store();
    audio_items.add(testing::moby(1, 1));
    let original = hierarchy(&audio_items);
    let rock = original.create_playlist("Rock", &[1]).unwrap();
    original.create_playlist_directory("Genres", &[rock.id]).unwrap();

    let repository: JsonRepository<Playlist> = JsonRepository::new(&path).unwrap();
    repository.save(&original.store().entities()).unwrap();

    let reloaded = hierarchy(&audio_items);
    assert_eq!(load_playlists(&path, &reloaded, &audio_items).unwrap(), 2);
    assert_eq!(reloaded.store().entities(), original.store().entities());
    assert_eq!(reloaded.edges(), original.edges());
}
