use serde_json::{json, Value};
use vc_overlay::store::{DurableStorage, FileStorage, MemoryStorage};
use vc_overlay::{Kind, SlotConfig, Store, StoreConfig};

fn config() -> StoreConfig {
    StoreConfig {
        logs: false,
        ..StoreConfig::default()
    }
}

fn persistent() -> SlotConfig {
    SlotConfig::new().persistent(true).notify(true)
}

fn samples() -> Vec<(&'static str, Value, Value)> {
    vec![
        ("flag", json!(false), json!(true)),
        ("count", json!(0), json!(1234.5)),
        ("large", json!(0), json!(9_007_199_254_740_991u64)),
        ("name", json!(""), json!("  spaced \"quoted\" text ")),
        (
            "server",
            json!({}),
            json!({"serverId": "1", "nested": {"list": [1, [2, 3], {"x": null}]}}),
        ),
        (
            "users",
            json!([]),
            json!([{"id": "1", "url": "u", "urlSpeaking": "s", "tags": ["a", "b"]}]),
        ),
    ]
}

#[test]
fn values_survive_a_fresh_store() {
    let storage = MemoryStorage::new();

    let first = Store::new(config(), storage.clone());
    for (key, default, value) in samples() {
        first.init(key, default, persistent()).unwrap();
        first.set(key, value).unwrap();
    }
    drop(first);

    let second = Store::new(config(), storage);
    for (key, default, value) in samples() {
        let slot = second.init(key, default, persistent()).unwrap();
        assert_eq!(slot.get(), value, "slot {key} did not round-trip");
    }
}

#[test]
fn file_storage_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("overlay-state.json");

    {
        let store = Store::new(config(), FileStorage::open(&path).unwrap());
        for (key, default, value) in samples() {
            store.init(key, default, persistent()).unwrap();
            store.set(key, value).unwrap();
        }
    }

    let store = Store::new(config(), FileStorage::open(&path).unwrap());
    for (key, default, value) in samples() {
        store.init(key, default, persistent()).unwrap();
        assert_eq!(store.get(key), Some(value));
    }
}

#[test]
fn init_without_stored_value_uses_default() {
    let store = Store::new(config(), MemoryStorage::new());
    for (key, default, _) in samples() {
        let slot = store.init(key, default.clone(), persistent()).unwrap();
        assert_eq!(slot.get(), default);
        assert_eq!(slot.kind(), Kind::of(&default));
    }
}

#[test]
fn unreadable_stored_value_falls_back_to_default() {
    let storage = MemoryStorage::new();
    storage.insert("users", "{broken");
    storage.insert("count", "twelve");
    storage.insert("server", "[1, 2]");
    storage.insert("flag", "maybe");

    let store = Store::new(config(), storage);
    assert_eq!(store.init("users", json!([]), persistent()).unwrap().get(), json!([]));
    assert_eq!(store.init("count", json!(3), persistent()).unwrap().get(), json!(3));
    assert_eq!(store.init("server", json!({}), persistent()).unwrap().get(), json!({}));
    assert_eq!(store.init("flag", json!(true), persistent()).unwrap().get(), json!(true));
}

#[test]
fn stored_text_forms() {
    let storage = MemoryStorage::new();
    let store = Store::new(config(), storage.clone());
    store.init("flag", json!(false), persistent()).unwrap();
    store.init("name", json!(""), persistent()).unwrap();
    store.init("server", json!({}), persistent()).unwrap();

    store.set("flag", json!(true)).unwrap();
    store.set("name", json!("plain")).unwrap();
    store.set("server", json!({"vcId": "2"})).unwrap();

    assert_eq!(storage.load("flag").unwrap().as_deref(), Some("true"));
    assert_eq!(storage.load("name").unwrap().as_deref(), Some("plain"));
    assert_eq!(storage.load("server").unwrap().as_deref(), Some(r#"{"vcId":"2"}"#));
}

#[test]
fn non_persistent_slots_leave_storage_untouched() {
    let storage = MemoryStorage::new();
    let store = Store::new(config(), storage.clone());
    store.init("scratch", json!(0), SlotConfig::new().notify(true)).unwrap();
    store.set("scratch", json!(5)).unwrap();
    assert!(storage.is_empty());
}

#[test]
fn mismatched_write_is_not_persisted() {
    let storage = MemoryStorage::new();
    let store = Store::new(config(), storage.clone());
    store.init("count", json!(1), persistent()).unwrap();
    assert!(store.set("count", json!("2")).is_err());
    assert_eq!(storage.get("count").as_deref(), Some("1"));
}
