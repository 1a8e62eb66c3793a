use std::collections::HashSet;

use super::*;

fn memory_store() -> IdentityStore {
    IdentityStore::in_memory(ClockIdentity { id: "seed".into(), display_name: "Hall A".into() })
}

#[test]
fn clock_id_is_32_hex_chars() {
    let id = generate_clock_id();
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn regenerate_changes_id_but_not_name() {
    let mut store = memory_store();
    let new_id = store.regenerate_id().expect("regenerate");
    assert_ne!(new_id, "seed");
    assert_eq!(store.current().id, new_id);
    assert_eq!(store.current().display_name, "Hall A");
}

#[test]
fn regenerate_never_repeats_across_many_trials() {
    let mut store = memory_store();
    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        let id = store.regenerate_id().expect("regenerate");
        assert!(seen.insert(id), "regenerated id repeated");
    }
}

#[test]
fn rename_keeps_id() {
    let mut store = memory_store();
    store.rename("Hall B").expect("rename");
    assert_eq!(store.current().id, "seed");
    assert_eq!(store.current().display_name, "Hall B");
}

#[test]
fn identity_serializes_with_relay_field_names() {
    let identity = ClockIdentity { id: "abc".into(), display_name: "Hall A".into() };
    assert_eq!(
        serde_json::to_value(&identity).expect("serialize"),
        serde_json::json!({ "clockID": "abc", "clockName": "Hall A" })
    );
}

#[test]
fn load_or_create_persists_and_reloads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.json");

    let created = IdentityStore::load_or_create(&path, "Hall A").expect("create");
    let id = created.current().id.clone();
    assert!(path.exists());

    let reloaded = IdentityStore::load_or_create(&path, "ignored").expect("reload");
    assert_eq!(reloaded.current().id, id);
    assert_eq!(reloaded.current().display_name, "Hall A");
}

#[test]
fn regenerate_rewrites_same_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.json");

    let mut store = IdentityStore::load_or_create(&path, "Hall A").expect("create");
    let new_id = store.regenerate_id().expect("regenerate");
    store.rename("Hall C").expect("rename");

    let reloaded = IdentityStore::load_or_create(&path, "ignored").expect("reload");
    assert_eq!(reloaded.current().id, new_id);
    assert_eq!(reloaded.current().display_name, "Hall C");
}

#[test]
fn load_rejects_corrupt_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.json");
    std::fs::write(&path, b"{not json").expect("write");

    let err = IdentityStore::load_or_create(&path, "Hall A").err().expect("corrupt file should fail");
    assert!(matches!(err, IdentityError::Json { .. }));
}

#[test]
fn failed_write_leaves_identity_unchanged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state_dir = dir.path().join("state");
    std::fs::create_dir(&state_dir).expect("mkdir");
    let mut store = IdentityStore::load_or_create(state_dir.join("identity.json"), "Hall A").expect("create");
    let before = store.current().clone();
    std::fs::remove_dir_all(&state_dir).expect("remove state dir");

    assert!(matches!(store.regenerate_id(), Err(IdentityError::Io { .. })));
    assert!(matches!(store.rename("Hall B"), Err(IdentityError::Io { .. })));
    assert_eq!(store.current(), &before);
}
