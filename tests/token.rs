use std::fs;

use cafe_query::token::FileTokenStore;
use cafe_query::token::MemoryTokenStore;
use cafe_query::TokenStore;
use tempfile::tempdir;

#[test]
fn missing_file_means_no_token() {
    let dir = tempdir().unwrap();
    let store = FileTokenStore::open(dir.path().join("token")).unwrap();
    assert_eq!(store.token(), None);
    assert!(!store.has_token());
}

#[test]
fn stored_token_survives_reopening() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("token");

    let store = FileTokenStore::open(&path).unwrap();
    store.store("abc|123").unwrap();
    assert_eq!(store.token().as_deref(), Some("abc|123"));
    drop(store);

    let reopened = FileTokenStore::open(&path).unwrap();
    assert_eq!(reopened.token().as_deref(), Some("abc|123"));
    assert_eq!(reopened.path(), path.as_path());
}

#[test]
fn surrounding_whitespace_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("token");
    fs::write(&path, "  tok\n").unwrap();
    assert_eq!(FileTokenStore::open(&path).unwrap().token().as_deref(), Some("tok"));

    fs::write(&path, "\n").unwrap();
    assert_eq!(FileTokenStore::open(&path).unwrap().token(), None);
}

#[test]
fn clearing_removes_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("token");
    let store = FileTokenStore::open(&path).unwrap();

    store.store("tok").unwrap();
    assert!(path.exists());

    store.clear();
    assert!(!path.exists());
    assert_eq!(store.token(), None);

    // Clearing twice is harmless.
    store.clear();
}

#[test]
fn memory_store_round_trip() {
    let store = MemoryTokenStore::new();
    assert!(!store.has_token());
    store.store("tok").unwrap();
    assert_eq!(store.token().as_deref(), Some("tok"));
    store.clear();
    assert_eq!(store.token(), None);

    assert!(MemoryTokenStore::with_token("preset").has_token());
}
