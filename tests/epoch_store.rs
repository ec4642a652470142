use tempfile::TempDir;

use bucketsync::persist::{EpochStore, MemoryEpochStore, sqlite::SqliteEpochStore};

fn exercise(store: &mut dyn EpochStore) {
    assert_eq!(store.get("g1", "dinos").expect("get"), 0);

    store.set("g1", "dinos", 17).expect("set");
    store.set("g1", "structures", 4).expect("set");
    store.set("g2", "dinos", 99).expect("set");
    assert_eq!(store.get("g1", "dinos").expect("get"), 17);
    assert_eq!(store.get("g2", "dinos").expect("get"), 99);

    store.set("g1", "dinos", 18).expect("overwrite");
    assert_eq!(store.get("g1", "dinos").expect("get"), 18);
    assert_eq!(store.get("g1", "inventories").expect("get"), 0);
}

#[test]
fn memory_store_reads_missing_as_zero_and_overwrites() {
    let mut store = MemoryEpochStore::new();
    exercise(&mut store);
    assert_eq!(store.len(), 3);
}

#[test]
fn sqlite_store_matches_the_memory_store() {
    let mut store = SqliteEpochStore::open_in_memory().expect("open");
    exercise(&mut store);
    assert_eq!(
        store.entries_for("g1").expect("entries"),
        vec![("dinos".to_string(), 18), ("structures".to_string(), 4)]
    );
}

#[test]
fn sqlite_epochs_survive_reopen() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("epochs.db");

    {
        let mut store = SqliteEpochStore::open(&db_path).expect("open");
        store.set("g1", "dinos", 1_700_000_000_123).expect("set");
        store.set("g1", "structures", 5).expect("set");
    }

    let mut store = SqliteEpochStore::open(&db_path).expect("reopen");
    assert_eq!(store.get("g1", "dinos").expect("get"), 1_700_000_000_123);
    assert_eq!(store.get("g1", "structures").expect("get"), 5);

    assert_eq!(store.clear_scope("g1").expect("clear"), 2);
    assert_eq!(store.clear_scope("g1").expect("clear again"), 0);
    assert_eq!(store.get("g1", "dinos").expect("get"), 0);
    assert!(store.entries_for("g1").expect("entries").is_empty());
}
