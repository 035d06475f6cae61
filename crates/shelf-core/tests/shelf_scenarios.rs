use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use shelf_core::{
    Database, ItemQuery, MediaCondition, MediaFormat, MemorySessionStore, NewItem, Shelf,
    ShelfError, SortOrder,
};

struct TempDir {
    path: PathBuf,
}

impl TempDir {
    fn new(prefix: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be available")
            .as_nanos();
        let name = format!("{}_{}_{}", prefix, std::process::id(), nanos);
        let path = std::env::temp_dir().join(name);
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn open_shelf(dir: &Path, name: &str) -> Shelf {
    let db = Database::open(&dir.join(name), &dir.join("uploads"))
        .expect("database should open");
    Shelf::new(db, MemorySessionStore::default())
}

#[test]
fn test_first_user_admin_and_private_collections() {
    let temp = TempDir::new("shelf_private_collections");
    let shelf = open_shelf(&temp.path, "shelf.db");

    let alice = shelf.register("alice", "pw-alice").expect("register alice");
    let bob = shelf.register("bob", "pw-bob").expect("register bob");
    assert!(alice.is_admin);
    assert!(!bob.is_admin);

    let err = shelf.register("alice", "other").unwrap_err();
    assert!(matches!(err, ShelfError::UsernameTaken));

    let alice_login = shelf.login("alice", "pw-alice").expect("alice logs in");
    let bob_login = shelf.login("bob", "pw-bob").expect("bob logs in");

    let dune = shelf
        .add_item(
            Some(&alice_login.token),
            &NewItem::new("Dune", MediaFormat::BluRay, MediaCondition::NewSealed),
        )
        .expect("add item");
    assert_eq!(dune.owner_id, alice.id);
    assert_eq!(dune.format.as_str(), "Blu-ray");
    assert_eq!(dune.condition.as_str(), "New (Sealed)");

    let alice_items = shelf
        .list_items(Some(&alice_login.token), &ItemQuery::new())
        .expect("alice lists");
    assert_eq!(alice_items.len(), 1);
    assert_eq!(alice_items[0].title, "Dune");

    let bob_items = shelf
        .list_items(Some(&bob_login.token), &ItemQuery::new())
        .expect("bob lists");
    assert!(bob_items.is_empty());
}

#[test]
fn test_search_filter_and_sort() {
    let temp = TempDir::new("shelf_search");
    let shelf = open_shelf(&temp.path, "shelf.db");
    shelf.register("alice", "pw").expect("register");
    let login = shelf.login("alice", "pw").expect("login");
    let token = Some(login.token.as_str());

    for (title, format) in [
        ("Heat", MediaFormat::Dvd),
        ("alien", MediaFormat::BluRay),
        ("Aliens", MediaFormat::Dvd),
    ] {
        shelf
            .add_item(token, &NewItem::new(title, format, MediaCondition::Good))
            .expect("add");
    }

    let found = shelf
        .list_items(token, &ItemQuery::new().search("ALIEN"))
        .expect("search");
    let titles: Vec<_> = found.iter().map(|item| item.title.as_str()).collect();
    assert_eq!(titles, vec!["alien", "Aliens"]);

    let dvds = shelf
        .list_items(
            token,
            &ItemQuery::new()
                .format(MediaFormat::Dvd)
                .sort(SortOrder::TitleDesc),
        )
        .expect("filter");
    let titles: Vec<_> = dvds.iter().map(|item| item.title.as_str()).collect();
    assert_eq!(titles, vec!["Heat", "Aliens"]);

    let newest = shelf
        .list_items(token, &ItemQuery::new().sort(SortOrder::CreatedDesc))
        .expect("sort");
    assert_eq!(newest[0].title, "Aliens");
}

#[test]
fn test_admin_reset_password_scenarios() {
    let temp = TempDir::new("shelf_reset_password");
    let shelf = open_shelf(&temp.path, "shelf.db");
    let alice = shelf.register("alice", "pw-alice").expect("register alice");
    let bob = shelf.register("bob", "pw-bob").expect("register bob");
    let alice_login = shelf.login("alice", "pw-alice").expect("alice logs in");
    let bob_login = shelf.login("bob", "pw-bob").expect("bob logs in");

    let err = shelf
        .reset_password(Some(&bob_login.token), alice.id, "hijack")
        .unwrap_err();
    assert!(matches!(err, ShelfError::Forbidden));
    assert!(shelf
        .authenticate("alice", "pw-alice")
        .expect("authenticate")
        .is_some());

    shelf
        .reset_password(Some(&alice_login.token), bob.id, "fresh-pw")
        .expect("admin reset");
    assert!(shelf
        .authenticate("bob", "pw-bob")
        .expect("authenticate")
        .is_none());
    assert!(shelf
        .authenticate("bob", "fresh-pw")
        .expect("authenticate")
        .is_some());
}

#[test]
fn test_authenticate_requires_exact_username() {
    let temp = TempDir::new("shelf_authenticate");
    let shelf = open_shelf(&temp.path, "shelf.db");
    shelf.register("Alice", "pw").expect("register");

    assert!(shelf.authenticate("Alice", "pw").expect("auth").is_some());
    assert!(shelf.authenticate("alice", "pw").expect("auth").is_none());
    assert!(shelf.authenticate("Alice", "PW").expect("auth").is_none());
    assert!(shelf.authenticate("nobody", "pw").expect("auth").is_none());
}

#[test]
fn test_rejected_import_leaves_store_unchanged() {
    let temp = TempDir::new("shelf_rejected_import");
    let shelf = open_shelf(&temp.path, "shelf.db");
    shelf.register("alice", "pw").expect("register");
    let login = shelf.login("alice", "pw").expect("login");
    let token = Some(login.token.as_str());
    shelf
        .add_item(
            token,
            &NewItem::new("Dune", MediaFormat::BluRay, MediaCondition::NewSealed),
        )
        .expect("add");

    let err = shelf
        .import_store(token, "backup.db", b"this is not sqlite")
        .unwrap_err();
    assert!(matches!(err, ShelfError::InvalidFormat(_)));

    let items = shelf
        .list_items(token, &ItemQuery::new())
        .expect("session survives a rejected import");
    assert_eq!(items.len(), 1);
}

#[test]
fn test_export_then_import_round_trip() {
    let temp = TempDir::new("shelf_round_trip");
    let source = open_shelf(&temp.path, "source.db");
    source.register("alice", "pw-alice").expect("register");
    source.register("bob", "pw-bob").expect("register");
    let alice = source.login("alice", "pw-alice").expect("login");
    for title in ["Alien", "Brazil"] {
        source
            .add_item(
                Some(&alice.token),
                &NewItem::new(title, MediaFormat::Dvd, MediaCondition::VeryGood),
            )
            .expect("add");
    }
    let artifact = source.export_store(Some(&alice.token)).expect("export");
    assert_eq!(&artifact[..16], b"SQLite format 3\0");

    let target = open_shelf(&temp.path, "target.db");
    target.register("zed", "pw-zed").expect("register");
    let zed = target.login("zed", "pw-zed").expect("login");
    let counts = target
        .import_store(Some(&zed.token), "backup.db", &artifact)
        .expect("import");
    assert_eq!(counts.users, 2);
    assert_eq!(counts.items, 2);

    assert!(target.login("zed", "pw-zed").is_err());
    let alice = target.login("alice", "pw-alice").expect("alice in new store");
    let items = target
        .list_items(Some(&alice.token), &ItemQuery::new())
        .expect("list");
    let titles: Vec<_> = items.iter().map(|item| item.title.as_str()).collect();
    assert_eq!(titles, vec!["Alien", "Brazil"]);
}

#[test]
fn test_non_admin_cannot_export_or_import() {
    let temp = TempDir::new("shelf_admin_only");
    let shelf = open_shelf(&temp.path, "shelf.db");
    shelf.register("alice", "pw").expect("register");
    shelf.register("bob", "pw").expect("register");
    let bob = shelf.login("bob", "pw").expect("login");

    assert!(matches!(
        shelf.export_store(Some(&bob.token)),
        Err(ShelfError::Forbidden)
    ));
    assert!(matches!(
        shelf.import_store(Some(&bob.token), "x.db", b"SQLite format 3\0"),
        Err(ShelfError::Forbidden)
    ));
    assert!(matches!(
        shelf.export_store(None),
        Err(ShelfError::Unauthenticated)
    ));
}
