//! Request-level operations.
//!
//! `Shelf` ties the pieces together: a session token resolves to an
//! identity, guards run, then the repository or lifecycle manager does the
//! work. Callers pass the raw token (or none) and get typed results back.

use std::sync::OnceLock;

use crate::access::{require_admin, require_authenticated, require_owner, Identity};
use crate::credential::{hash_password, validate_password, verify_password};
use crate::error::{Result, ShelfError};
use crate::lifecycle::{Database, LifecycleState};
use crate::session::SessionStore;
use crate::storage::{Item, ItemQuery, NewItem, SqliteStorage, StorageEngine, StoreCounts, User};

/// Digest verified against when a username does not exist, so unknown
/// users cost the same as wrong passwords.
static DUMMY_DIGEST: OnceLock<Option<String>> = OnceLock::new();

/// A successful login.
#[derive(Debug, Clone)]
pub struct Login {
    pub token: String,
    pub identity: Identity,
}

/// The application core.
pub struct Shelf {
    db: Database,
    sessions: Box<dyn SessionStore>,
}

impl Shelf {
    pub fn new(db: Database, sessions: impl SessionStore + 'static) -> Self {
        Self {
            db,
            sessions: Box::new(sessions),
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.db.state()
    }

    /// Resolve a session token to the current identity.
    ///
    /// Absent, unknown and expired tokens are anonymous, as is a token whose
    /// user no longer exists in the store.
    pub fn identify(&self, token: Option<&str>) -> Result<Option<Identity>> {
        self.db.with_store(|store| self.identify_in(store, token))
    }

    /// Identity lookup against a store the caller already holds, so the
    /// session and the user row come from the same store generation.
    fn identify_in(&self, store: &SqliteStorage, token: Option<&str>) -> Result<Option<Identity>> {
        let token = match token {
            Some(token) if !token.is_empty() => token,
            _ => return Ok(None),
        };
        let user_id = match self.sessions.resolve(token) {
            Some(user_id) => user_id,
            None => return Ok(None),
        };
        match store.get_user(user_id)? {
            Some(user) => Ok(Some(Identity::from(user))),
            None => {
                self.sessions.destroy(token);
                Ok(None)
            }
        }
    }

    /// Run `f` for an authenticated caller, identity and work under one
    /// hold of the store gate.
    fn with_identity<T>(
        &self,
        token: Option<&str>,
        f: impl FnOnce(&SqliteStorage, Identity) -> Result<T>,
    ) -> Result<T> {
        self.db.with_store(|store| {
            let identity = require_authenticated(self.identify_in(store, token)?)?;
            f(store, identity)
        })
    }

    fn require_admin_in(&self, store: &SqliteStorage, token: Option<&str>) -> Result<Identity> {
        let identity = require_authenticated(self.identify_in(store, token)?)?;
        require_admin(&identity)?;
        Ok(identity)
    }

    /// Create an account. The first account in a store becomes admin.
    pub fn register(&self, username: &str, password: &str) -> Result<User> {
        if username.trim().is_empty() {
            return Err(ShelfError::Validation(
                "Username cannot be empty".to_string(),
            ));
        }
        let digest = hash_password(password)?;
        let user = self
            .db
            .with_store(|store| store.insert_user(username, &digest))?;
        tracing::info!(username = %user.username, is_admin = user.is_admin, "registered user");
        Ok(user)
    }

    /// Check a username and password.
    ///
    /// Returns `None` for an unknown user and for a wrong password alike.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        self.db
            .with_store(|store| authenticate_in(store, username, password))
    }

    /// Authenticate and open a session.
    ///
    /// The session is issued under the same gate hold as the password
    /// check, so it can never outlive the store it was checked against.
    pub fn login(&self, username: &str, password: &str) -> Result<Login> {
        let login = self.db.with_store(|store| {
            match authenticate_in(store, username, password)? {
                Some(user) => Ok(Some(Login {
                    token: self.sessions.create(user.id)?,
                    identity: Identity::from(user),
                })),
                None => Ok(None),
            }
        })?;
        match login {
            Some(login) => {
                tracing::info!(username = %login.identity.username, "logged in");
                Ok(login)
            }
            None => {
                tracing::info!(username = %username, "login failed");
                Err(ShelfError::InvalidCredentials)
            }
        }
    }

    /// End a session. Unknown or missing tokens are not an error.
    pub fn logout(&self, token: Option<&str>) {
        if let Some(token) = token {
            self.sessions.destroy(token);
        }
    }

    /// The caller's own identity.
    pub fn whoami(&self, token: Option<&str>) -> Result<Identity> {
        self.with_identity(token, |_, identity| Ok(identity))
    }

    /// The caller's items matching `query`.
    pub fn list_items(&self, token: Option<&str>, query: &ItemQuery) -> Result<Vec<Item>> {
        self.with_identity(token, |store, identity| {
            store.list_items(identity.user_id, query)
        })
    }

    /// Add an item to the caller's collection.
    pub fn add_item(&self, token: Option<&str>, item: &NewItem) -> Result<Item> {
        self.with_identity(token, |store, identity| {
            store.insert_item(identity.user_id, item)
        })
    }

    /// Remove one of the caller's items.
    ///
    /// Missing items and items owned by others fail identically.
    pub fn remove_item(&self, token: Option<&str>, item_id: i64) -> Result<()> {
        self.with_identity(token, |store, identity| {
            let item = store
                .get_item(item_id)?
                .ok_or(ShelfError::NotFoundOrForbidden)?;
            require_owner(&identity, &item).map_err(|_| ShelfError::NotFoundOrForbidden)?;
            store.delete_item(identity.user_id, item_id)
        })
    }

    /// Every account other than the calling admin.
    pub fn list_users(&self, token: Option<&str>) -> Result<Vec<User>> {
        self.db.with_store(|store| {
            let identity = self.require_admin_in(store, token)?;
            store.list_users_except(identity.user_id)
        })
    }

    /// Set another user's password. Admin only.
    ///
    /// Hashing happens outside the store gate; the admin check, the target
    /// lookup and the write are repeated together once the digest is ready.
    pub fn reset_password(
        &self,
        token: Option<&str>,
        user_id: i64,
        new_password: &str,
    ) -> Result<User> {
        self.db
            .with_store(|store| self.require_admin_in(store, token))?;
        validate_password(new_password)?;
        let digest = hash_password(new_password)?;

        let (admin, target) = self.db.with_store(|store| {
            let admin = self.require_admin_in(store, token)?;
            let target = store
                .get_user(user_id)?
                .ok_or_else(|| ShelfError::NotFound(format!("user {}", user_id)))?;
            store.update_password_hash(target.id, &digest)?;
            Ok((admin, target))
        })?;
        tracing::info!(admin = %admin.username, target = %target.username, "password reset");
        Ok(target)
    }

    /// Download the live store file. Admin only.
    pub fn export_store(&self, token: Option<&str>) -> Result<Vec<u8>> {
        self.db
            .export(|store| self.require_admin_in(store, token).map(|_| ()))
    }

    /// Replace the whole store with an uploaded file. Admin only.
    ///
    /// On success every session is dropped before the new store serves a
    /// request: ids in the new store need not refer to the same people.
    pub fn import_store(
        &self,
        token: Option<&str>,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StoreCounts> {
        let identity = self
            .db
            .with_store(|store| self.require_admin_in(store, token))?;
        tracing::info!(admin = %identity.username, filename = %filename, "store import requested");
        self.db.import(
            filename,
            bytes,
            |store| self.require_admin_in(store, token).map(|_| ()),
            || self.sessions.clear(),
        )
    }
}

fn authenticate_in(store: &SqliteStorage, username: &str, password: &str) -> Result<Option<User>> {
    match store.find_credentials(username)? {
        Some((user, digest)) => {
            if verify_password(password, &digest) {
                Ok(Some(user))
            } else {
                Ok(None)
            }
        }
        None => {
            let dummy = DUMMY_DIGEST.get_or_init(|| hash_password("shelf-dummy").ok());
            if let Some(digest) = dummy {
                let _ = verify_password(password, digest);
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use crate::storage::{MediaCondition, MediaFormat};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Session store whose `clear` lingers, widening the window between a
    /// swap and the sessions being dropped.
    struct LingeringClear(MemorySessionStore);

    impl SessionStore for LingeringClear {
        fn create(&self, user_id: i64) -> Result<String> {
            self.0.create(user_id)
        }

        fn resolve(&self, token: &str) -> Option<i64> {
            self.0.resolve(token)
        }

        fn destroy(&self, token: &str) {
            self.0.destroy(token)
        }

        fn clear(&self) {
            std::thread::sleep(Duration::from_millis(150));
            self.0.clear()
        }
    }

    fn shelf(dir: &std::path::Path) -> Shelf {
        let db = Database::open(&dir.join("shelf.db"), &dir.join("uploads")).unwrap();
        Shelf::new(db, MemorySessionStore::default())
    }

    #[test]
    fn test_anonymous_calls_are_unauthenticated() {
        let dir = tempdir().unwrap();
        let shelf = shelf(dir.path());
        let err = shelf.list_items(None, &ItemQuery::new()).unwrap_err();
        assert!(matches!(err, ShelfError::Unauthenticated));
        let err = shelf
            .list_items(Some("forged-token"), &ItemQuery::new())
            .unwrap_err();
        assert!(matches!(err, ShelfError::Unauthenticated));
    }

    #[test]
    fn test_login_failure_is_uniform() {
        let dir = tempdir().unwrap();
        let shelf = shelf(dir.path());
        shelf.register("alice", "secret-1").unwrap();
        let wrong = shelf.login("alice", "nope").unwrap_err();
        let unknown = shelf.login("mallory", "nope").unwrap_err();
        assert_eq!(wrong.kind(), unknown.kind());
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[test]
    fn test_logout_ends_session() {
        let dir = tempdir().unwrap();
        let shelf = shelf(dir.path());
        shelf.register("alice", "secret-1").unwrap();
        let login = shelf.login("alice", "secret-1").unwrap();
        assert_eq!(shelf.whoami(Some(&login.token)).unwrap().username, "alice");
        shelf.logout(Some(&login.token));
        shelf.logout(Some(&login.token));
        shelf.logout(None);
        assert!(shelf.whoami(Some(&login.token)).is_err());
    }

    #[test]
    fn test_forbidden_has_no_side_effect() {
        let dir = tempdir().unwrap();
        let shelf = shelf(dir.path());
        let alice = shelf.register("alice", "a-pass").unwrap();
        shelf.register("bob", "b-pass").unwrap();
        let bob = shelf.login("bob", "b-pass").unwrap();

        let err = shelf
            .reset_password(Some(&bob.token), alice.id, "owned")
            .unwrap_err();
        assert!(matches!(err, ShelfError::Forbidden));
        assert!(shelf.authenticate("alice", "a-pass").unwrap().is_some());
        assert!(shelf.authenticate("alice", "owned").unwrap().is_none());
    }

    #[test]
    fn test_remove_missing_and_foreign_look_the_same() {
        let dir = tempdir().unwrap();
        let shelf = shelf(dir.path());
        shelf.register("alice", "a-pass").unwrap();
        shelf.register("bob", "b-pass").unwrap();
        let alice = shelf.login("alice", "a-pass").unwrap();
        let bob = shelf.login("bob", "b-pass").unwrap();

        let item = shelf
            .add_item(
                Some(&alice.token),
                &NewItem::new("Dune", MediaFormat::BluRay, MediaCondition::NewSealed),
            )
            .unwrap();

        let foreign = shelf.remove_item(Some(&bob.token), item.id).unwrap_err();
        let missing = shelf.remove_item(Some(&bob.token), 9999).unwrap_err();
        assert!(matches!(foreign, ShelfError::NotFoundOrForbidden));
        assert!(matches!(missing, ShelfError::NotFoundOrForbidden));
        assert_eq!(foreign.to_string(), missing.to_string());
    }

    #[test]
    fn test_reset_password_unknown_user() {
        let dir = tempdir().unwrap();
        let shelf = shelf(dir.path());
        shelf.register("alice", "a-pass").unwrap();
        let alice = shelf.login("alice", "a-pass").unwrap();
        let err = shelf
            .reset_password(Some(&alice.token), 404, "whatever")
            .unwrap_err();
        assert!(matches!(err, ShelfError::NotFound(_)));
        let err = shelf
            .reset_password(Some(&alice.token), alice.identity.user_id, " ")
            .unwrap_err();
        assert!(matches!(err, ShelfError::Validation(_)));
    }

    #[test]
    fn test_list_users_is_admin_only() {
        let dir = tempdir().unwrap();
        let shelf = shelf(dir.path());
        shelf.register("alice", "a-pass").unwrap();
        shelf.register("bob", "b-pass").unwrap();
        let alice = shelf.login("alice", "a-pass").unwrap();
        let bob = shelf.login("bob", "b-pass").unwrap();

        let users = shelf.list_users(Some(&alice.token)).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "bob");
        assert!(matches!(
            shelf.list_users(Some(&bob.token)),
            Err(ShelfError::Forbidden)
        ));
    }

    #[test]
    fn test_import_clears_sessions() {
        let dir = tempdir().unwrap();
        let shelf = shelf(dir.path());
        shelf.register("alice", "a-pass").unwrap();
        let alice = shelf.login("alice", "a-pass").unwrap();
        let artifact = shelf.export_store(Some(&alice.token)).unwrap();
        shelf
            .import_store(Some(&alice.token), "backup.db", &artifact)
            .unwrap();
        assert!(matches!(
            shelf.whoami(Some(&alice.token)),
            Err(ShelfError::Unauthenticated)
        ));
        assert!(shelf.login("alice", "a-pass").is_ok());
    }

    #[test]
    fn test_old_session_never_resolves_against_imported_store() {
        let dir = tempdir().unwrap();

        // Same user ids, different people.
        let source = shelf(&dir.path().join("source"));
        source.register("alice", "a-pass").unwrap();
        source.register("carol", "c-pass").unwrap();
        let alice = source.login("alice", "a-pass").unwrap();
        let artifact = source.export_store(Some(&alice.token)).unwrap();

        let live_dir = dir.path().join("live");
        let db = Database::open(&live_dir.join("shelf.db"), &live_dir.join("uploads")).unwrap();
        let live = Shelf::new(db, LingeringClear(MemorySessionStore::default()));
        live.register("root", "r-pass").unwrap();
        let mallory = live.register("mallory", "m-pass").unwrap();
        assert_eq!(mallory.id, 2);
        let root = live.login("root", "r-pass").unwrap();
        let stale = live.login("mallory", "m-pass").unwrap();

        std::thread::scope(|scope| {
            let watcher = scope.spawn(|| loop {
                match live.whoami(Some(&stale.token)) {
                    Ok(identity) => assert_eq!(identity.username, "mallory"),
                    Err(ShelfError::Unauthenticated) => break,
                    Err(err) => panic!("unexpected error: {}", err),
                }
            });
            std::thread::sleep(Duration::from_millis(20));
            live.import_store(Some(&root.token), "backup.db", &artifact)
                .unwrap();
            watcher.join().unwrap();
        });

        assert!(live.identify(Some(&stale.token)).unwrap().is_none());
        let carol = live.login("carol", "c-pass").unwrap();
        assert_eq!(carol.identity.user_id, 2);
    }

    #[test]
    fn test_import_by_non_admin_keeps_sessions() {
        let dir = tempdir().unwrap();
        let shelf = shelf(dir.path());
        shelf.register("alice", "a-pass").unwrap();
        shelf.register("bob", "b-pass").unwrap();
        let alice = shelf.login("alice", "a-pass").unwrap();
        let bob = shelf.login("bob", "b-pass").unwrap();
        let artifact = shelf.export_store(Some(&alice.token)).unwrap();

        let err = shelf
            .import_store(Some(&bob.token), "backup.db", &artifact)
            .unwrap_err();
        assert!(matches!(err, ShelfError::Forbidden));
        assert_eq!(shelf.whoami(Some(&alice.token)).unwrap().username, "alice");
        assert_eq!(shelf.lifecycle_state(), LifecycleState::Idle);
    }
}
