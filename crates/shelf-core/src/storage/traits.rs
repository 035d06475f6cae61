//! Storage engine trait definition.
//!
//! The `StorageEngine` trait is the repository interface the service layer
//! talks to. Every method runs as one transaction; nothing spans calls.

use std::path::Path;

use super::types::{Item, ItemQuery, NewItem, StoreCounts, StoreMetadata, User};
use crate::error::Result;

/// Repository interface over users and their items.
///
/// All implementations must ensure:
/// - Usernames are unique (exact, case-sensitive match)
/// - The first user ever registered is the only bootstrap admin
/// - Items are only visible to and removable by their owner
pub trait StorageEngine: Send + Sync {
    /// Create a new store at the specified path.
    ///
    /// # Errors
    ///
    /// Returns `ShelfError::Storage` if the file already exists or cannot be
    /// written.
    fn create(path: &Path) -> Result<()>
    where
        Self: Sized;

    /// Open an existing store.
    ///
    /// # Errors
    ///
    /// Returns `ShelfError::NotFound` if the file is missing and
    /// `ShelfError::InvalidFormat` if it is not a store of this format.
    fn open(path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Get store metadata.
    fn metadata(&self) -> Result<StoreMetadata>;

    // --- User operations ---

    /// Register a new user with an already-hashed password.
    ///
    /// The user is admin iff no other user exists yet.
    ///
    /// # Errors
    ///
    /// Returns `ShelfError::UsernameTaken` if the name exists.
    fn insert_user(&self, username: &str, password_hash: &str) -> Result<User>;

    /// Get a user by id.
    fn get_user(&self, id: i64) -> Result<Option<User>>;

    /// Get a user and their stored password digest by exact username.
    fn find_credentials(&self, username: &str) -> Result<Option<(User, String)>>;

    /// List all users except `id`, ordered by id.
    fn list_users_except(&self, id: i64) -> Result<Vec<User>>;

    /// Replace a user's password digest.
    ///
    /// # Errors
    ///
    /// Returns `ShelfError::NotFound` if the user does not exist.
    fn update_password_hash(&self, user_id: i64, password_hash: &str) -> Result<()>;

    // --- Item operations ---

    /// Insert an item owned by `owner_id`.
    fn insert_item(&self, owner_id: i64, item: &NewItem) -> Result<Item>;

    /// Get an item by id, regardless of owner.
    fn get_item(&self, id: i64) -> Result<Option<Item>>;

    /// List items owned by `owner_id` matching the query.
    fn list_items(&self, owner_id: i64, query: &ItemQuery) -> Result<Vec<Item>>;

    /// Delete an item only if it is owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns `ShelfError::NotFoundOrForbidden` if the item is missing or
    /// owned by someone else.
    fn delete_item(&self, owner_id: i64, id: i64) -> Result<()>;

    // --- Maintenance operations ---

    /// Count users and items.
    fn counts(&self) -> Result<StoreCounts>;

    /// Check store integrity.
    ///
    /// Verifies:
    /// - SQLite page integrity
    /// - Foreign key relationships
    /// - Required metadata keys
    fn check_integrity(&self) -> Result<()>;
}
