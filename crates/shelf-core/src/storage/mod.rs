//! Storage abstraction for Shelf.
//!
//! This module defines the `StorageEngine` trait and core types for the
//! collection repository.
//!
//! ## Architecture
//!
//! - `SqliteStorage`: a single SQLite file holding users and items
//!
//! The service layer only talks to the trait; the lifecycle manager
//! additionally relies on `SqliteStorage` being one self-contained file.

pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export public types
pub use sqlite::SqliteStorage;
pub use traits::StorageEngine;
pub use types::{
    Item, ItemQuery, MediaCondition, MediaFormat, NewItem, SortOrder, StoreCounts, StoreMetadata,
    User,
};
