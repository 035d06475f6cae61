//! # Shelf Core
//!
//! Core library for Shelf - a multi-user media collection tracker backed by
//! a single SQLite file.
//!
//! This crate provides the domain logic, storage and session handling
//! independent of any network surface.
//!
//! ## Architecture
//!
//! - **credential**: Password hashing and verification
//! - **session**: Opaque session tokens with idle expiry
//! - **access**: Authentication, ownership and admin guards
//! - **storage**: Storage engine trait and the SQLite implementation
//! - **lifecycle**: Store export and whole-file import
//! - **service**: Request-level operations tying the above together

pub mod access;
pub mod credential;
pub mod error;
pub mod fs;
pub mod lifecycle;
pub mod service;
pub mod session;
pub mod storage;

pub use access::Identity;
pub use error::{Result, ShelfError};
pub use lifecycle::{Database, LifecycleState};
pub use service::{Login, Shelf};
pub use session::{MemorySessionStore, SessionStore};
pub use storage::{
    Item, ItemQuery, MediaCondition, MediaFormat, NewItem, SortOrder, SqliteStorage,
    StorageEngine, StoreCounts, User,
};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
