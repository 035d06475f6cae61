//! SQLite storage backend.
//!
//! The store is a single SQLite file in rollback-journal mode, so the file
//! on disk is self-contained whenever no transaction is open. That property
//! is what lets the lifecycle manager export and swap it as an opaque file.

mod row;
pub mod validation;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use crate::error::{Result, ShelfError};
use crate::storage::traits::StorageEngine;
use crate::storage::types::{Item, ItemQuery, NewItem, StoreCounts, StoreMetadata, User};

use row::{parse_timestamp, ItemRow, UserRow, ITEM_COLUMNS, USER_COLUMNS};
use validation::{check_schema, FORMAT_VERSION, REQUIRED_META_KEYS};

const SCHEMA: &str = r#"
    CREATE TABLE meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        is_admin INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE TABLE items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        format TEXT NOT NULL,
        barcode TEXT,
        condition TEXT NOT NULL,
        created_at TEXT NOT NULL,

        FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
    );

    CREATE INDEX items_owner ON items (owner_id);
"#;

/// SQLite-backed store.
pub struct SqliteStorage {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open the store at `path`, creating it first if it does not exist.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::create(path)?;
            tracing::info!(path = %path.display(), "created new store");
        }
        Self::open(path)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the backing file while holding the connection lock.
    ///
    /// No transaction can be open while the lock is held, so the bytes are a
    /// consistent copy of the committed store.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        let _conn = self.lock_conn()?;
        Ok(fs::read(&self.path)?)
    }

    /// Close the connection, flushing any pending state.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| ShelfError::Storage("SQLite connection poisoned".to_string()))?;
        conn.close().map_err(|(_, err)| ShelfError::from(err))
    }

    /// Lock the database connection, returning an error if the mutex is poisoned.
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ShelfError::Storage("SQLite connection poisoned".to_string()))
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mode: String = conn.query_row("PRAGMA journal_mode = DELETE", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("delete") {
            return Err(ShelfError::Storage(format!(
                "Unexpected journal mode: {}",
                mode
            )));
        }
        Ok(())
    }

    fn now_timestamp() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Next item timestamp: now, or one microsecond past the newest existing
    /// item if the clock has not moved forward.
    fn next_item_timestamp(conn: &Connection) -> Result<String> {
        let now = Utc::now();
        let latest: Option<String> =
            conn.query_row("SELECT MAX(created_at) FROM items", [], |row| row.get(0))?;
        let stamp = match latest {
            Some(value) => {
                let latest: DateTime<Utc> = parse_timestamp(&value)?;
                if now > latest {
                    now
                } else {
                    latest + Duration::microseconds(1)
                }
            }
            None => now,
        };
        Ok(stamp.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

impl StorageEngine for SqliteStorage {
    fn create(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(ShelfError::Storage("Store file already exists".to_string()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Build the schema in a sibling temp file so a crash never leaves a
        // half-initialized store at `path`.
        let temp_path = crate::fs::sibling_temp_path(path, "create")?;
        let build = || -> Result<()> {
            let conn = Connection::open(&temp_path)?;
            Self::configure(&conn)?;
            conn.execute_batch(SCHEMA)?;

            let store_id = Uuid::new_v4();
            let created_at = Self::now_timestamp();
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?, ?)",
                ["format_version", FORMAT_VERSION],
            )?;
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?, ?)",
                ["store_id", &store_id.to_string()],
            )?;
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?, ?)",
                ["created_at", &created_at],
            )?;
            conn.close().map_err(|(_, err)| ShelfError::from(err))?;
            Ok(())
        };
        if let Err(err) = build() {
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }

        crate::fs::replace_atomic(&temp_path, path)?;
        Ok(())
    }

    fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ShelfError::NotFound(format!(
                "store file {}",
                path.display()
            )));
        }

        validation::validate_store_file(path)?;

        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        check_schema(&conn)?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    fn metadata(&self) -> Result<StoreMetadata> {
        let conn = self.lock_conn()?;

        let read = |key: &str| -> Result<String> {
            Ok(conn.query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
                row.get(0)
            })?)
        };
        let format_version = read("format_version")?;
        let store_id = Uuid::parse_str(&read("store_id")?)
            .map_err(|e| ShelfError::Storage(format!("Invalid store_id in metadata: {}", e)))?;
        let created_at = parse_timestamp(&read("created_at")?)?;

        Ok(StoreMetadata {
            format_version,
            store_id,
            created_at,
        })
    }

    fn insert_user(&self, username: &str, password_hash: &str) -> Result<User> {
        if username.trim().is_empty() {
            return Err(ShelfError::Validation(
                "Username cannot be empty".to_string(),
            ));
        }

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM users WHERE username = ?",
                [username],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(ShelfError::UsernameTaken);
        }

        let user_count: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let is_admin = user_count == 0;
        let created_at = Self::now_timestamp();

        let inserted = tx.execute(
            "INSERT INTO users (username, password_hash, is_admin, created_at) VALUES (?, ?, ?, ?)",
            (username, password_hash, is_admin, &created_at),
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(ShelfError::UsernameTaken);
            }
            Err(err) => return Err(err.into()),
        }
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(User {
            id,
            username: username.to_string(),
            is_admin,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                [id],
                UserRow::from_row,
            )
            .optional()?;
        row.map(User::try_from).transpose()
    }

    fn find_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {}, password_hash FROM users WHERE username = ?",
                    USER_COLUMNS
                ),
                [username],
                |row| Ok((UserRow::from_row(row)?, row.get::<_, String>(4)?)),
            )
            .optional()?;
        match row {
            Some((user_row, digest)) => Ok(Some((User::try_from(user_row)?, digest))),
            None => Ok(None),
        }
    }

    fn list_users_except(&self, id: i64) -> Result<Vec<User>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE id != ? ORDER BY id ASC",
            USER_COLUMNS
        ))?;
        let rows = stmt.query_map([id], UserRow::from_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(User::try_from(row?)?);
        }
        Ok(users)
    }

    fn update_password_hash(&self, user_id: i64, password_hash: &str) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE users SET password_hash = ? WHERE id = ?",
            (password_hash, user_id),
        )?;
        if updated == 0 {
            return Err(ShelfError::NotFound(format!("user {}", user_id)));
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_item(&self, owner_id: i64, item: &NewItem) -> Result<Item> {
        let title = item.title.trim();
        if title.is_empty() {
            return Err(ShelfError::Validation("Title cannot be empty".to_string()));
        }
        let barcode = item
            .barcode
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owner_exists: Option<i64> = tx
            .query_row("SELECT id FROM users WHERE id = ?", [owner_id], |row| {
                row.get(0)
            })
            .optional()?;
        if owner_exists.is_none() {
            return Err(ShelfError::NotFound(format!("user {}", owner_id)));
        }

        let created_at = Self::next_item_timestamp(&tx)?;
        tx.execute(
            "INSERT INTO items (owner_id, title, format, barcode, condition, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            (
                owner_id,
                title,
                item.format.as_str(),
                barcode,
                item.condition.as_str(),
                &created_at,
            ),
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Item {
            id,
            owner_id,
            title: title.to_string(),
            format: item.format,
            barcode: barcode.map(str::to_string),
            condition: item.condition,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS),
                [id],
                ItemRow::from_row,
            )
            .optional()?;
        row.map(Item::try_from).transpose()
    }

    fn list_items(&self, owner_id: i64, query: &ItemQuery) -> Result<Vec<Item>> {
        let conn = self.lock_conn()?;

        let mut conditions = vec!["owner_id = ?".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(owner_id)];

        if let Some(format) = query.format {
            conditions.push("format = ?".to_string());
            params.push(Box::new(format.as_str()));
        }

        let sql = format!(
            "SELECT {} FROM items WHERE {} ORDER BY {}",
            ITEM_COLUMNS,
            conditions.join(" AND "),
            query.sort.order_by()
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), ItemRow::from_row)?;

        // SQLite's LIKE/lower() only fold ASCII, so the title search runs here.
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_lowercase);

        let mut items = Vec::new();
        for row in rows {
            let item = Item::try_from(row?)?;
            if let Some(ref needle) = needle {
                if !item.title.to_lowercase().contains(needle.as_str()) {
                    continue;
                }
            }
            items.push(item);
        }
        Ok(items)
    }

    fn delete_item(&self, owner_id: i64, id: i64) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM items WHERE id = ? AND owner_id = ?",
            (id, owner_id),
        )?;
        if deleted == 0 {
            return Err(ShelfError::NotFoundOrForbidden);
        }
        tx.commit()?;
        Ok(())
    }

    fn counts(&self) -> Result<StoreCounts> {
        let conn = self.lock_conn()?;
        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let items: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(StoreCounts {
            users: users as u64,
            items: items as u64,
        })
    }

    fn check_integrity(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(ShelfError::Storage(format!(
                "SQLite integrity check failed: {}",
                integrity
            )));
        }

        let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
        let mut rows = stmt.query([])?;
        if rows.next()?.is_some() {
            return Err(ShelfError::Storage(
                "Foreign key integrity check failed".to_string(),
            ));
        }

        let placeholders = vec!["?"; REQUIRED_META_KEYS.len()].join(", ");
        let metadata_count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM meta WHERE key IN ({})",
                placeholders
            ),
            REQUIRED_META_KEYS,
            |row| row.get(0),
        )?;
        if metadata_count < REQUIRED_META_KEYS.len() as i64 {
            return Err(ShelfError::Storage(
                "Metadata table missing required keys".to_string(),
            ));
        }

        Ok(())
    }
}
