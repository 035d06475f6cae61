//! Store file format checks.
//!
//! Used when opening the live store and when vetting an import artifact
//! before it is allowed anywhere near the live path.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use uuid::Uuid;

use crate::error::{Result, ShelfError};
use crate::storage::types::{Item, User};

use super::row::{parse_timestamp, ItemRow, UserRow, ITEM_COLUMNS, USER_COLUMNS};

/// Current store format version.
pub const FORMAT_VERSION: &str = "1";

/// Every SQLite database file starts with this header.
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Required metadata keys.
pub const REQUIRED_META_KEYS: [&str; 3] = ["format_version", "store_id", "created_at"];

const REQUIRED_TABLES: [(&str, &[&str]); 3] = [
    ("meta", &["key", "value"]),
    (
        "users",
        &["id", "username", "password_hash", "is_admin", "created_at"],
    ),
    (
        "items",
        &[
            "id",
            "owner_id",
            "title",
            "format",
            "barcode",
            "condition",
            "created_at",
        ],
    ),
];

/// Check that `bytes` begin with the SQLite file header.
pub fn check_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < SQLITE_HEADER.len() || &bytes[..SQLITE_HEADER.len()] != SQLITE_HEADER {
        return Err(ShelfError::InvalidFormat(
            "not an SQLite database".to_string(),
        ));
    }
    Ok(())
}

fn check_file_header(path: &Path) -> Result<()> {
    let mut header = Vec::with_capacity(SQLITE_HEADER.len());
    File::open(path)?
        .take(SQLITE_HEADER.len() as u64)
        .read_to_end(&mut header)?;
    check_header(&header)
}

/// Check that `conn` holds the expected tables, columns and format version.
pub fn check_schema(conn: &Connection) -> Result<()> {
    for (table, columns) in REQUIRED_TABLES {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let present: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<_>>()?;
        if present.is_empty() {
            return Err(ShelfError::InvalidFormat(format!(
                "missing table '{}'",
                table
            )));
        }
        if let Some(missing) = columns.iter().find(|c| !present.iter().any(|p| p.as_str() == **c)) {
            return Err(ShelfError::InvalidFormat(format!(
                "table '{}' is missing column '{}'",
                table, missing
            )));
        }
    }

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'format_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match version.as_deref() {
        Some(FORMAT_VERSION) => Ok(()),
        Some(other) => Err(ShelfError::InvalidFormat(format!(
            "unsupported format version '{}'",
            other
        ))),
        None => Err(ShelfError::InvalidFormat(
            "missing format version".to_string(),
        )),
    }
}

/// Check the constraints the store relies on: unique usernames and items
/// that cascade away with their owner.
fn check_constraints(conn: &Connection) -> Result<()> {
    let mut unique_username = false;
    let mut stmt = conn.prepare("PRAGMA index_list(users)")?;
    let indexes: Vec<(String, bool)> = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, bool>(2)?)))?
        .collect::<rusqlite::Result<_>>()?;
    for (name, unique) in indexes {
        if !unique {
            continue;
        }
        let quoted = name.replace('"', "\"\"");
        let mut info = conn.prepare(&format!("PRAGMA index_info(\"{}\")", quoted))?;
        let columns: Vec<Option<String>> = info
            .query_map([], |row| row.get(2))?
            .collect::<rusqlite::Result<_>>()?;
        if columns == [Some("username".to_string())] {
            unique_username = true;
        }
    }
    if !unique_username {
        return Err(ShelfError::InvalidFormat(
            "users.username is not unique".to_string(),
        ));
    }

    let mut stmt = conn.prepare("PRAGMA foreign_key_list(items)")?;
    let keys: Vec<(String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(2)?, row.get(3)?, row.get(6)?)))?
        .collect::<rusqlite::Result<_>>()?;
    let cascades = keys.iter().any(|(table, from, on_delete)| {
        table == "users" && from == "owner_id" && on_delete.eq_ignore_ascii_case("CASCADE")
    });
    if !cascades {
        return Err(ShelfError::InvalidFormat(
            "items.owner_id does not cascade from users".to_string(),
        ));
    }
    Ok(())
}

/// Check that every row means something: no dangling owners, complete
/// metadata, and users and items that decode into domain types.
fn check_contents(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let mut violations = stmt.query([])?;
    if violations.next()?.is_some() {
        return Err(ShelfError::InvalidFormat(
            "foreign key violations".to_string(),
        ));
    }

    for key in REQUIRED_META_KEYS {
        let value: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        let value = value
            .ok_or_else(|| ShelfError::InvalidFormat(format!("missing metadata key '{}'", key)))?;
        match key {
            "store_id" => {
                Uuid::parse_str(&value)
                    .map_err(|e| ShelfError::InvalidFormat(format!("invalid store_id: {}", e)))?;
            }
            "created_at" => {
                parse_timestamp(&value)?;
            }
            _ => {}
        }
    }

    let mut stmt = conn.prepare(&format!("SELECT {} FROM users", USER_COLUMNS))?;
    for row in stmt.query_map([], UserRow::from_row)? {
        User::try_from(row?)?;
    }
    let mut stmt = conn.prepare(&format!("SELECT {} FROM items", ITEM_COLUMNS))?;
    for row in stmt.query_map([], ItemRow::from_row)? {
        Item::try_from(row?)?;
    }
    Ok(())
}

fn as_invalid_format(err: ShelfError) -> ShelfError {
    match err {
        ShelfError::InvalidFormat(_) => err,
        other => ShelfError::InvalidFormat(other.to_string()),
    }
}

/// Fully vet a store file without modifying it.
///
/// Checks the header, opens the file read-only, runs `PRAGMA quick_check`,
/// verifies the schema and its constraints, then decodes every row. Any
/// failure is reported as `ShelfError::InvalidFormat`.
pub fn validate_store_file(path: &Path) -> Result<()> {
    check_file_header(path)?;

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| ShelfError::InvalidFormat(format!("cannot open: {}", e)))?;

    let quick_check: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(|e| ShelfError::InvalidFormat(format!("unreadable database: {}", e)))?;
    if quick_check != "ok" {
        return Err(ShelfError::InvalidFormat(format!(
            "integrity check failed: {}",
            quick_check
        )));
    }

    check_schema(&conn).map_err(as_invalid_format)?;
    check_constraints(&conn).map_err(as_invalid_format)?;
    check_contents(&conn).map_err(as_invalid_format)
}
