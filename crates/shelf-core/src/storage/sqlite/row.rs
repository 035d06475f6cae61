//! Row types for database queries.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::error::{Result, ShelfError};
use crate::storage::types::{Item, User};

/// Column list matching [`UserRow::from_row`].
pub const USER_COLUMNS: &str = "id, username, is_admin, created_at";

/// Column list matching [`ItemRow::from_row`].
pub const ITEM_COLUMNS: &str = "id, owner_id, title, format, barcode, condition, created_at";

/// Raw row data from the users table, before parsing into domain types.
#[derive(Debug)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub created_at: String,
}

impl UserRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            is_admin: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = ShelfError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            username: row.username,
            is_admin: row.is_admin,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

/// Raw row data from the items table.
#[derive(Debug)]
pub struct ItemRow {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub format: String,
    pub barcode: Option<String>,
    pub condition: String,
    pub created_at: String,
}

impl ItemRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            format: row.get(3)?,
            barcode: row.get(4)?,
            condition: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl TryFrom<ItemRow> for Item {
    type Error = ShelfError;

    fn try_from(row: ItemRow) -> Result<Self> {
        let format = row
            .format
            .parse()
            .map_err(|_| ShelfError::Storage(format!("Invalid item format: {}", row.format)))?;
        let condition = row.condition.parse().map_err(|_| {
            ShelfError::Storage(format!("Invalid item condition: {}", row.condition))
        })?;
        Ok(Item {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            format,
            barcode: row.barcode,
            condition,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| ShelfError::Storage(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc))
}
