//! Access control guards.
//!
//! Guards are pure checks over an [`Identity`]; callers run them before any
//! mutation so a failure never leaves a side effect behind.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfError};
use crate::storage::{Item, User};

/// The authenticated principal behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            is_admin: user.is_admin,
        }
    }
}

/// Fail with `Unauthenticated` unless an identity is present.
pub fn require_authenticated(identity: Option<Identity>) -> Result<Identity> {
    identity.ok_or(ShelfError::Unauthenticated)
}

/// Fail with `Forbidden` unless `identity` owns `item`.
pub fn require_owner(identity: &Identity, item: &Item) -> Result<()> {
    if item.owner_id == identity.user_id {
        Ok(())
    } else {
        Err(ShelfError::Forbidden)
    }
}

/// Fail with `Forbidden` unless `identity` is an admin.
pub fn require_admin(identity: &Identity) -> Result<()> {
    if identity.is_admin {
        Ok(())
    } else {
        Err(ShelfError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MediaCondition, MediaFormat};
    use chrono::Utc;

    fn identity(user_id: i64, is_admin: bool) -> Identity {
        Identity {
            user_id,
            username: format!("user{}", user_id),
            is_admin,
        }
    }

    fn item_owned_by(owner_id: i64) -> Item {
        Item {
            id: 1,
            owner_id,
            title: "Dune".to_string(),
            format: MediaFormat::BluRay,
            barcode: None,
            condition: MediaCondition::NewSealed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_anonymous_is_rejected() {
        let err = require_authenticated(None).unwrap_err();
        assert!(matches!(err, ShelfError::Unauthenticated));
        assert_eq!(
            require_authenticated(Some(identity(1, false))).unwrap().user_id,
            1
        );
    }

    #[test]
    fn test_owner_check() {
        let item = item_owned_by(1);
        assert!(require_owner(&identity(1, false), &item).is_ok());
        assert!(matches!(
            require_owner(&identity(2, false), &item),
            Err(ShelfError::Forbidden)
        ));
    }

    #[test]
    fn test_admin_does_not_override_ownership() {
        let item = item_owned_by(2);
        assert!(require_owner(&identity(1, true), &item).is_err());
    }

    #[test]
    fn test_admin_check() {
        assert!(require_admin(&identity(1, true)).is_ok());
        assert!(matches!(
            require_admin(&identity(2, false)),
            Err(ShelfError::Forbidden)
        ));
    }
}
