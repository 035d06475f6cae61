//! Error types for Shelf core operations.
//!
//! Every failure is request-scoped: callers can retry or correct their input.
//! The server layer maps these to stable wire kinds via [`ShelfError::kind`].

use thiserror::Error;

/// Result type alias for Shelf operations.
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Core error type for Shelf operations.
#[derive(Debug, Error)]
pub enum ShelfError {
    /// No session, or the session is invalid or expired
    #[error("Authentication required")]
    Unauthenticated,

    /// Login with an unknown username or a wrong password
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Authenticated, but lacking ownership or admin privilege
    #[error("You do not have permission to perform this action")]
    Forbidden,

    /// Registration with a name that already exists
    #[error("Username already taken")]
    UsernameTaken,

    /// Delete of a missing item or one owned by someone else
    #[error("Item not found or you do not have permission to delete it")]
    NotFoundOrForbidden,

    /// Generic resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Import artifact is not a store of the expected format
    #[error("Invalid store file: {0}")]
    InvalidFormat(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The live store could not be reopened after a swap
    #[error("Store is unavailable")]
    StoreUnavailable,

    /// Storage backend error (generic)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite-specific storage error
    #[error("SQLite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Password hashing error
    #[error("Credential error: {0}")]
    Crypto(String),
}

impl ShelfError {
    /// Stable machine-readable name for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            ShelfError::Unauthenticated => "unauthenticated",
            ShelfError::InvalidCredentials => "invalid_credentials",
            ShelfError::Forbidden => "forbidden",
            ShelfError::UsernameTaken => "username_taken",
            ShelfError::NotFoundOrForbidden => "not_found_or_forbidden",
            ShelfError::NotFound(_) => "not_found",
            ShelfError::InvalidFormat(_) => "invalid_format",
            ShelfError::Validation(_) => "validation",
            ShelfError::StoreUnavailable => "store_unavailable",
            ShelfError::Storage(_) | ShelfError::Sqlite { .. } => "storage",
            ShelfError::Io { .. } => "io",
            ShelfError::Crypto(_) => "credential",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(ShelfError::Unauthenticated.kind(), "unauthenticated");
        assert_eq!(ShelfError::Forbidden.kind(), "forbidden");
        assert_eq!(
            ShelfError::NotFoundOrForbidden.kind(),
            "not_found_or_forbidden"
        );
        assert_eq!(
            ShelfError::InvalidFormat("bad header".to_string()).kind(),
            "invalid_format"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let err: ShelfError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().contains("disk"));
    }
}
