// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use ledger_data::patch::PatchError;
use thiserror::Error;

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Error taxonomy of the storage engine.
///
/// Every public operation returns one of these; `name()` yields the
/// wire-visible tag and `http_status_code()` the transport hint.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} not found ({key})")]
    NotFound { entity: &'static str, key: String },

    #[error("duplicate {entity} ({key})")]
    Duplicate { entity: &'static str, key: String },

    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("not allowed: {reason}")]
    NotAllowed { reason: String },

    #[error("invalid data: {reason}")]
    Data { reason: String },

    #[error("invalid access: {reason}")]
    InvalidAccess { reason: String },

    #[error("invalid type: {reason}")]
    Type { reason: String },

    #[error("storage operation timed out")]
    Timeout,

    #[error("document store failure")]
    Db(#[source] sqlx::Error),

    #[error("document encoding failure")]
    Encoding(#[from] serde_json::Error),
}

impl StorageError {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::Duplicate { .. } => "DuplicateError",
            Self::InvalidState { .. } => "InvalidState",
            Self::NotAllowed { .. } => "NotAllowed",
            Self::Data { .. } | Self::Encoding(_) => "DataError",
            Self::InvalidAccess { .. } => "InvalidAccess",
            Self::Type { .. } => "TypeError",
            Self::Timeout => "Timeout",
            Self::Db(_) => "DatabaseError",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Duplicate { .. } | Self::InvalidState { .. } => 409,
            Self::NotAllowed { .. } | Self::InvalidAccess { .. } => 403,
            Self::Data { .. } | Self::Encoding(_) | Self::Type { .. } => 400,
            Self::Timeout => 503,
            Self::Db(_) => 500,
        }
    }

    pub(crate) fn not_found(
        entity: &'static str,
        key: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub(crate) fn duplicate(
        entity: &'static str,
        key: impl Into<String>,
    ) -> Self {
        Self::Duplicate {
            entity,
            key: key.into(),
        }
    }

    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_allowed(reason: impl Into<String>) -> Self {
        Self::NotAllowed {
            reason: reason.into(),
        }
    }

    pub(crate) fn data(reason: impl Into<String>) -> Self {
        Self::Data {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_access(reason: impl Into<String>) -> Self {
        Self::InvalidAccess {
            reason: reason.into(),
        }
    }

    pub(crate) fn bad_type(reason: impl Into<String>) -> Self {
        Self::Type {
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut => Self::Timeout,
            e => Self::Db(e),
        }
    }
}

impl From<PatchError> for StorageError {
    fn from(e: PatchError) -> Self {
        Self::NotAllowed {
            reason: e.to_string(),
        }
    }
}

/// True when the underlying driver rejected a write for violating a
/// unique index.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_and_status_hints() {
        let e = StorageError::not_found("block", "hb1");
        assert_eq!(e.name(), "NotFound");
        assert_eq!(e.http_status_code(), 404);

        let e = StorageError::duplicate("event", "he1");
        assert_eq!(e.name(), "DuplicateError");
        assert_eq!(e.http_status_code(), 409);

        let e = StorageError::bad_type("recordId must be a string");
        assert_eq!(e.name(), "TypeError");
        assert_eq!(e.http_status_code(), 400);

        assert_eq!(StorageError::Timeout.http_status_code(), 503);
    }

    #[test]
    fn pool_timeout_maps_to_timeout() {
        let e: StorageError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(e, StorageError::Timeout));
    }

    #[test]
    fn patch_errors_map_to_not_allowed() {
        let e: StorageError =
            PatchError::OutsideMeta("block.id".to_owned()).into();
        assert_eq!(e.name(), "NotAllowed");
    }
}
