//! JSON-backed persistence.
//!
//! Every store owns one flat JSON file under the data directory and
//! re-reads it on each access, so edits made by another process (or by
//! hand) are picked up without a restart. Writes are serialized per
//! store and land atomically.

pub mod json;
mod prefix;
mod premium;
mod sessions;

use thiserror::Error;

pub use prefix::{PrefixStore, validate_prefix};
pub use premium::{Plan, PremiumGrant, PremiumRegistry};
pub use sessions::{SessionRecord, SessionRegistry};

/// Errors raised by the JSON stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize store: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Invalid prefix: {0}")]
    InvalidPrefix(String),

    #[error("No record for user {0}")]
    NotFound(i64),

    #[error("Grant of {0} days is out of range")]
    GrantTooLong(u32),
}
