//! The `Lease` data model: a named row backing a distributed
//! lock, with `(owner, locked_at)` serving as a fencing token.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A snapshot of a named lease row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub owner: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl Lease {
    pub fn vacant(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
            locked_at: None,
        }
    }

    /// A lease is expired once its `locked_at` is older than `ttl`. A
    /// never-held lease (`locked_at=None`) is always eligible to acquire.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        match self.locked_at {
            Some(locked_at) => now - locked_at > ttl,
            None => true,
        }
    }
}

/// The outcome of a `TryAcquire` call: either the lease is now held by the
/// caller (carrying the fencing token to present on the next `Confirm`),
/// or someone else holds an unexpired lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { locked_at: DateTime<Utc> },
    HeldByOther,
}
