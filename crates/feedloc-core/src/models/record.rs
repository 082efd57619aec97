//! Cached lookup records, one per handle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a cached lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupStatus {
    /// Request sent, no response recorded yet
    Pending,
    /// Response recorded; `location` is meaningful (possibly empty)
    Done,
    /// Terminal failure, never retried within a session
    Error,
}

impl LookupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStatus::Pending => "pending",
            LookupStatus::Done => "done",
            LookupStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for LookupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached location lookup for a single handle
///
/// The handle itself is the map key in both the mirror and the persisted
/// object, so it is not repeated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub status: LookupStatus,

    /// Declared location; empty means "resolved, nothing declared"
    #[serde(default)]
    pub location: String,

    /// Last status transition (absent in records written by older versions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CacheRecord {
    pub fn pending() -> Self {
        Self {
            status: LookupStatus::Pending,
            location: String::new(),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn done(location: impl Into<String>) -> Self {
        Self {
            status: LookupStatus::Done,
            location: location.into(),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == LookupStatus::Pending
    }

    /// Location if resolved, `None` while pending or failed
    pub fn resolved_location(&self) -> Option<&str> {
        match self.status {
            LookupStatus::Done => Some(&self.location),
            LookupStatus::Pending | LookupStatus::Error => None,
        }
    }
}
