//! Data models for feedloc

pub mod record;
pub mod signal;

pub use record::{CacheRecord, LookupStatus};
pub use signal::{FetchLocation, LocationFetched, SIGNAL_PREFIX};
