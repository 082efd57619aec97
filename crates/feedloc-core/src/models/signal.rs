//! Signals exchanged between the coordinator and the privileged bridge

use serde::{Deserialize, Serialize};

/// Namespace prefix shared by both signal names
pub const SIGNAL_PREFIX: &str = "xtension_";

/// Coordinator -> bridge: look up a handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchLocation {
    pub handle: String,
}

impl FetchLocation {
    pub const NAME: &'static str = "fetch_location";

    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
        }
    }

    pub fn event_name() -> String {
        format!("{}{}", SIGNAL_PREFIX, Self::NAME)
    }
}

/// Bridge -> coordinator: lookup finished
///
/// Failures arrive here too, carrying an empty location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationFetched {
    pub handle: String,
    #[serde(default)]
    pub location: String,
}

impl LocationFetched {
    pub const NAME: &'static str = "location_fetched";

    pub fn new(handle: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            location: location.into(),
        }
    }

    pub fn empty(handle: impl Into<String>) -> Self {
        Self::new(handle, "")
    }

    pub fn event_name() -> String {
        format!("{}{}", SIGNAL_PREFIX, Self::NAME)
    }
}
