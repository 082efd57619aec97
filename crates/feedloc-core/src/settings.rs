//! User settings persistence for feedloc
//!
//! Holds the user-supplied bearer token under the `bearerToken` key of the
//! key-value store. The bridge authenticates with its own configured
//! credential and does not read this value.

use crate::error::CoreError;
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Storage key for the user bearer token
pub const BEARER_TOKEN_KEY: &str = "bearerToken";

/// feedloc user settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub bearer_token: String,
}

impl Settings {
    /// Load settings; returns defaults on any read or type error
    pub fn load(kv: &dyn KeyValueStore) -> Self {
        match kv.get(BEARER_TOKEN_KEY) {
            Ok(Some(Value::String(token))) => Self {
                bearer_token: token,
            },
            Ok(_) => Self::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, kv: &dyn KeyValueStore) -> Result<(), CoreError> {
        kv.set(BEARER_TOKEN_KEY, Value::String(self.bearer_token.clone()))
    }

    pub fn has_token(&self) -> bool {
        !self.bearer_token.is_empty()
    }
}
