//! feedloc-core - Core library for feedloc
//!
//! Provides the lookup cache, the privileged fetch bridge and the feed
//! scanner that annotate posts with their author's declared location.

pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod dom;
pub mod error;
pub mod event;
pub mod models;
pub mod pipeline;
pub mod scanner;
pub mod settings;
pub mod store;
pub mod watcher;

pub use bridge::{Bridge, CookieJar, HttpLocationFetcher, LocationFetcher, StaticFetcher};
pub use config::{BridgeConfig, DomContract, EnricherConfig};
pub use coordinator::{LookupCoordinator, Resolver};
pub use dom::{Document, MemoryDocument, NodeId, SharedDocument};
pub use error::{CoreError, DegradedState};
pub use event::{EnrichEvent, EventBus};
pub use models::{CacheRecord, FetchLocation, LocationFetched, LookupStatus};
pub use pipeline::{Enricher, EnricherHandle, EnricherSummary};
pub use scanner::{EnrichmentScanner, ScanReport};
pub use settings::Settings;
pub use store::{CacheSnapshot, CacheStore, JsonFileKv, KeyValueStore, MemoryKv};
pub use watcher::ContentWatcher;
