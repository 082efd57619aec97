//! Lookup coordinator
//!
//! Owns the in-memory mirror of the cache and decides, per handle, whether
//! to answer from cache, suppress a duplicate, or send a new request over
//! the bridge. The mirror is updated synchronously before anything is
//! persisted or sent, so the next scan already sees a Pending record.

use crate::bridge::FetchSender;
use crate::event::{EnrichEvent, EventBus};
use crate::models::{CacheRecord, FetchLocation, LocationFetched, LookupStatus};
use crate::store::{CacheSnapshot, CacheStore};
use tracing::{debug, info, warn};

/// Answers location queries for the scanner
pub trait Resolver {
    /// `Some(location)` when resolved (possibly empty), `None` when no
    /// answer is available yet
    fn resolve(&mut self, handle: &str) -> Option<String>;
}

/// Request-deduplicating lookup cache
pub struct LookupCoordinator {
    mirror: CacheSnapshot,
    store: CacheStore,
    requests: FetchSender,
    event_bus: EventBus,
}

impl LookupCoordinator {
    pub fn new(store: CacheStore, requests: FetchSender, event_bus: EventBus) -> Self {
        Self {
            mirror: CacheSnapshot::new(),
            store,
            requests,
            event_bus,
        }
    }

    /// Merge persisted records into the mirror
    ///
    /// Every record is kept as loaded. A Pending record from an earlier
    /// session keeps suppressing requests for its handle. Returns the number
    /// of records merged.
    pub fn seed(&mut self, records: CacheSnapshot) -> usize {
        let loaded = records.len();
        let pending = records.values().filter(|r| r.is_pending()).count();
        self.mirror.extend(records);

        if pending > 0 {
            debug!(pending, "Loaded pending lookups from a previous session");
        }
        self.event_bus
            .publish(EnrichEvent::CacheLoaded { records: loaded });
        loaded
    }

    /// Resolve a handle to its location
    ///
    /// At most one request per handle is ever sent: the first call creates
    /// a Pending record, and Pending or Error records suppress further
    /// requests for the rest of the session.
    pub fn resolve(&mut self, handle: &str) -> Option<String> {
        if handle.is_empty() {
            return None;
        }

        if let Some(record) = self.mirror.get(handle) {
            return match record.status {
                LookupStatus::Done => Some(record.location.clone()),
                LookupStatus::Pending | LookupStatus::Error => {
                    debug!(handle, status = %record.status, "Lookup already in progress or failed");
                    None
                }
            };
        }

        self.mirror
            .insert(handle.to_string(), CacheRecord::pending());
        self.store.save(&self.mirror);

        match self.requests.send(FetchLocation::new(handle)) {
            Ok(()) => {
                debug!(handle, "Requested location");
                self.event_bus
                    .publish(EnrichEvent::LookupRequested(handle.to_string()));
            }
            Err(e) => warn!(handle, error = %e, "Failed to dispatch location request"),
        }

        None
    }

    /// Record a bridge response
    ///
    /// Returns the location to fan out when the handle was Pending; stale
    /// or duplicate responses are ignored.
    pub fn record_response(&mut self, response: LocationFetched) -> Option<String> {
        let LocationFetched { handle, location } = response;

        match self.mirror.get(&handle) {
            Some(record) if record.is_pending() => {}
            Some(record) => {
                debug!(handle = %handle, status = %record.status, "Ignoring response for settled handle");
                return None;
            }
            None => {
                debug!(handle = %handle, "Ignoring response for unknown handle");
                return None;
            }
        }

        self.mirror
            .insert(handle.clone(), CacheRecord::done(location.clone()));
        self.store.save(&self.mirror);

        info!(handle = %handle, location = %location, "Location resolved");
        self.event_bus.publish(EnrichEvent::LocationResolved {
            handle,
            location: location.clone(),
        });

        Some(location)
    }

    pub fn record(&self, handle: &str) -> Option<&CacheRecord> {
        self.mirror.get(handle)
    }

    pub fn records(&self) -> &CacheSnapshot {
        &self.mirror
    }

    /// Number of handles still waiting for a response
    pub fn in_flight(&self) -> usize {
        self.mirror.values().filter(|r| r.is_pending()).count()
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }
}

impl Resolver for LookupCoordinator {
    fn resolve(&mut self, handle: &str) -> Option<String> {
        LookupCoordinator::resolve(self, handle)
    }
}
