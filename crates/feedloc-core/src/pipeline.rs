//! Enrichment pipeline
//!
//! Wires the cache store, coordinator, bridge and scanner together and runs
//! them on one task: mutation batches and bridge responses are handled one
//! at a time, so coordinator state needs no locking.

use crate::bridge::{self, Bridge, LocationFetcher, ResponseReceiver};
use crate::config::EnricherConfig;
use crate::coordinator::LookupCoordinator;
use crate::dom::{Document, MutationStream, NodeId, SharedDocument};
use crate::event::{EnrichEvent, EventBus};
use crate::scanner::{EnrichmentScanner, ScanReport};
use crate::store::{CacheSnapshot, CacheStore, KeyValueStore};
use crate::watcher::{ContentWatcher, WatcherConfig};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

/// State of the pipeline when it stopped
#[derive(Debug, Default, Clone)]
pub struct EnricherSummary {
    /// Accumulated scan counters
    pub report: ScanReport,
    /// Coordinator mirror at shutdown
    pub records: CacheSnapshot,
    /// Annotations inserted by fan-out after a lookup resolved
    pub fanned_out: usize,
    /// Whether the feed container was ever found
    pub attached: bool,
}

/// Pipeline builder
pub struct Enricher {
    config: EnricherConfig,
    event_bus: EventBus,
}

impl Enricher {
    pub fn new(config: EnricherConfig) -> Self {
        Self {
            config,
            event_bus: EventBus::default_capacity(),
        }
    }

    /// Subscribe before `start` to see startup events
    pub fn subscribe(&self) -> broadcast::Receiver<EnrichEvent> {
        self.event_bus.subscribe()
    }

    /// Load the cache, spawn the bridge and start enriching `doc`
    pub async fn start<D, F>(
        self,
        doc: SharedDocument<D>,
        kv: Arc<dyn KeyValueStore>,
        fetcher: F,
    ) -> EnricherHandle
    where
        D: Document,
        F: LocationFetcher,
    {
        let Self { config, event_bus } = self;

        let store = CacheStore::new(kv, config.storage_key.clone(), event_bus.clone());
        let records = store.load().await;

        let (coordinator_port, bridge_port) = bridge::channel();
        let (requests, responses) = coordinator_port.split();

        let mut coordinator = LookupCoordinator::new(store.clone(), requests, event_bus.clone());
        coordinator.seed(records);

        let bridge = Bridge::spawn(fetcher, bridge_port, config.bridge.request_timeout());
        let scanner = EnrichmentScanner::new(config.dom.clone(), event_bus.clone());
        let watcher_config = WatcherConfig {
            bootstrap_delay: config.bootstrap_delay(),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let event_loop = EventLoop {
            doc,
            scanner,
            coordinator,
            responses,
            event_bus: event_bus.clone(),
            summary: EnricherSummary::default(),
        };
        let task = tokio::spawn(event_loop.run(watcher_config, shutdown_rx));

        info!("Enrichment pipeline started");

        EnricherHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
            bridge,
            store,
            event_bus,
        }
    }
}

/// Running pipeline
///
/// Dropping the handle stops the loop; in-flight lookups are abandoned.
pub struct EnricherHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<EnricherSummary>,
    bridge: JoinHandle<()>,
    store: CacheStore,
    event_bus: EventBus,
}

impl EnricherHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<EnrichEvent> {
        self.event_bus.subscribe()
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Stop the loop, flush pending cache writes and return the final state
    pub async fn shutdown(mut self) -> Result<EnricherSummary, JoinError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let summary = (&mut self.task).await;
        self.bridge.abort();
        self.store.flush().await;
        info!("Enrichment pipeline stopped");
        summary
    }
}

impl Drop for EnricherHandle {
    fn drop(&mut self) {
        self.bridge.abort();
    }
}

struct EventLoop<D: Document> {
    doc: SharedDocument<D>,
    scanner: EnrichmentScanner,
    coordinator: LookupCoordinator,
    responses: ResponseReceiver,
    event_bus: EventBus,
    summary: EnricherSummary,
}

impl<D: Document> EventLoop<D> {
    async fn run(
        mut self,
        watcher_config: WatcherConfig,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> EnricherSummary {
        let attached = tokio::select! {
            attached = ContentWatcher::attach(&self.doc, &self.scanner, &watcher_config) => attached,
            _ = &mut shutdown_rx => {
                debug!("Shutdown before the feed container appeared");
                return self.finish();
            }
        };

        self.summary.attached = true;
        self.event_bus.publish(EnrichEvent::ContainerAttached);
        self.initial_scan(attached.container);

        let mut mutations: MutationStream = attached.mutations;
        loop {
            tokio::select! {
                Some(batch) = mutations.recv() => self.on_mutations(batch.added),
                Some(response) = self.responses.recv() => {
                    let handle = response.handle.clone();
                    if let Some(location) = self.coordinator.record_response(response) {
                        self.fan_out(&handle, &location);
                    }
                }
                _ = &mut shutdown_rx => break,
                else => break,
            }
        }

        self.finish()
    }

    fn initial_scan(&mut self, container: NodeId) {
        let mut doc = self.doc.lock();
        let report = self
            .scanner
            .scan_all(&mut *doc, container, &mut self.coordinator);
        info!(
            units = report.units_seen,
            annotated = report.annotated,
            requested = self.coordinator.in_flight(),
            "Initial scan complete"
        );
        self.summary.report.merge(&report);
    }

    fn on_mutations(&mut self, added: Vec<NodeId>) {
        let mut doc = self.doc.lock();
        let mut report = ScanReport::default();
        for node in added {
            if !doc.is_connected(node) {
                continue;
            }
            self.scanner
                .scan_added(&mut *doc, node, &mut self.coordinator, &mut report);
        }
        if report.units_seen > 0 {
            debug!(units = report.units_seen, "Processed added units");
        }
        self.summary.report.merge(&report);
    }

    fn fan_out(&mut self, handle: &str, location: &str) {
        let mut doc = self.doc.lock();
        self.summary.fanned_out += self.scanner.annotate_handle(&mut *doc, handle, location);
    }

    fn finish(self) -> EnricherSummary {
        let mut summary = self.summary;
        summary.records = self.coordinator.records().clone();
        summary
    }
}
