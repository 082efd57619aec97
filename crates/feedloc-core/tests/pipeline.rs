//! End-to-end tests for the enrichment pipeline

use feedloc_core::bridge::{self, StaticFetcher};
use feedloc_core::dom::{shared, FeedBuilder, FeedPost};
use feedloc_core::{
    CacheStore, Document, DomContract, EnrichEvent, Enricher, EnricherConfig,
    EventBus, LookupCoordinator, LookupStatus, MemoryDocument, MemoryKv,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const KEY: &str = "xt_locations";

async fn next_event(rx: &mut broadcast::Receiver<EnrichEvent>) -> EnrichEvent {
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Ok(event)) => event,
        other => panic!("no event: {:?}", other),
    }
}

async fn wait_for(rx: &mut broadcast::Receiver<EnrichEvent>, pred: impl Fn(&EnrichEvent) -> bool) {
    loop {
        if pred(&next_event(rx).await) {
            return;
        }
    }
}

async fn wait_resolved(rx: &mut broadcast::Receiver<EnrichEvent>, handle: &str) {
    wait_for(rx, |e| {
        matches!(e, EnrichEvent::LocationResolved { handle: h, .. } if h == handle)
    })
    .await;
}

fn annotation_texts(doc: &MemoryDocument) -> Vec<String> {
    let class = DomContract::default().annotation_class;
    let root = doc.root();
    doc.query_all(root, |d, n| d.has_class(n, &class))
        .into_iter()
        .map(|n| doc.text_content(n))
        .collect()
}

fn config() -> EnricherConfig {
    EnricherConfig {
        bootstrap_delay_ms: 10,
        ..EnricherConfig::default()
    }
}

#[tokio::test]
async fn test_unknown_handle_requests_exactly_once() {
    let bus = EventBus::default_capacity();
    let store = CacheStore::new(Arc::new(MemoryKv::new()), KEY, bus.clone());
    let (port, mut bridge_port) = bridge::channel();
    let (requests, _responses) = port.split();
    let mut coordinator = LookupCoordinator::new(store, requests, bus);

    assert_eq!(coordinator.resolve("alice"), None);
    assert_eq!(
        coordinator.record("alice").map(|r| r.status),
        Some(LookupStatus::Pending)
    );

    let request = bridge_port.try_recv().unwrap();
    assert_eq!(request.handle, "alice");
    assert!(bridge_port.try_recv().is_none());
}

#[tokio::test]
async fn test_resolution_annotates_every_visible_unit() {
    let mut builder = FeedBuilder::new(DomContract::default());
    let (doc, _) = builder
        .page(&[
            FeedPost::new("alice"),
            FeedPost::new("dave"),
            FeedPost::new("alice"),
        ])
        .unwrap();
    let doc = shared(doc);
    let kv = Arc::new(MemoryKv::new());
    let fetcher = Arc::new(StaticFetcher::new([("alice", "Paris"), ("dave", "Lima")]));

    let enricher = Enricher::new(config());
    let mut rx = enricher.subscribe();
    let handle = enricher.start(doc.clone(), kv.clone(), fetcher.clone()).await;

    wait_resolved(&mut rx, "alice").await;
    let summary = handle.shutdown().await.unwrap();

    let record = &summary.records["alice"];
    assert_eq!(record.status, LookupStatus::Done);
    assert_eq!(record.location, "Paris");

    let texts = annotation_texts(&doc.lock());
    assert_eq!(texts.iter().filter(|t| *t == " . Paris").count(), 2);
    assert_eq!(fetcher.calls("alice"), 1);

    let raw = kv.raw(KEY).unwrap();
    assert_eq!(raw["alice"]["status"], "done");
    assert_eq!(raw["alice"]["location"], "Paris");
}

#[tokio::test]
async fn test_empty_location_shows_nothing_and_never_refetches() {
    let mut builder = FeedBuilder::new(DomContract::default());
    let (doc, container) = builder.page(&[FeedPost::new("bob")]).unwrap();
    let doc = shared(doc);
    let fetcher = Arc::new(StaticFetcher::new([("bob", "")]));

    let enricher = Enricher::new(config());
    let mut rx = enricher.subscribe();
    let handle = enricher
        .start(doc.clone(), Arc::new(MemoryKv::new()), fetcher.clone())
        .await;
    wait_resolved(&mut rx, "bob").await;

    // A later post by the same author is served from cache
    {
        let mut guard = doc.lock();
        let unit = builder.post(&mut guard, &FeedPost::new("bob")).unwrap();
        guard.append_child(container, unit).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    let summary = handle.shutdown().await.unwrap();

    assert_eq!(summary.records["bob"].status, LookupStatus::Done);
    assert_eq!(summary.records["bob"].resolved_location(), Some(""));
    assert!(annotation_texts(&doc.lock()).is_empty());
    assert_eq!(fetcher.calls("bob"), 1);
    assert_eq!(summary.report.empty, 1);
}

#[tokio::test]
async fn test_same_author_in_one_pass_requests_once() {
    let mut builder = FeedBuilder::new(DomContract::default());
    let (doc, _) = builder
        .page(&[FeedPost::new("carol"), FeedPost::new("carol")])
        .unwrap();
    let doc = shared(doc);
    let fetcher = Arc::new(StaticFetcher::new([("carol", "Rome")]));

    let enricher = Enricher::new(config());
    let mut rx = enricher.subscribe();
    let handle = enricher
        .start(doc.clone(), Arc::new(MemoryKv::new()), fetcher.clone())
        .await;

    let mut requested = 0;
    loop {
        match next_event(&mut rx).await {
            EnrichEvent::LookupRequested(h) if h == "carol" => requested += 1,
            EnrichEvent::LocationResolved { .. } => break,
            _ => {}
        }
    }
    let summary = handle.shutdown().await.unwrap();

    assert_eq!(requested, 1);
    assert_eq!(fetcher.calls("carol"), 1);
    assert_eq!(summary.fanned_out, 2);
}

#[tokio::test]
async fn test_storage_read_failure_starts_fresh() {
    let kv = Arc::new(MemoryKv::new().with_entry(
        KEY,
        serde_json::json!({"alice": {"status": "done", "location": "Paris"}}),
    ));
    kv.set_fail_reads(true);

    let mut builder = FeedBuilder::new(DomContract::default());
    let (doc, _) = builder.page(&[FeedPost::new("alice")]).unwrap();
    let doc = shared(doc);
    let fetcher = Arc::new(StaticFetcher::new([("alice", "Lyon")]));

    let enricher = Enricher::new(config());
    let mut rx = enricher.subscribe();
    let handle = enricher.start(doc.clone(), kv, fetcher.clone()).await;

    assert_eq!(next_event(&mut rx).await, EnrichEvent::CacheLoaded { records: 0 });
    wait_resolved(&mut rx, "alice").await;
    handle.shutdown().await.unwrap();

    assert_eq!(fetcher.calls("alice"), 1);
    assert_eq!(annotation_texts(&doc.lock()), vec![" . Lyon".to_string()]);
}

#[tokio::test]
async fn test_cached_locations_survive_restart() {
    let kv = Arc::new(MemoryKv::new());
    let fetcher = Arc::new(StaticFetcher::new([("alice", "Paris")]));

    let mut builder = FeedBuilder::new(DomContract::default());
    let (doc, _) = builder.page(&[FeedPost::new("alice")]).unwrap();
    let enricher = Enricher::new(config());
    let mut rx = enricher.subscribe();
    let handle = enricher.start(shared(doc), kv.clone(), fetcher.clone()).await;
    wait_resolved(&mut rx, "alice").await;
    handle.shutdown().await.unwrap();

    // Fresh page, same storage
    let (doc, _) = builder.page(&[FeedPost::new("alice")]).unwrap();
    let doc = shared(doc);
    let enricher = Enricher::new(config());
    let mut rx = enricher.subscribe();
    let handle = enricher.start(doc.clone(), kv, fetcher.clone()).await;
    wait_for(&mut rx, |e| *e == EnrichEvent::ContainerAttached).await;
    let summary = handle.shutdown().await.unwrap();

    assert_eq!(fetcher.calls("alice"), 1);
    assert_eq!(summary.report.annotated, 1);
    assert_eq!(annotation_texts(&doc.lock()), vec![" . Paris".to_string()]);
}

#[tokio::test]
async fn test_late_container_and_streamed_posts() {
    let mut builder = FeedBuilder::new(DomContract::default());
    let doc = shared(builder.loading_page());
    let fetcher = Arc::new(StaticFetcher::new([("erin", "Oslo"), ("frank", "Kyiv")]));

    let enricher = Enricher::new(config());
    let mut rx = enricher.subscribe();
    let handle = enricher
        .start(doc.clone(), Arc::new(MemoryKv::new()), fetcher.clone())
        .await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    let container = builder.add_container(&mut doc.lock()).unwrap();
    wait_for(&mut rx, |e| *e == EnrichEvent::ContainerAttached).await;

    // Posts arrive wrapped in a cell, the way infinite scroll inserts them
    {
        let mut guard = doc.lock();
        let cell = guard.element("div", &[("data-testid", "cellInnerDiv")], "");
        let first = builder.post(&mut guard, &FeedPost::new("erin")).unwrap();
        let second = builder.post(&mut guard, &FeedPost::new("frank")).unwrap();
        guard.append_child(cell, first).unwrap();
        guard.append_child(cell, second).unwrap();
        guard.append_child(container, cell).unwrap();
    }

    wait_resolved(&mut rx, "erin").await;
    wait_resolved(&mut rx, "frank").await;
    let summary = handle.shutdown().await.unwrap();

    assert!(summary.attached);
    let mut texts = annotation_texts(&doc.lock());
    texts.sort();
    assert_eq!(texts, vec![" . Kyiv".to_string(), " . Oslo".to_string()]);
}

#[tokio::test]
async fn test_failed_lookup_is_settled_as_empty() {
    let mut builder = FeedBuilder::new(DomContract::default());
    let (doc, _) = builder.page(&[FeedPost::new("ghost")]).unwrap();
    let doc = shared(doc);
    let fetcher = Arc::new(StaticFetcher::default());

    let enricher = Enricher::new(config());
    let mut rx = enricher.subscribe();
    let handle = enricher
        .start(doc.clone(), Arc::new(MemoryKv::new()), fetcher.clone())
        .await;
    wait_resolved(&mut rx, "ghost").await;
    let summary = handle.shutdown().await.unwrap();

    assert_eq!(summary.records["ghost"].status, LookupStatus::Done);
    assert_eq!(summary.records["ghost"].location, "");
    assert!(annotation_texts(&doc.lock()).is_empty());
}

#[tokio::test]
async fn test_persisted_pending_is_never_refetched() {
    let kv = Arc::new(MemoryKv::new().with_entry(
        KEY,
        serde_json::json!({"erin": {"status": "pending"}}),
    ));

    let mut builder = FeedBuilder::new(DomContract::default());
    let (doc, _) = builder.page(&[FeedPost::new("erin")]).unwrap();
    let doc = shared(doc);
    let fetcher = Arc::new(StaticFetcher::new([("erin", "Oslo")]));

    let enricher = Enricher::new(config());
    let mut rx = enricher.subscribe();
    let handle = enricher.start(doc.clone(), kv.clone(), fetcher.clone()).await;

    assert_eq!(next_event(&mut rx).await, EnrichEvent::CacheLoaded { records: 1 });
    wait_for(&mut rx, |e| *e == EnrichEvent::ContainerAttached).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let summary = handle.shutdown().await.unwrap();

    assert_eq!(fetcher.calls("erin"), 0);
    assert_eq!(summary.records["erin"].status, LookupStatus::Pending);
    assert!(annotation_texts(&doc.lock()).is_empty());
    assert_eq!(kv.raw(KEY).unwrap()["erin"]["status"], "pending");
}
