//! End-to-end ingestion runs against a mock source
//!
//! These tests validate the control loop including:
//! - Completion, exhaustion and fetch-failure halts
//! - Quarantine routing for invalid items and sink rejections
//! - Resuming from a checkpoint and restarting without one
//! - Page-level atomicity when the checkpoint cannot be written
//! - Throttling between pages and cancellation

use async_trait::async_trait;
use prodsync_ingest::validator::{FieldRule, Rule, SchemaValidator};
use prodsync_ingest::{
    Checkpoint, CheckpointStore, HaltReason, IngestConfig, IngestError, IngestOrchestrator, Item,
    ItemSink, ManualClock, QuarantineRecord, QuarantineStore, RateLimitedFetcher, SourceConfig,
    SqliteStore,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const SOURCE: &str = "acme";
const CHECKPOINT: &str = "thirdparty_products_acme";

/// Helper to create a valid product
fn product(i: usize) -> Value {
    json!({
        "id": format!("p-{i}"),
        "sku": format!("SKU-{i}"),
        "title": format!("Widget {i}"),
        "price": 9.99,
        "stock": 5
    })
}

fn products(range: std::ops::Range<usize>) -> Vec<Value> {
    range.map(product).collect()
}

async fn mount_page(server: &MockServer, page: u64, body: Value) {
    Mock::given(method("GET"))
        .and(path("/products"))
        .and(query_param("page", page.to_string()))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_status(server: &MockServer, page: u64, status: u16, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/products"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected_calls)
        .mount(server)
        .await;
}

struct Harness {
    server: MockServer,
    store: Arc<SqliteStore>,
    clock: ManualClock,
}

impl Harness {
    async fn new() -> Self {
        Self {
            server: MockServer::start().await,
            store: Arc::new(SqliteStore::new_in_memory().unwrap()),
            clock: ManualClock::new(),
        }
    }

    fn orchestrator(&self) -> IngestOrchestrator {
        self.orchestrator_with(self.store.clone(), self.store.clone())
    }

    fn orchestrator_with(
        &self,
        checkpoints: Arc<dyn CheckpointStore>,
        quarantine: Arc<dyn QuarantineStore>,
    ) -> IngestOrchestrator {
        let config = IngestConfig::default();
        let source = SourceConfig::new(SOURCE, self.server.uri());
        let fetcher =
            RateLimitedFetcher::new(&source, &config, Arc::new(self.clock.clone())).unwrap();

        IngestOrchestrator::new(config, fetcher, checkpoints, quarantine, Arc::new(self.clock.clone()))
    }

    async fn last_page(&self) -> u64 {
        self.store.get(CHECKPOINT).await.unwrap().unwrap().last_page
    }

    async fn quarantined(&self) -> Vec<QuarantineRecord> {
        self.store.list(SOURCE, 1000).await.unwrap()
    }
}

// ============================================================================
// Halting Scenarios
// ============================================================================

#[tokio::test]
async fn test_single_page_completes() {
    let h = Harness::new().await;
    mount_page(&h.server, 1, json!({"items": products(0..100), "total_pages": 1})).await;

    let report = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(report.halt, HaltReason::Completed);
    assert_eq!(report.last_page, 1);
    assert_eq!(report.items_accepted, 100);
    assert_eq!(report.items_quarantined, 0);
    assert_eq!(h.last_page().await, 1);
    assert_eq!(h.store.count(SOURCE).await.unwrap(), 0);
    assert!(h.clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_invalid_items_are_quarantined() {
    let h = Harness::new().await;

    let items: Vec<Value> = (0..50)
        .map(|i| {
            let mut item = product(i);
            if i % 5 == 0 {
                item.as_object_mut().unwrap().remove("price");
            }
            item
        })
        .collect();
    mount_page(&h.server, 1, json!({"items": items, "total_pages": 1})).await;

    let report = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(report.halt, HaltReason::Completed);
    assert_eq!(report.items_seen, 50);
    assert_eq!(report.items_accepted, 40);
    assert_eq!(report.items_quarantined, 10);
    assert_eq!(h.last_page().await, 1);

    let records = h.quarantined().await;
    assert_eq!(records.len(), 10);
    for record in &records {
        assert_eq!(record.page, 1);
        assert_eq!(record.errors.get("price").unwrap(), ["The price field is required."]);
        assert_eq!(record.errors.len(), 1);
        assert!(record.external_id.is_some());
        assert!(record.payload.get("price").is_none());
    }
}

#[tokio::test]
async fn test_persistent_server_errors_halt_cleanly() {
    let h = Harness::new().await;
    mount_page(&h.server, 1, json!({"items": products(0..10), "total_pages": 3})).await;
    mount_status(&h.server, 2, 503, 4).await;

    let report = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(report.halt, HaltReason::FetchFailed);
    assert_eq!(report.last_page, 1);
    assert_eq!(h.last_page().await, 1);

    // Throttle after page 1, then backoff between the four attempts on page 2
    assert_eq!(
        h.clock.sleeps(),
        [6, 1, 2, 4].map(Duration::from_secs).to_vec()
    );
}

#[tokio::test]
async fn test_empty_page_exhausts_run() {
    let h = Harness::new().await;
    mount_page(&h.server, 1, json!({"items": products(0..3)})).await;
    mount_page(&h.server, 2, json!({"items": products(3..6)})).await;
    mount_page(&h.server, 3, json!({"items": []})).await;

    let report = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(report.halt, HaltReason::Exhausted);
    assert_eq!(report.last_page, 2);
    assert_eq!(report.pages_processed, 2);
    assert_eq!(h.last_page().await, 2);
}

#[tokio::test]
async fn test_client_error_halts_without_retry() {
    let h = Harness::new().await;
    mount_status(&h.server, 1, 404, 1).await;

    let report = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(report.halt, HaltReason::FetchFailed);
    assert_eq!(h.last_page().await, 0);
    assert!(h.clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_malformed_body_halts() {
    let h = Harness::new().await;
    Mock::given(method("GET"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&h.server)
        .await;

    let report = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(report.halt, HaltReason::FetchFailed);
    assert_eq!(report.last_page, 0);
}

#[tokio::test]
async fn test_alternate_envelope() {
    let h = Harness::new().await;
    mount_page(&h.server, 1, json!({"data": products(0..2), "totalPages": 2})).await;
    mount_page(&h.server, 2, json!({"data": products(2..4), "totalPages": 2})).await;

    let report = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(report.halt, HaltReason::Completed);
    assert_eq!(report.items_accepted, 4);
    assert_eq!(h.last_page().await, 2);
}

#[tokio::test]
async fn test_non_object_items_are_quarantined() {
    let h = Harness::new().await;
    mount_page(
        &h.server,
        1,
        json!({"items": ["oops", product(1), 42], "total_pages": 1}),
    )
    .await;

    let report = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(report.items_accepted, 1);
    assert_eq!(report.items_quarantined, 2);

    let records = h.quarantined().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.external_id.is_none() && r.errors.get("item").is_some()));
}

// ============================================================================
// Resume Behaviour
// ============================================================================

#[tokio::test]
async fn test_resume_continues_after_checkpoint() {
    let h = Harness::new().await;

    // First run: page 2 is down
    mount_page(&h.server, 1, json!({"items": products(0..5), "total_pages": 3})).await;
    mount_status(&h.server, 2, 503, 4).await;

    let first = h.orchestrator().run(SOURCE, true).await.unwrap();
    assert_eq!(first.halt, HaltReason::FetchFailed);
    assert_eq!(h.last_page().await, 1);

    // Second run: page 1 must not be requested again
    h.server.reset().await;
    mount_status(&h.server, 1, 200, 0).await;
    mount_page(&h.server, 2, json!({"items": products(5..10), "total_pages": 3})).await;
    mount_page(&h.server, 3, json!({"items": products(10..15), "total_pages": 3})).await;

    let second = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(second.start_page, 2);
    assert_eq!(second.halt, HaltReason::Completed);
    assert_eq!(second.items_accepted, 10);
    assert_eq!(h.last_page().await, 3);
}

#[tokio::test]
async fn test_resume_from_stored_checkpoint() {
    let h = Harness::new().await;

    let mut checkpoint = Checkpoint::new(CHECKPOINT);
    checkpoint.last_page = 5;
    checkpoint.meta = json!({"owner": "ops"});
    h.store.save(&checkpoint).await.unwrap();

    mount_page(&h.server, 6, json!({"items": []})).await;

    let report = h.orchestrator().run(SOURCE, true).await.unwrap();

    assert_eq!(report.start_page, 6);
    assert_eq!(report.halt, HaltReason::Exhausted);

    let stored = h.store.get(CHECKPOINT).await.unwrap().unwrap();
    assert_eq!(stored.last_page, 5);
    assert_eq!(stored.meta, json!({"owner": "ops"}));
    assert!(stored.last_processed_at.is_some());
}

#[tokio::test]
async fn test_no_resume_starts_at_first_page() {
    let h = Harness::new().await;

    let mut checkpoint = Checkpoint::new(CHECKPOINT);
    checkpoint.last_page = 5;
    h.store.save(&checkpoint).await.unwrap();

    mount_page(&h.server, 1, json!({"items": products(0..2), "total_pages": 1})).await;

    let report = h.orchestrator().run(SOURCE, false).await.unwrap();

    assert_eq!(report.start_page, 1);
    assert_eq!(report.halt, HaltReason::Completed);
    assert_eq!(h.last_page().await, 1);
}

/// Checkpoint store whose saves fail while `failing` is set.
struct FlakyCheckpoints {
    inner: Arc<SqliteStore>,
    failing: AtomicBool,
}

#[async_trait]
impl CheckpointStore for FlakyCheckpoints {
    async fn get_or_create(&self, name: &str) -> prodsync_ingest::Result<Checkpoint> {
        self.inner.get_or_create(name).await
    }

    async fn get(&self, name: &str) -> prodsync_ingest::Result<Option<Checkpoint>> {
        self.inner.get(name).await
    }

    async fn save(&self, checkpoint: &Checkpoint) -> prodsync_ingest::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IngestError::Lock("database is locked".to_string()));
        }
        self.inner.save(checkpoint).await
    }
}

#[tokio::test]
async fn test_unsaved_page_is_reprocessed() {
    let h = Harness::new().await;

    let mut items = products(0..4);
    items.push(json!({"id": "bad-1", "sku": "SKU-X", "title": "No price"}));
    mount_page(&h.server, 1, json!({"items": items, "total_pages": 1})).await;

    let checkpoints = Arc::new(FlakyCheckpoints {
        inner: h.store.clone(),
        failing: AtomicBool::new(true),
    });

    let result = h.orchestrator_with(checkpoints.clone(), h.store.clone()).run(SOURCE, true).await;
    assert!(matches!(result, Err(IngestError::Lock(_))));
    assert_eq!(h.last_page().await, 0);
    assert_eq!(h.store.count(SOURCE).await.unwrap(), 1);

    checkpoints.failing.store(false, Ordering::SeqCst);
    let report = h.orchestrator_with(checkpoints, h.store.clone()).run(SOURCE, true).await.unwrap();

    assert_eq!(report.start_page, 1);
    assert_eq!(report.halt, HaltReason::Completed);
    assert_eq!(h.last_page().await, 1);

    // Reprocessing the page quarantines the bad item again
    let records = h.quarantined().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.external_id.as_deref() == Some("bad-1")));
}

/// Checkpoint store whose database cannot be read.
struct UnreadableCheckpoints;

#[async_trait]
impl CheckpointStore for UnreadableCheckpoints {
    async fn get_or_create(&self, _name: &str) -> prodsync_ingest::Result<Checkpoint> {
        Err(IngestError::Lock("database is locked".to_string()))
    }

    async fn get(&self, _name: &str) -> prodsync_ingest::Result<Option<Checkpoint>> {
        Err(IngestError::Lock("database is locked".to_string()))
    }

    async fn save(&self, _checkpoint: &Checkpoint) -> prodsync_ingest::Result<()> {
        Err(IngestError::Lock("database is locked".to_string()))
    }
}

#[tokio::test]
async fn test_unreadable_checkpoint_fails_before_fetching() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": products(0..3)})))
        .expect(0)
        .mount(&h.server)
        .await;

    let result = h
        .orchestrator_with(Arc::new(UnreadableCheckpoints), h.store.clone())
        .run(SOURCE, true)
        .await;

    assert!(matches!(result, Err(IngestError::Lock(_))));
    assert_eq!(h.store.count(SOURCE).await.unwrap(), 0);
}

// ============================================================================
// Custom Validation
// ============================================================================

#[tokio::test]
async fn test_custom_validator_replaces_product_schema() {
    let h = Harness::new().await;
    mount_page(
        &h.server,
        1,
        json!({
            "items": [
                {"id": "p-1", "sku": "SKU-1"},
                {"id": "p-2", "title": "No SKU", "price": 3.0}
            ],
            "total_pages": 1
        }),
    )
    .await;

    let validator = SchemaValidator::new(vec![FieldRule {
        field: "sku",
        rule: Rule::RequiredString,
    }]);

    let report = h
        .orchestrator()
        .with_validator(Arc::new(validator))
        .run(SOURCE, true)
        .await
        .unwrap();

    assert_eq!(report.items_accepted, 1);
    assert_eq!(report.items_quarantined, 1);

    let records = h.quarantined().await;
    assert_eq!(records[0].external_id.as_deref(), Some("p-2"));
    assert!(records[0].errors.get("sku").is_some());
    assert!(records[0].errors.get("price").is_none());
}

// ============================================================================
// Sink and Quarantine Failures
// ============================================================================

/// Sink that rejects one SKU.
struct RejectingSink {
    sku: &'static str,
}

#[async_trait]
impl ItemSink for RejectingSink {
    async fn accept(&self, item: &Item) -> prodsync_ingest::Result<()> {
        if item.str_field("sku") == Ok(self.sku) {
            return Err(IngestError::sink("catalog unavailable"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_sink_rejection_is_quarantined() {
    let h = Harness::new().await;
    mount_page(&h.server, 1, json!({"items": products(0..5), "total_pages": 1})).await;

    let report = h
        .orchestrator()
        .with_sink(Arc::new(RejectingSink { sku: "SKU-3" }))
        .run(SOURCE, true)
        .await
        .unwrap();

    assert_eq!(report.items_accepted, 4);
    assert_eq!(report.items_quarantined, 1);

    let records = h.quarantined().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].external_id.as_deref(), Some("p-3"));
    let messages = records[0].errors.get("exception").unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("catalog unavailable"));
}

/// Quarantine store that cannot write.
struct BrokenQuarantine;

#[async_trait]
impl QuarantineStore for BrokenQuarantine {
    async fn append(&self, _record: &QuarantineRecord) -> prodsync_ingest::Result<i64> {
        Err(IngestError::Lock("disk full".to_string()))
    }

    async fn list(&self, _source: &str, _limit: usize) -> prodsync_ingest::Result<Vec<QuarantineRecord>> {
        Ok(Vec::new())
    }

    async fn count(&self, _source: &str) -> prodsync_ingest::Result<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_quarantine_failures_do_not_stop_run() {
    let h = Harness::new().await;
    mount_page(
        &h.server,
        1,
        json!({"items": [product(1), {"id": "x"}, {"id": "y"}], "total_pages": 1}),
    )
    .await;

    let report = h
        .orchestrator_with(h.store.clone(), Arc::new(BrokenQuarantine))
        .run(SOURCE, true)
        .await
        .unwrap();

    assert_eq!(report.halt, HaltReason::Completed);
    assert_eq!(report.items_quarantined, 2);
    assert_eq!(report.quarantine_failures, 2);
    assert_eq!(h.last_page().await, 1);
}

// ============================================================================
// Throttling and Cancellation
// ============================================================================

/// Sink that takes virtual time per item.
struct SlowSink {
    clock: ManualClock,
    per_item: Duration,
}

#[async_trait]
impl ItemSink for SlowSink {
    async fn accept(&self, _item: &Item) -> prodsync_ingest::Result<()> {
        self.clock.advance(self.per_item);
        Ok(())
    }
}

#[tokio::test]
async fn test_throttle_fills_remaining_interval() {
    let h = Harness::new().await;
    mount_page(&h.server, 1, json!({"items": products(0..1)})).await;
    mount_page(&h.server, 2, json!({"items": products(1..2)})).await;
    mount_page(&h.server, 3, json!({"items": []})).await;

    let sink = SlowSink {
        clock: h.clock.clone(),
        per_item: Duration::from_secs(2),
    };

    let report = h.orchestrator().with_sink(Arc::new(sink)).run(SOURCE, true).await.unwrap();

    assert_eq!(report.halt, HaltReason::Exhausted);
    assert_eq!(h.clock.sleeps(), [4, 4].map(Duration::from_secs).to_vec());
}

#[tokio::test]
async fn test_slow_pages_are_not_throttled() {
    let h = Harness::new().await;
    mount_page(&h.server, 1, json!({"items": products(0..1)})).await;
    mount_page(&h.server, 2, json!({"items": []})).await;

    let sink = SlowSink {
        clock: h.clock.clone(),
        per_item: Duration::from_secs(10),
    };

    h.orchestrator().with_sink(Arc::new(sink)).run(SOURCE, true).await.unwrap();

    assert!(h.clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_at_page_boundary() {
    let h = Harness::new().await;
    mount_page(&h.server, 1, json!({"items": products(0..3), "total_pages": 5})).await;
    mount_status(&h.server, 2, 200, 0).await;

    let orchestrator = h.orchestrator();
    orchestrator.cancellation_token().cancel();

    let report = orchestrator.run(SOURCE, true).await.unwrap();

    assert_eq!(report.halt, HaltReason::Cancelled);
    assert_eq!(report.items_accepted, 3);
    assert_eq!(h.last_page().await, 1);
}
