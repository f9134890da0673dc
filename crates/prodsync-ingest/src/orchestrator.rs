//! Ingestion control loop
//!
//! One run walks the remote collection page by page:
//!
//! 1. Load (or create) the checkpoint and pick the start page
//! 2. Fetch a page; a failed fetch or an empty page halts the run
//! 3. Route every item: valid items to the sink, the rest to quarantine
//! 4. Persist `last_page` once the whole page is routed
//! 5. Stop at `total_pages`, or throttle and move to the next page
//!
//! The checkpoint is only ever written between pages, so a crash mid-page
//! reprocesses that page in full on the next resumed run.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::IngestConfig;
use crate::error::Result;
use crate::fetcher::RateLimitedFetcher;
use crate::item::{Item, Page};
use crate::sink::{ItemSink, LogSink};
use crate::store::{Checkpoint, CheckpointStore, QuarantineRecord, QuarantineStore};
use crate::validator::{not_an_object, ItemValidator, SchemaValidator, ValidationErrors, ValidationResult};

/// Why a run stopped. Every variant is a clean stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Reached the page count announced by the source
    Completed,
    /// The source returned an empty page
    Exhausted,
    /// A page could not be fetched within the retry budget
    FetchFailed,
    /// Cancellation was requested
    Cancelled,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::Completed => "completed",
            HaltReason::Exhausted => "exhausted",
            HaltReason::FetchFailed => "fetch_failed",
            HaltReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source: String,
    pub checkpoint: String,
    pub halt: HaltReason,
    /// First page requested by this run
    pub start_page: u64,
    /// `last_page` as persisted when the run stopped
    pub last_page: u64,
    pub pages_processed: u64,
    pub items_seen: u64,
    pub items_accepted: u64,
    /// Items routed to quarantine, including those whose write failed
    pub items_quarantined: u64,
    /// Quarantine writes that failed and were dropped
    pub quarantine_failures: u64,
}

/// Drives a paginated ingestion for one source.
pub struct IngestOrchestrator {
    config: IngestConfig,
    fetcher: RateLimitedFetcher,
    validator: Arc<dyn ItemValidator>,
    checkpoints: Arc<dyn CheckpointStore>,
    quarantine: Arc<dyn QuarantineStore>,
    sink: Arc<dyn ItemSink>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl IngestOrchestrator {
    /// Orchestrator with the product schema, a logging sink and a fresh
    /// cancellation token.
    pub fn new(
        config: IngestConfig,
        fetcher: RateLimitedFetcher,
        checkpoints: Arc<dyn CheckpointStore>,
        quarantine: Arc<dyn QuarantineStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            fetcher,
            validator: Arc::new(SchemaValidator::products()),
            checkpoints,
            quarantine,
            sink: Arc::new(LogSink),
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the product schema.
    pub fn with_validator(mut self, validator: Arc<dyn ItemValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ItemSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use an externally owned token; cancelling it stops the run at the
    /// next page boundary.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the ingestion loop for `source`.
    ///
    /// With `resume`, starts after the checkpoint's `last_page`; otherwise
    /// starts from page 1 and overwrites the stored progress as it goes.
    /// Returns `Err` only for failures that must stop the run, such as a
    /// checkpoint that cannot be saved.
    pub async fn run(&self, source: &str, resume: bool) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", run_id = %run_id, source = source);

        self.run_inner(run_id, source, resume).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, source: &str, resume: bool) -> Result<RunReport> {
        let name = self.config.checkpoint_name(source);
        let mut checkpoint = match self.checkpoints.get_or_create(&name).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                error!(checkpoint = %name, error = %e, "Failed to load checkpoint");
                return Err(e);
            },
        };

        let start_page = (if resume { checkpoint.last_page + 1 } else { 1 }).max(1);
        if !resume && checkpoint.last_page > 0 {
            warn!(
                checkpoint = %name,
                stored_last_page = checkpoint.last_page,
                "Resume disabled, restarting from page 1"
            );
        }

        info!(checkpoint = %name, start_page, resume, "Starting ingestion run");

        let mut report = RunReport {
            run_id,
            source: source.to_string(),
            checkpoint: name,
            halt: HaltReason::Completed,
            start_page,
            last_page: checkpoint.last_page,
            pages_processed: 0,
            items_seen: 0,
            items_accepted: 0,
            items_quarantined: 0,
            quarantine_failures: 0,
        };

        let mut page_no = start_page;
        loop {
            let started = self.clock.now();

            let page = match self.fetch_page(page_no).await {
                Some(page) => page,
                None => {
                    warn!(page = page_no, "Halting: page could not be fetched");
                    return self
                        .halt(&mut checkpoint, page_no - 1, HaltReason::FetchFailed, report)
                        .await;
                },
            };

            if page.is_empty() {
                info!(page = page_no, "Halting: source returned an empty page");
                return self
                    .halt(&mut checkpoint, page_no - 1, HaltReason::Exhausted, report)
                    .await;
            }

            self.process_page(source, page_no, &page, &mut report).await;

            checkpoint.mark(page_no);
            self.save_checkpoint(&checkpoint).await?;
            report.last_page = page_no;
            report.pages_processed += 1;

            info!(
                page = page_no,
                total_pages = ?page.total_pages,
                items = page.items.len(),
                accepted = report.items_accepted,
                quarantined = report.items_quarantined,
                "Page checkpointed"
            );

            if page.total_pages.is_some_and(|total| page_no >= total) {
                report.halt = HaltReason::Completed;
                info!(last_page = report.last_page, "Run completed");
                return Ok(report);
            }

            if self.cancel.is_cancelled() {
                report.halt = HaltReason::Cancelled;
                info!(last_page = report.last_page, "Run cancelled");
                return Ok(report);
            }

            self.throttle(started).await;
            page_no += 1;
        }
    }

    /// Fetch and decode one page. `None` means the page is unavailable.
    async fn fetch_page(&self, page_no: u64) -> Option<Page> {
        let query = [
            ("page", page_no.to_string()),
            ("limit", self.config.page_size.to_string()),
        ];

        let response = self
            .fetcher
            .fetch(&self.config.resource, &query, self.config.max_retries)
            .await?;

        if !response.is_success() {
            warn!(page = page_no, status = %response.status, "Non-success response");
            return None;
        }

        let body = match response.json() {
            Ok(body) => body,
            Err(e) => {
                warn!(page = page_no, error = %e, "Response body is not valid JSON");
                return None;
            },
        };

        let page = Page::from_body(&body);
        if page.is_none() {
            warn!(page = page_no, "Response body is not a JSON object");
        }
        page
    }

    async fn process_page(&self, source: &str, page_no: u64, page: &Page, report: &mut RunReport) {
        for raw in &page.items {
            report.items_seen += 1;

            let rejection = match Item::from_value(raw.clone()) {
                None => Some((None, not_an_object(raw))),
                Some(item) => match self.route_item(&item).await {
                    Ok(()) => None,
                    Err(errors) => Some((item.external_id(), errors)),
                },
            };

            match rejection {
                None => report.items_accepted += 1,
                Some((external_id, errors)) => {
                    self.route_to_quarantine(source, page_no, external_id, raw.clone(), errors, report)
                        .await;
                },
            }
        }
    }

    /// Validate one item and hand it to the sink. `Err` carries the errors
    /// to quarantine it with.
    async fn route_item(&self, item: &Item) -> std::result::Result<(), ValidationErrors> {
        match self.validator.validate(item) {
            ValidationResult::Valid => self.sink.accept(item).await.map_err(|e| {
                warn!(external_id = ?item.external_id(), error = %e, "Sink rejected item");
                ValidationErrors::single("exception", e.to_string())
            }),
            ValidationResult::Invalid(errors) => {
                debug!(
                    external_id = ?item.external_id(),
                    fields = ?errors.fields().collect::<Vec<_>>(),
                    "Item failed validation"
                );
                Err(errors)
            },
        }
    }

    async fn route_to_quarantine(
        &self,
        source: &str,
        page_no: u64,
        external_id: Option<String>,
        payload: serde_json::Value,
        errors: ValidationErrors,
        report: &mut RunReport,
    ) {
        report.items_quarantined += 1;

        let record = QuarantineRecord::new(source, page_no, external_id, payload, errors);
        if let Err(e) = self.quarantine.append(&record).await {
            report.quarantine_failures += 1;
            error!(
                page = page_no,
                external_id = ?record.external_id,
                error = %e,
                "Failed to write quarantine record, item dropped"
            );
        }
    }

    async fn halt(
        &self,
        checkpoint: &mut Checkpoint,
        last_page: u64,
        reason: HaltReason,
        mut report: RunReport,
    ) -> Result<RunReport> {
        checkpoint.mark(last_page);
        self.save_checkpoint(checkpoint).await?;

        report.last_page = last_page;
        report.halt = reason;
        info!(halt = %reason, last_page, "Run halted");
        Ok(report)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Err(e) = self.checkpoints.save(checkpoint).await {
            error!(
                checkpoint = %checkpoint.name,
                last_page = checkpoint.last_page,
                error = %e,
                "Failed to save checkpoint"
            );
            return Err(e);
        }
        Ok(())
    }

    async fn throttle(&self, started: Instant) {
        let elapsed = self.clock.now().saturating_duration_since(started);
        if let Some(delay) = throttle_delay(self.config.min_request_interval(), elapsed) {
            debug!(delay_secs = delay.as_secs_f64(), "Throttling before next page");
            self.clock.sleep(delay).await;
        }
    }
}

/// Remaining wait so that page cycles start at least `interval` apart.
fn throttle_delay(interval: Duration, elapsed: Duration) -> Option<Duration> {
    let remaining = interval.saturating_sub(elapsed);
    (!remaining.is_zero()).then_some(remaining)
}
