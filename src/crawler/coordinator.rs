//! Update coordinator - main update orchestration logic
//!
//! This module contains the update run that ties every other piece together:
//! - Discovering slugs from the paginated listing endpoint
//! - Fetching and extracting detail pages on a worker pool
//! - Upserting tools in order, then fanning instructions out to a writer pool
//! - Progress reporting and cancellation
//!
//! Per-item failures are logged, counted and skipped. Only an unusable first
//! listing page or cancellation ends a run early.

use crate::catalog::{DetailRecord, InstallInstructionRecord, ListingItem};
use crate::config::PipelineConfig;
use crate::crawler::fetcher::{Fetcher, PartialFetchError};
use crate::crawler::parser::{to_install_instructions, to_tool_record, PageDecoder};
use crate::crawler::pipeline::{preloaded, send_or_cancel, Stage, StageHandle};
use crate::state::{Milestones, ProgressEvent, ProgressReporter, UpdatePhase};
use crate::storage::{RunCounts, Store, StorageError};
use crate::{CatalogError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A progress milestone is sent at least this often (in persisted tools)
const PROGRESS_EVERY: usize = 10;

/// Result of the discovery phase
#[derive(Debug)]
pub struct Discovery {
    /// Reported size of the whole catalog
    pub total_found: u64,

    /// Discovered entries in page order, truncated at the limit
    pub items: Vec<ListingItem>,

    /// Listing pages after the first that could not be fetched or decoded
    pub failed_pages: Option<PartialFetchError>,
}

impl Discovery {
    pub fn slugs(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.slug.as_str()).collect()
    }
}

/// Counters for a finished update run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Tools successfully upserted
    pub processed: usize,

    /// Tools discovered
    pub total: usize,

    /// Detail pages that could not be fetched or extracted
    pub fetch_failures: usize,

    /// Tool or instruction writes the store rejected
    pub persistence_failures: usize,

    /// Install instructions successfully upserted
    pub instructions_written: usize,

    /// Listing pages skipped during discovery
    pub listing_failures: usize,
}

impl From<&UpdateSummary> for RunCounts {
    fn from(summary: &UpdateSummary) -> Self {
        Self {
            processed: summary.processed,
            total: summary.total,
            fetch_failures: summary.fetch_failures + summary.listing_failures,
            persistence_failures: summary.persistence_failures,
        }
    }
}

/// Main update coordinator structure
pub struct Coordinator {
    fetcher: Fetcher,
    decoder: Arc<dyn PageDecoder>,
    store: Arc<dyn Store>,
    pipeline: PipelineConfig,
    phase: UpdatePhase,
}

impl Coordinator {
    /// Creates a new coordinator in the `Idle` phase
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Shared fetcher (rate limit and cache)
    /// * `decoder` - Turns listing and detail bodies into records
    /// * `store` - Where tools and instructions are written
    /// * `pipeline` - Worker counts and channel capacities
    pub fn new(
        fetcher: Fetcher,
        decoder: Arc<dyn PageDecoder>,
        store: Arc<dyn Store>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            decoder,
            store,
            pipeline,
            phase: UpdatePhase::Idle,
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    fn transition(&mut self, next: UpdatePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(CatalogError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        tracing::info!("Update phase: {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Builds the list of entries to update
    ///
    /// Page 1 is fetched and decoded first to learn the catalog size. The
    /// remaining pages are fetched concurrently (page 1 is served from the
    /// cache) and their entries concatenated in page order, keeping the order
    /// within each page, stopping exactly at `limit` when it is non-zero.
    ///
    /// # Returns
    ///
    /// * `Ok(Discovery)` - Entries found, plus any skipped pages
    /// * `Err(CatalogError::DiscoveryFailed)` - Page 1 could not be fetched or decoded
    /// * `Err(CatalogError::Cancelled)` - The token was cancelled
    pub async fn discover(&self, token: &CancellationToken, limit: usize) -> Result<Discovery> {
        let first_body = self
            .fetcher
            .fetch_listing_page(token, 1)
            .await
            .map_err(discovery_failed)?;
        let first = self
            .decoder
            .decode_listing(&first_body)
            .map_err(|e| discovery_failed(e.into()))?;

        let total_found = first.total_found;
        let mut total_tools = usize::try_from(total_found).unwrap_or(usize::MAX);
        if limit > 0 {
            total_tools = total_tools.min(limit);
        }
        let page_size = self.fetcher.page_size().max(1) as usize;
        let total_pages = u32::try_from(total_tools.div_ceil(page_size)).unwrap_or(u32::MAX);

        tracing::info!(
            "Catalog reports {} tools; updating {} across {} listing pages",
            total_found,
            total_tools,
            total_pages
        );

        let (bodies, partial) = self
            .fetcher
            .fetch_listing_pages_concurrently(token, total_pages)
            .await;

        if token.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        let mut failures: Vec<(u32, CatalogError)> = partial
            .map(|p| p.failures)
            .unwrap_or_default()
            .into_iter()
            .filter(|(page, _)| *page != 1)
            .collect();

        let mut items = Vec::new();
        let mut first_items = Some(first.items);

        for page in 1..=total_pages {
            if limit > 0 && items.len() >= limit {
                break;
            }

            let page_items = if page == 1 {
                first_items.take().unwrap_or_default()
            } else {
                let Some(body) = bodies.get(&page) else {
                    continue;
                };
                match self.decoder.decode_listing(body) {
                    Ok(decoded) => decoded.items,
                    Err(e) => {
                        tracing::warn!("Skipping undecodable listing page {}: {}", page, e);
                        failures.push((page, e.into()));
                        continue;
                    }
                }
            };

            items.extend(page_items);
        }

        if limit > 0 {
            items.truncate(limit);
        }

        failures.sort_by_key(|(page, _)| *page);
        let failed_pages = (!failures.is_empty()).then_some(PartialFetchError { failures });

        if let Some(failed) = &failed_pages {
            tracing::warn!("Discovery is incomplete: {}", failed);
        }

        Ok(Discovery {
            total_found,
            items,
            failed_pages,
        })
    }

    /// Runs a complete update
    ///
    /// # Arguments
    ///
    /// * `token` - Cancels the run; the caller applies any deadline
    /// * `limit` - Maximum number of tools to update (`0` = no limit)
    /// * `progress` - Optional sink for [`ProgressEvent`]s
    ///
    /// # Returns
    ///
    /// * `Ok(UpdateSummary)` - The run completed, possibly with skipped items
    /// * `Err(CatalogError::UpdateCancelled)` - The token was cancelled; carries
    ///   the counts reached so far
    /// * `Err(CatalogError::DiscoveryFailed)` - Listing page 1 was unusable
    pub async fn run(
        &mut self,
        token: &CancellationToken,
        limit: usize,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<UpdateSummary> {
        let reporter = ProgressReporter::new(progress, token.clone());

        self.transition(UpdatePhase::Discovering)?;
        reporter.emit(ProgressEvent::Start).await;

        let discovery = match self.discover(token, limit).await {
            Ok(discovery) => discovery,
            Err(e) => return Err(self.abort(&reporter, e, UpdateSummary::default()).await),
        };

        let mut summary = UpdateSummary {
            total: discovery.items.len(),
            listing_failures: discovery.failed_pages.as_ref().map_or(0, |p| p.len()),
            ..UpdateSummary::default()
        };

        if discovery.items.is_empty() {
            self.transition(UpdatePhase::Complete)?;
            reporter
                .emit(ProgressEvent::Complete {
                    processed: 0,
                    total: 0,
                })
                .await;
            return Ok(summary);
        }

        self.transition(UpdatePhase::FetchingDetails)?;
        reporter
            .emit(ProgressEvent::Progress {
                slug: None,
                processed: 0,
                total: summary.total,
            })
            .await;

        let fetch_failures = Arc::new(AtomicUsize::new(0));
        let written = Arc::new(AtomicUsize::new(0));
        let write_failures = Arc::new(AtomicUsize::new(0));

        let (mut results, detail_handle) = self.spawn_detail_stage(
            token,
            discovery.items,
            Arc::clone(&fetch_failures),
        );
        let (instruction_tx, writer_handle) =
            self.spawn_writer_stage(token, Arc::clone(&written), Arc::clone(&write_failures));

        let mut milestones = Milestones::new(summary.total, PROGRESS_EVERY);

        'drain: loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                record = results.recv() => record,
            };
            let Some(record) = next else {
                break;
            };

            let slug = record.item.slug.clone();
            let tool_id = match self.store.upsert_tool(token, &to_tool_record(&record)).await {
                Ok(id) => id,
                Err(StorageError::Cancelled) => break,
                Err(e) => {
                    tracing::warn!("Failed to persist tool {}: {}", slug, e);
                    summary.persistence_failures += 1;
                    continue;
                }
            };

            // The tool row is committed even if its instructions never go out
            summary.processed += 1;
            tracing::debug!("Tool persisted: {} ({} so far)", slug, summary.processed);

            for instruction in to_install_instructions(&record, &tool_id) {
                if send_or_cancel(&instruction_tx, instruction, token).await.is_err() {
                    break 'drain;
                }
            }

            if milestones.reached(summary.processed) {
                reporter
                    .emit(ProgressEvent::Progress {
                        slug: Some(slug),
                        processed: summary.processed,
                        total: summary.total,
                    })
                    .await;
            }
        }

        drop(results);
        detail_handle.join().await;

        if !token.is_cancelled() {
            self.transition(UpdatePhase::Draining)?;
        }
        drop(instruction_tx);
        writer_handle.join().await;

        summary.fetch_failures = fetch_failures.load(Ordering::SeqCst);
        summary.instructions_written = written.load(Ordering::SeqCst);
        summary.persistence_failures += write_failures.load(Ordering::SeqCst);

        if token.is_cancelled() {
            tracing::warn!(
                "Update cancelled after {}/{} tools",
                summary.processed,
                summary.total
            );
            return Err(self.abort(&reporter, CatalogError::Cancelled, summary).await);
        }

        self.transition(UpdatePhase::Complete)?;
        reporter
            .emit(ProgressEvent::Complete {
                processed: summary.processed,
                total: summary.total,
            })
            .await;

        tracing::info!(
            "Update complete: {}/{} tools, {} instructions ({} fetch failures, {} persistence failures)",
            summary.processed,
            summary.total,
            summary.instructions_written,
            summary.fetch_failures,
            summary.persistence_failures
        );

        Ok(summary)
    }

    /// Starts the detail workers: fetch, extract, fill gaps from the listing
    fn spawn_detail_stage(
        &self,
        token: &CancellationToken,
        items: Vec<ListingItem>,
        failures: Arc<AtomicUsize>,
    ) -> (mpsc::Receiver<DetailRecord>, StageHandle) {
        let stage = Stage::new(
            "detail",
            self.pipeline.detail_workers,
            self.pipeline.result_buffer,
        );
        let fetcher = self.fetcher.clone();
        let decoder = Arc::clone(&self.decoder);
        let worker_token = token.clone();

        stage.run(token, preloaded(items), move |item: ListingItem| {
            let fetcher = fetcher.clone();
            let decoder = Arc::clone(&decoder);
            let token = worker_token.clone();
            let failures = Arc::clone(&failures);

            async move {
                let result = match fetcher.fetch_detail_page(&token, &item.slug).await {
                    Ok(body) => decoder.extract_detail(&body).map_err(CatalogError::from),
                    Err(e) => Err(e),
                };

                match result {
                    Ok(mut record) => {
                        record.fill_from_listing(&item);
                        Some(record)
                    }
                    Err(e) if e.is_cancelled() => None,
                    Err(e) => {
                        tracing::warn!("Skipping tool {}: {}", item.slug, e);
                        failures.fetch_add(1, Ordering::SeqCst);
                        None
                    }
                }
            }
        })
    }

    /// Starts the instruction writers and returns the channel feeding them
    fn spawn_writer_stage(
        &self,
        token: &CancellationToken,
        written: Arc<AtomicUsize>,
        failures: Arc<AtomicUsize>,
    ) -> (
        mpsc::Sender<InstallInstructionRecord>,
        StageHandle,
    ) {
        let (sender, receiver) = mpsc::channel(self.pipeline.instruction_buffer.max(1));
        let stage = Stage::new("writer", self.pipeline.writer_workers, 1);
        let store = Arc::clone(&self.store);
        let worker_token = token.clone();

        let (_, handle) = stage.run(
            token,
            receiver,
            move |instruction: InstallInstructionRecord| {
                let store = Arc::clone(&store);
                let token = worker_token.clone();
                let written = Arc::clone(&written);
                let failures = Arc::clone(&failures);

                async move {
                    match store.upsert_install_instruction(&token, &instruction).await {
                        Ok(()) => {
                            written.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(StorageError::Cancelled) => {}
                        Err(e) => {
                            tracing::warn!(
                                "Failed to persist {} instruction for tool {}: {}",
                                instruction.platform_key,
                                instruction.tool_id,
                                e
                            );
                            failures.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    None::<()>
                }
            },
        );

        (sender, handle)
    }

    /// Moves to `Cancelled` or `Failed`, reports the cause, and returns the error
    ///
    /// A cancellation is returned as `UpdateCancelled` carrying `summary`.
    async fn abort(
        &mut self,
        reporter: &ProgressReporter,
        error: CatalogError,
        summary: UpdateSummary,
    ) -> CatalogError {
        let (next, error) = if error.is_cancelled() {
            (UpdatePhase::Cancelled, CatalogError::UpdateCancelled { summary })
        } else {
            (UpdatePhase::Failed, error)
        };

        if let Err(e) = self.transition(next) {
            tracing::error!("Could not record terminal phase: {}", e);
        }

        tracing::error!("Update ended early ({}): {}", self.phase, error);
        reporter
            .emit(ProgressEvent::Error {
                cause: error.to_string(),
            })
            .await;

        error
    }
}

/// Maps a page-1 failure to the error that ends discovery
fn discovery_failed(error: CatalogError) -> CatalogError {
    if error.is_cancelled() {
        CatalogError::Cancelled
    } else {
        CatalogError::DiscoveryFailed {
            source: Box::new(error),
        }
    }
}
