//! Crawler module for mirroring the remote catalog
//!
//! This module contains the core update logic, including:
//! - HTTP fetching with rate limiting, caching and retry logic
//! - Decoding listing responses and extracting detail pages
//! - Worker-pool stages connected by bounded channels
//! - Overall update coordination

mod cache;
mod coordinator;
mod fetcher;
mod parser;
mod pipeline;

pub use cache::{Cache, MemoryCache};
pub use coordinator::{Coordinator, Discovery, UpdateSummary};
pub use fetcher::{build_http_client, Fetcher, PartialFetchError};
pub use parser::{
    decode_listing, extract_detail, slugify, to_install_instructions, to_tool_record,
    CatalogPageDecoder, ExtractError, PageDecoder,
};
pub use pipeline::{preloaded, send_or_cancel, Stage, StageHandle};

use crate::config::Config;
use crate::state::ProgressEvent;
use crate::storage::Store;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs a complete update operation
///
/// This is the main entry point for refreshing the mirror. It will:
/// 1. Build the rate-limited fetcher from the configuration
/// 2. Discover entries from the listing endpoint
/// 3. Fetch and extract every detail page
/// 4. Persist tools and install instructions through `store`
///
/// # Arguments
///
/// * `config` - The mirror configuration
/// * `store` - Where records are written
/// * `token` - Cancels the run; apply any deadline before calling
/// * `limit` - Maximum number of tools to update (`0` = no limit)
/// * `progress` - Optional sink for progress events
///
/// # Returns
///
/// * `Ok(UpdateSummary)` - Update completed
/// * `Err(CatalogError)` - Update was cancelled or discovery failed
pub async fn run_update(
    config: &Config,
    store: Arc<dyn Store>,
    token: &CancellationToken,
    limit: usize,
    progress: Option<mpsc::Sender<ProgressEvent>>,
) -> Result<UpdateSummary> {
    let fetcher = Fetcher::new(config)?;
    let mut coordinator = Coordinator::new(
        fetcher,
        Arc::new(CatalogPageDecoder),
        store,
        config.pipeline.clone(),
    );

    coordinator.run(token, limit, progress).await
}
