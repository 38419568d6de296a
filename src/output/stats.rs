//! Statistics generation from the mirror database
//!
//! This module provides functionality for extracting and displaying
//! mirror statistics from the storage layer.

use crate::storage::{RunRecord, SqliteStore, StorageResult};

/// How many platform keys are listed
const TOP_PLATFORMS: usize = 10;

/// How many update runs are listed
const RECENT_RUNS: usize = 5;

/// Mirror statistics summary
#[derive(Debug, Clone)]
pub struct MirrorStatistics {
    /// Number of tools in the mirror
    pub total_tools: usize,

    /// Number of install instructions in the mirror
    pub total_instructions: usize,

    /// Most common platform keys with their instruction counts
    pub top_platforms: Vec<(String, usize)>,

    /// Most recent update runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The store to query
///
/// # Returns
///
/// * `Ok(MirrorStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(store: &SqliteStore) -> StorageResult<MirrorStatistics> {
    Ok(MirrorStatistics {
        total_tools: store.count_tools()?,
        total_instructions: store.count_instructions()?,
        top_platforms: store.platform_breakdown(TOP_PLATFORMS)?,
        recent_runs: store.latest_runs(RECENT_RUNS)?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &MirrorStatistics) {
    println!("=== Mirror Statistics ===\n");

    println!("Overview:");
    println!("  Tools: {}", stats.total_tools);
    println!("  Install instructions: {}", stats.total_instructions);
    let average = if stats.total_tools > 0 {
        stats.total_instructions as f64 / stats.total_tools as f64
    } else {
        0.0
    };
    println!("  Instructions per tool: {:.1}", average);
    println!();

    if !stats.top_platforms.is_empty() {
        println!("Top Platforms:");
        for (platform, count) in &stats.top_platforms {
            let percentage = if stats.total_instructions > 0 {
                (*count as f64 / stats.total_instructions as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", platform, count, percentage);
        }
        println!();
    }

    if stats.recent_runs.is_empty() {
        println!("No update runs recorded");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!(
            "  #{} {} [{}] {}/{} tools, {} skipped, {} rejected",
            run.id,
            run.started_at,
            run.status.to_db_string(),
            run.counts.processed,
            run.counts.total,
            run.counts.fetch_failures,
            run.counts.persistence_failures
        );
        if let Some(error) = &run.error_message {
            println!("      error: {}", error);
        }
    }
}
