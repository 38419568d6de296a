//! Output module for reporting on the mirror
//!
//! This module handles:
//! - Loading and printing mirror statistics
//! - Printing the summary of an update run

pub mod stats;

pub use stats::{load_statistics, print_statistics, MirrorStatistics};

use crate::crawler::UpdateSummary;

/// Prints the summary of an update run to stdout
///
/// # Arguments
///
/// * `summary` - Counters returned by the run
pub fn print_update_summary(summary: &UpdateSummary) {
    println!("=== Update Summary ===\n");
    println!("  Tools persisted: {} / {}", summary.processed, summary.total);
    println!("  Install instructions written: {}", summary.instructions_written);

    let skipped = summary.fetch_failures + summary.listing_failures;
    if skipped > 0 || summary.persistence_failures > 0 {
        println!();
        println!("Skipped:");
        println!("  Listing pages: {}", summary.listing_failures);
        println!("  Detail pages: {}", summary.fetch_failures);
        println!("  Rejected writes: {}", summary.persistence_failures);
    }
}
