/// Update phase definitions for tracking an update run
///
/// This module defines every phase an update run moves through and which
/// transitions between them are legal.
use std::fmt;

/// Represents the current phase of an update run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdatePhase {
    // ===== Active Phases =====
    /// Coordinator built, nothing requested yet
    Idle,

    /// Fetching and decoding listing pages to build the slug list
    Discovering,

    /// Detail workers are fetching pages while tools are being upserted
    FetchingDetails,

    /// All detail pages are in; waiting for queued instructions to be written
    Draining,

    // ===== Terminal Phases =====
    /// Run finished; individual items may still have been skipped
    Complete,

    /// Discovery could not be established (listing page 1 unusable)
    Failed,

    /// The run's token was cancelled or its deadline expired
    Cancelled,
}

impl UpdatePhase {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the run is still in progress
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Discovering | Self::FetchingDetails | Self::Draining
        )
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: UpdatePhase) -> bool {
        use UpdatePhase::*;

        matches!(
            (self, next),
            (Idle, Discovering)
                | (Discovering, FetchingDetails)
                | (Discovering, Complete)
                | (Discovering, Failed)
                | (Discovering, Cancelled)
                | (FetchingDetails, Draining)
                | (FetchingDetails, Cancelled)
                | (Draining, Complete)
                | (Draining, Cancelled)
        )
    }

    /// Converts the phase to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::FetchingDetails => "fetching_details",
            Self::Draining => "draining",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
