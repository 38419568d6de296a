//! Catalog record types
//!
//! These are the structured records produced by the extractor and consumed by
//! the store. A tool's natural identity is its `slug`; the `id` carried here is
//! only a candidate until the store has resolved it.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One decoded listing (search) response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    /// Total number of catalog entries the remote side reports
    pub total_found: u64,

    /// Entries on this page, in response order
    pub items: Vec<ListingItem>,
}

/// Brief description of a catalog entry, as it appears in a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingItem {
    pub slug: String,
    pub name: String,
    pub tagline: String,
    pub description: String,
    pub language: String,
    pub license: Vec<String>,
}

/// Everything extracted from one detail page
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRecord {
    /// The tool itself
    pub item: ToolRecord,

    /// Platform key -> install command
    ///
    /// Keys are either bare (`brew`) or composite (`linux:arch`).
    pub installations: BTreeMap<String, String>,
}

impl DetailRecord {
    /// Fills fields the detail page left empty from the listing entry
    ///
    /// The detail page always wins when it has a value.
    pub fn fill_from_listing(&mut self, listing: &ListingItem) {
        let item = &mut self.item;

        if item.tagline.is_none() && !listing.tagline.trim().is_empty() {
            item.tagline = Some(listing.tagline.trim().to_string());
        }

        if item.description.is_empty() && !listing.description.trim().is_empty() {
            item.description = listing.description.trim().to_string();
        }

        if item.language.is_none() && !listing.language.trim().is_empty() {
            item.language = Some(listing.language.trim().to_string());
        }

        if item.license.is_none() && !listing.license.is_empty() {
            item.license = Some(listing.license.join(", "));
        }
    }
}

/// A catalog tool as persisted in the mirror
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRecord {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub tagline: Option<String>,
    pub description: String,
    pub language: Option<String>,
    pub license: Option<String>,
    pub code_repository: Option<String>,
    pub date_published: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One way to install a tool on one platform
#[derive(Debug, Clone, PartialEq)]
pub struct InstallInstructionRecord {
    pub id: String,
    /// Id of the owning [`ToolRecord`], as resolved by the store
    pub tool_id: String,
    pub platform_key: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
}

impl InstallInstructionRecord {
    /// Splits a composite platform key into its `(os, method)` parts
    ///
    /// Returns `None` for bare keys such as `brew`.
    pub fn platform_parts(&self) -> Option<(&str, &str)> {
        self.platform_key.split_once(':')
    }
}
