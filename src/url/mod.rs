//! URL handling module for Catalog-Mirror
//!
//! This module builds the catalog's listing and detail endpoints from the
//! configured base URL and recovers slugs from entity URLs.

use crate::UrlError;
use url::Url;

/// Parses and checks a catalog base URL
///
/// The base must be able to carry path segments (`http`/`https`).
pub fn parse_base_url(base_url: &str) -> Result<Url, UrlError> {
    let url = Url::parse(base_url)?;
    if url.cannot_be_a_base() {
        return Err(UrlError::CannotBeABase(base_url.to_string()));
    }
    Ok(url)
}

/// Builds the listing endpoint for one page
///
/// Format: `{base}/search?q=*&page={page}&per_page={per_page}`
///
/// # Examples
///
/// ```
/// use catalog_mirror::url::{listing_url, parse_base_url};
///
/// let base = parse_base_url("https://catalog.example.com").unwrap();
/// let url = listing_url(&base, 2, 100).unwrap();
/// assert_eq!(url.as_str(), "https://catalog.example.com/search?q=*&page=2&per_page=100");
/// ```
pub fn listing_url(base: &Url, page: u32, per_page: u32) -> Result<Url, UrlError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| UrlError::CannotBeABase(base.to_string()))?
        .pop_if_empty()
        .push("search");
    url.query_pairs_mut()
        .append_pair("q", "*")
        .append_pair("page", &page.to_string())
        .append_pair("per_page", &per_page.to_string());
    Ok(url)
}

/// Builds the detail page endpoint for one slug
///
/// Format: `{base}/{slug}/`
pub fn detail_url(base: &Url, slug: &str) -> Result<Url, UrlError> {
    if slug.is_empty() {
        return Err(UrlError::Malformed("empty slug".to_string()));
    }

    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| UrlError::CannotBeABase(base.to_string()))?
        .pop_if_empty()
        .push(slug)
        .push("");
    Ok(url)
}

/// Returns the last non-empty path segment of an absolute or relative URL
///
/// Query strings and fragments are ignored, so `https://x.dev/tools/fd/#app`
/// yields `fd`.
pub fn trailing_segment(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let segment = match Url::parse(raw) {
        Ok(url) => url
            .path_segments()?
            .filter(|s| !s.is_empty())
            .last()
            .map(str::to_string),
        Err(_) => raw
            .split(['#', '?'])
            .next()
            .unwrap_or_default()
            .split('/')
            .filter(|s| !s.is_empty())
            .last()
            .map(str::to_string),
    }?;

    let decoded = percent_decode_segment(&segment);
    (!decoded.is_empty()).then_some(decoded)
}

/// Percent-decodes a path segment, keeping it unchanged if it is not valid UTF-8
fn percent_decode_segment(segment: &str) -> String {
    url::form_urlencoded::parse(format!("s={}", segment.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| segment.to_string())
}
