//! Page decoders for listing and detail responses
//!
//! This module turns raw response bodies into catalog records:
//! - Listing (search) JSON into a [`ListingPage`]
//! - Detail page markup into a [`DetailRecord`], using the page's
//!   `application/ld+json` block plus a few data attributes
//!
//! Nothing here performs I/O. The [`PageDecoder`] trait is the seam the
//! update coordinator depends on, so markup changes stay contained here.

use crate::catalog::{DetailRecord, InstallInstructionRecord, ListingItem, ListingPage, ToolRecord};
use crate::url::trailing_segment;
use chrono::Utc;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

/// Structured-data type of the page's primary entity
const APPLICATION_TYPE: &str = "SoftwareApplication";

/// Errors produced while decoding a page
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid listing response: {0}")]
    InvalidListing(#[source] serde_json::Error),

    #[error("no structured data found")]
    NoStructuredData,

    #[error("structured data is not valid JSON: {0}")]
    MalformedStructuredData(#[source] serde_json::Error),

    #[error("structured data has no SoftwareApplication node")]
    NoApplicationNode,

    #[error("could not resolve a slug for the page")]
    MissingSlug,
}

/// Decodes raw page bodies into catalog records
pub trait PageDecoder: Send + Sync {
    /// Decodes one listing response
    fn decode_listing(&self, body: &[u8]) -> Result<ListingPage, ExtractError>;

    /// Extracts the tool described by one detail page
    fn extract_detail(&self, body: &[u8]) -> Result<DetailRecord, ExtractError>;
}

/// Decoder for the catalog's search JSON and detail markup
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogPageDecoder;

impl PageDecoder for CatalogPageDecoder {
    fn decode_listing(&self, body: &[u8]) -> Result<ListingPage, ExtractError> {
        decode_listing(body)
    }

    fn extract_detail(&self, body: &[u8]) -> Result<DetailRecord, ExtractError> {
        extract_detail(body)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    found: u64,
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    document: SearchDocument,
}

#[derive(Debug, Deserialize)]
struct SearchDocument {
    slug: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tagline: Option<String>,
    #[serde(default)]
    preview: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    license: Option<Vec<String>>,
}

impl From<SearchDocument> for ListingItem {
    fn from(doc: SearchDocument) -> Self {
        Self {
            slug: doc.slug,
            name: doc.name.unwrap_or_default(),
            tagline: doc.tagline.unwrap_or_default(),
            description: doc.preview.unwrap_or_default(),
            language: doc.language.unwrap_or_default(),
            license: doc.license.unwrap_or_default(),
        }
    }
}

/// Decodes a listing (search) response
///
/// `found` and `hits[].document.slug` are required; any other missing field
/// decodes as empty. Items keep their response order.
///
/// # Returns
///
/// * `Ok(ListingPage)` - Every hit, in order
/// * `Err(ExtractError::InvalidListing)` - The body is not a listing response
pub fn decode_listing(body: &[u8]) -> Result<ListingPage, ExtractError> {
    let response: SearchResponse =
        serde_json::from_slice(body).map_err(ExtractError::InvalidListing)?;

    Ok(ListingPage {
        total_found: response.found,
        items: response
            .hits
            .into_iter()
            .map(|hit| hit.document.into())
            .collect(),
    })
}

/// Extracts a tool from a detail page
///
/// # Extraction Rules
///
/// | Field | Source |
/// |-------|--------|
/// | name, description, language, license, repository, publish date | `SoftwareApplication` node of the ld+json block |
/// | slug | `data-slug` attribute, else trailing segment of `url`/`@id`, else slugified name |
/// | tagline | first `.tagline` element |
/// | installations | `data-install` attribute (flat or nested JSON) |
///
/// The returned record carries a freshly generated id; the store decides the
/// persisted id by slug.
///
/// # Returns
///
/// * `Ok(DetailRecord)` - The extracted tool and its install commands
/// * `Err(ExtractError)` - No structured data, no application node, or no slug
pub fn extract_detail(body: &[u8]) -> Result<DetailRecord, ExtractError> {
    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);

    let node = find_application_node(&document)?;

    let name = string_field(&node, "name").unwrap_or_default();
    let slug = resolve_slug(&document, &node, &name).ok_or(ExtractError::MissingSlug)?;
    let now = Utc::now();

    let item = ToolRecord {
        id: Uuid::new_v4().to_string(),
        slug,
        name,
        tagline: extract_tagline(&document),
        description: string_field(&node, "description")
            .map(|d| clean_description(&d))
            .unwrap_or_default(),
        language: joined_field(&node, "programmingLanguage"),
        license: joined_field(&node, "license"),
        code_repository: string_field(&node, "codeRepository"),
        date_published: string_field(&node, "datePublished"),
        created_at: now,
        updated_at: now,
    };

    Ok(DetailRecord {
        item,
        installations: extract_installations(&document),
    })
}

/// Returns the tool row for a detail record
pub fn to_tool_record(record: &DetailRecord) -> ToolRecord {
    record.item.clone()
}

/// Builds one install instruction per platform key
///
/// # Arguments
///
/// * `record` - The extracted detail record
/// * `tool_id` - Id of the owning tool as persisted by the store
pub fn to_install_instructions(record: &DetailRecord, tool_id: &str) -> Vec<InstallInstructionRecord> {
    let now = Utc::now();

    record
        .installations
        .iter()
        .map(|(platform_key, command)| InstallInstructionRecord {
            id: Uuid::new_v4().to_string(),
            tool_id: tool_id.to_string(),
            platform_key: platform_key.clone(),
            command: command.clone(),
            created_at: now,
        })
        .collect()
}

/// Lowercases a name and turns whitespace runs into single hyphens
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

fn find_application_node(document: &Html) -> Result<Map<String, Value>, ExtractError> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#)
        .map_err(|_| ExtractError::NoStructuredData)?;

    let mut blocks = 0usize;
    let mut parsed = 0usize;
    let mut first_error = None;

    for element in document.select(&selector) {
        blocks += 1;
        let text: String = element.text().collect();

        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => {
                parsed += 1;
                if let Some(node) = application_node(&value) {
                    return Ok(node.clone());
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match (blocks, parsed, first_error) {
        (0, _, _) => Err(ExtractError::NoStructuredData),
        (_, 0, Some(e)) => Err(ExtractError::MalformedStructuredData(e)),
        _ => Err(ExtractError::NoApplicationNode),
    }
}

/// Searches a JSON-LD value for the application node
///
/// Handles a bare object, a top-level array, and an `@graph` array.
fn application_node(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(object) => {
            if is_application(object) {
                return Some(object);
            }
            object.get("@graph").and_then(application_node)
        }
        Value::Array(values) => values.iter().find_map(application_node),
        _ => None,
    }
}

fn is_application(object: &Map<String, Value>) -> bool {
    match object.get("@type") {
        Some(Value::String(t)) => t == APPLICATION_TYPE,
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| t.as_str() == Some(APPLICATION_TYPE)),
        _ => false,
    }
}

fn string_field(node: &Map<String, Value>, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reads a field that may be a string, a `{name}` object, or a list of either
fn joined_field(node: &Map<String, Value>, key: &str) -> Option<String> {
    fn text(value: &Value) -> Option<&str> {
        match value {
            Value::String(s) => Some(s.trim()),
            Value::Object(object) => object.get("name").and_then(Value::as_str).map(str::trim),
            _ => None,
        }
    }

    let parts: Vec<&str> = match node.get(key)? {
        Value::Array(values) => values.iter().filter_map(text).collect(),
        value => text(value).into_iter().collect(),
    };

    let joined = parts
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    (!joined.is_empty()).then_some(joined)
}

fn resolve_slug(document: &Html, node: &Map<String, Value>, name: &str) -> Option<String> {
    let from_attribute = Selector::parse("[data-slug]").ok().and_then(|selector| {
        document
            .select(&selector)
            .filter_map(|element| element.value().attr("data-slug"))
            .map(str::trim)
            .find(|slug| !slug.is_empty())
            .map(str::to_string)
    });

    from_attribute
        .or_else(|| ["url", "@id"].iter().find_map(|key| {
            node.get(*key)
                .and_then(Value::as_str)
                .and_then(trailing_segment)
        }))
        .or_else(|| Some(slugify(name)).filter(|slug| !slug.is_empty()))
}

fn extract_tagline(document: &Html) -> Option<String> {
    let selector = Selector::parse(".tagline").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>())
        .map(|text| text.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_installations(document: &Html) -> BTreeMap<String, String> {
    // Attribute values arrive already entity-decoded
    let Ok(selector) = Selector::parse("[data-install]") else {
        return BTreeMap::new();
    };

    document
        .select(&selector)
        .find_map(|element| element.value().attr("data-install"))
        .map(parse_installations)
        .unwrap_or_default()
}

/// Parses install data in either the flat or the nested shape
///
/// Nested method keys may list several methods separated by `/`; each becomes
/// its own `platform:method` entry with the same command. Anything that is
/// not a JSON object yields an empty map.
fn parse_installations(raw: &str) -> BTreeMap<String, String> {
    let mut installations = BTreeMap::new();

    let object = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(object)) => object,
        Ok(_) => {
            tracing::debug!("Install data is not an object, ignoring");
            return installations;
        }
        Err(e) => {
            tracing::debug!("Install data did not decode, ignoring: {}", e);
            return installations;
        }
    };

    for (platform, value) in object {
        let platform = platform.trim();
        if platform.is_empty() {
            continue;
        }

        match value {
            Value::String(command) => {
                installations.insert(platform.to_string(), command);
            }
            Value::Object(methods) => {
                for (methods_key, command) in methods {
                    let Some(command) = command.as_str() else {
                        continue;
                    };

                    for method in methods_key.split('/').map(str::trim).filter(|m| !m.is_empty()) {
                        installations.insert(format!("{}:{}", platform, method), command.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    installations
}

/// Strips markup tags, decodes entities and trims
fn clean_description(raw: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("Invalid tag regex"));

    let stripped = tags.replace_all(raw, "");
    html_escape::decode_html_entities(&stripped).trim().to_string()
}
