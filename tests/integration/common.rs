//! Shared fixtures for the integration tests

use async_trait::async_trait;
use catalog_mirror::config::{
    Config, FetcherConfig, OutputConfig, PipelineConfig, SourceConfig, UserAgentConfig,
};
use catalog_mirror::storage::{Store, StorageError, StorageResult};
use catalog_mirror::{InstallInstructionRecord, ProgressEvent, ToolRecord};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a fast test configuration pointing at `base_url`
pub fn create_test_config(base_url: &str, db_path: &str) -> Config {
    Config {
        source: SourceConfig {
            base_url: base_url.to_string(),
            page_size: 3,
        },
        fetcher: FetcherConfig {
            requests_per_second: 1000,
            burst: 1000,
            max_retries: 3,
            retry_base_delay_ms: 10,
            request_timeout_secs: 30,
        },
        pipeline: PipelineConfig {
            listing_workers: 3,
            detail_workers: 3,
            writer_workers: 2,
            result_buffer: 4,
            instruction_buffer: 8,
            run_timeout_secs: 60,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
    }
}

/// A listing response reporting `found` entries and listing `slugs`
pub fn listing_body(found: u64, slugs: &[&str]) -> String {
    let hits: Vec<_> = slugs
        .iter()
        .map(|slug| {
            json!({
                "document": {
                    "slug": slug,
                    "name": slug,
                    "tagline": format!("{} from the listing", slug),
                    "preview": format!("About {}", slug),
                    "language": "Rust",
                    "license": ["MIT"]
                }
            })
        })
        .collect();

    json!({ "found": found, "hits": hits }).to_string()
}

/// A detail page for `slug` carrying `install` as its install data
pub fn detail_body(slug: &str, install: &serde_json::Value) -> String {
    let ld_json = json!({
        "@context": "https://schema.org",
        "@graph": [
            { "@type": "WebPage", "@id": format!("https://catalog.example.com/{}/", slug) },
            {
                "@type": "SoftwareApplication",
                "@id": format!("https://catalog.example.com/{}/#software", slug),
                "name": slug,
                "description": format!("<p>{} does &amp; things</p>", slug),
                "programmingLanguage": "Rust",
                "codeRepository": format!("https://github.com/example/{}", slug),
                "datePublished": "2020-01-01"
            }
        ]
    });

    format!(
        r#"<html><head><script type="application/ld+json">{}</script></head>
        <body data-slug="{}"><p class="tagline">{} on the page</p>
        <div data-install="{}"></div></body></html>"#,
        ld_json,
        slug,
        slug,
        html_escape::encode_double_quoted_attribute(&install.to_string())
    )
}

/// Mounts listing page `page`
pub async fn mount_listing(server: &MockServer, page: u32, body: String) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Mounts a detail page for `slug` with a single `brew` install command
pub async fn mount_detail(server: &MockServer, slug: &str) {
    let install = json!({ "brew": format!("brew install {}", slug) });
    Mock::given(method("GET"))
        .and(path(format!("/{}/", slug)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_body(slug, &install))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

/// Drains every event already sent on a progress channel
pub fn drain_events(receiver: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// In-memory store that records every write and can reject chosen slugs
#[derive(Default)]
pub struct RecordingStore {
    ids: Mutex<HashMap<String, String>>,
    tools: Mutex<Vec<ToolRecord>>,
    instructions: Mutex<Vec<InstallInstructionRecord>>,
    rejected_slugs: Vec<String>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(slugs: &[&str]) -> Self {
        Self {
            rejected_slugs: slugs.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn tools(&self) -> Vec<ToolRecord> {
        self.tools.lock().unwrap().clone()
    }

    pub fn instructions(&self) -> Vec<InstallInstructionRecord> {
        self.instructions.lock().unwrap().clone()
    }

    pub fn tool_id(&self, slug: &str) -> Option<String> {
        self.ids.lock().unwrap().get(slug).cloned()
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn upsert_tool(
        &self,
        token: &CancellationToken,
        tool: &ToolRecord,
    ) -> StorageResult<String> {
        if token.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        if self.rejected_slugs.contains(&tool.slug) {
            return Err(StorageError::Database(format!("rejected {}", tool.slug)));
        }

        let id = self
            .ids
            .lock()
            .unwrap()
            .entry(tool.slug.clone())
            .or_insert_with(|| tool.id.clone())
            .clone();
        self.tools.lock().unwrap().push(tool.clone());
        Ok(id)
    }

    async fn upsert_install_instruction(
        &self,
        token: &CancellationToken,
        instruction: &InstallInstructionRecord,
    ) -> StorageResult<()> {
        if token.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        self.instructions.lock().unwrap().push(instruction.clone());
        Ok(())
    }
}
