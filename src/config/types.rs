use serde::Deserialize;

/// Main configuration structure for Catalog-Mirror
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
}

/// Remote catalog location
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the catalog site, without a trailing path
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Number of entries requested per listing page
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,
}

/// HTTP fetch behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Sustained request rate across all workers
    #[serde(rename = "requests-per-second", default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Number of requests allowed back-to-back before the rate applies
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Total attempts per URL before giving up
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for the quadratic retry backoff (milliseconds)
    #[serde(rename = "retry-base-delay-ms", default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Timeout for a single HTTP request (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Worker pool sizes and channel capacities for an update run
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(rename = "listing-workers", default = "default_listing_workers")]
    pub listing_workers: usize,

    #[serde(rename = "detail-workers", default = "default_detail_workers")]
    pub detail_workers: usize,

    #[serde(rename = "writer-workers", default = "default_writer_workers")]
    pub writer_workers: usize,

    /// Capacity of the extracted-record channel
    #[serde(rename = "result-buffer", default = "default_result_buffer")]
    pub result_buffer: usize,

    /// Capacity of the install-instruction channel
    #[serde(rename = "instruction-buffer", default = "default_instruction_buffer")]
    pub instruction_buffer: usize,

    /// Ceiling for a whole update run (seconds)
    #[serde(rename = "run-timeout-secs", default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            listing_workers: default_listing_workers(),
            detail_workers: default_detail_workers(),
            writer_workers: default_writer_workers(),
            result_buffer: default_result_buffer(),
            instruction_buffer: default_instruction_buffer(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    ///
    /// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_page_size() -> u32 {
    100
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_burst() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_listing_workers() -> usize {
    5
}

fn default_detail_workers() -> usize {
    5
}

fn default_writer_workers() -> usize {
    3
}

fn default_result_buffer() -> usize {
    100
}

fn default_instruction_buffer() -> usize {
    200
}

fn default_run_timeout_secs() -> u64 {
    1800
}
