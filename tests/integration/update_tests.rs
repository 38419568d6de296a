//! Full update runs against a mock catalog

use crate::common::{
    create_test_config, detail_body, drain_events, listing_body, mount_detail, mount_listing,
    RecordingStore,
};
use async_trait::async_trait;
use catalog_mirror::config::Config;
use catalog_mirror::crawler::{run_update, CatalogPageDecoder, Coordinator, Fetcher};
use catalog_mirror::storage::{SqliteStore, StorageError, StorageResult, Store};
use catalog_mirror::{
    CatalogError, InstallInstructionRecord, ProgressEvent, ToolRecord, UpdatePhase,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn coordinator_for(config: &Config, store: Arc<dyn Store>) -> Coordinator {
    Coordinator::new(
        Fetcher::new(config).unwrap(),
        Arc::new(CatalogPageDecoder),
        store,
        config.pipeline.clone(),
    )
}

#[tokio::test]
async fn test_full_update_three_tools() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(3, &["fd", "bat", "ripgrep"])).await;

    Mock::given(method("GET"))
        .and(path("/fd/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_body(
            "fd",
            &json!({"brew": "brew install fd", "cargo": "cargo install fd-find"}),
        )))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bat/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_body(
            "bat",
            &json!({"linux": {"arch": "pacman -S bat", "ubuntu/debian": "apt install bat"}}),
        )))
        .mount(&mock_server)
        .await;
    mount_detail(&mock_server, "ripgrep").await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let store = Arc::new(RecordingStore::new());
    let mut coordinator = coordinator_for(&config, store.clone());
    let (tx, mut rx) = mpsc::channel(64);

    let summary = coordinator
        .run(&CancellationToken::new(), 0, Some(tx))
        .await
        .unwrap();

    assert_eq!(coordinator.phase(), UpdatePhase::Complete);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.fetch_failures, 0);
    assert_eq!(summary.persistence_failures, 0);
    assert_eq!(summary.instructions_written, 6);

    let mut slugs: Vec<_> = store.tools().into_iter().map(|t| t.slug).collect();
    slugs.sort();
    assert_eq!(slugs, vec!["bat", "fd", "ripgrep"]);

    let mut keys: Vec<_> = store
        .instructions()
        .into_iter()
        .map(|i| i.platform_key)
        .collect();
    keys.sort();
    assert_eq!(
        keys,
        vec!["brew", "brew", "cargo", "linux:arch", "linux:debian", "linux:ubuntu"]
    );

    // Every instruction points at the id its tool was persisted under
    let bat_id = store.tool_id("bat").unwrap();
    assert!(store
        .instructions()
        .iter()
        .filter(|i| i.platform_key.starts_with("linux:"))
        .all(|i| i.tool_id == bat_id));

    let events = drain_events(&mut rx);
    assert_eq!(events.first(), Some(&ProgressEvent::Start));
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Complete {
            processed: 3,
            total: 3
        })
    );
}

#[tokio::test]
async fn test_detail_fields_merge_with_listing() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(1, &["zoxide"])).await;
    mount_detail(&mock_server, "zoxide").await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let store = Arc::new(RecordingStore::new());
    let mut coordinator = coordinator_for(&config, store.clone());

    coordinator
        .run(&CancellationToken::new(), 0, None)
        .await
        .unwrap();

    let tools = store.tools();
    assert_eq!(tools.len(), 1);
    let tool = &tools[0];
    assert_eq!(tool.slug, "zoxide");
    assert_eq!(tool.tagline.as_deref(), Some("zoxide on the page"));
    assert_eq!(tool.description, "zoxide does & things");
    assert_eq!(tool.license.as_deref(), Some("MIT"));
}

#[tokio::test]
async fn test_limit_truncates_in_discovery_order() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(7, &["a1", "a2", "a3"])).await;
    mount_listing(&mock_server, 2, listing_body(7, &["b1", "b2", "b3"])).await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_body(7, &["c1"])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let coordinator = coordinator_for(&config, Arc::new(RecordingStore::new()));

    let discovery = coordinator
        .discover(&CancellationToken::new(), 5)
        .await
        .unwrap();

    assert_eq!(discovery.total_found, 7);
    assert_eq!(discovery.slugs(), vec!["a1", "a2", "a3", "b1", "b2"]);
    assert!(discovery.failed_pages.is_none());
}

#[tokio::test]
async fn test_limited_run_only_fetches_limited_details() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(3, &["fd", "bat", "exa"])).await;
    mount_detail(&mock_server, "fd").await;
    mount_detail(&mock_server, "bat").await;

    Mock::given(method("GET"))
        .and(path("/exa/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let store = Arc::new(RecordingStore::new());
    let mut coordinator = coordinator_for(&config, store.clone());

    let summary = coordinator
        .run(&CancellationToken::new(), 2, None)
        .await
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.processed, 2);
}

#[tokio::test]
async fn test_unlimited_discovery_spans_every_page() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(7, &["a1", "a2", "a3"])).await;
    mount_listing(&mock_server, 2, listing_body(7, &["b1", "b2", "b3"])).await;
    mount_listing(&mock_server, 3, listing_body(7, &["c1"])).await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let coordinator = coordinator_for(&config, Arc::new(RecordingStore::new()));

    let discovery = coordinator
        .discover(&CancellationToken::new(), 0)
        .await
        .unwrap();

    assert_eq!(
        discovery.slugs(),
        vec!["a1", "a2", "a3", "b1", "b2", "b3", "c1"]
    );
}

#[tokio::test]
async fn test_failed_listing_page_is_skipped() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(7, &["a1", "a2", "a3"])).await;
    mount_listing(&mock_server, 3, listing_body(7, &["c1"])).await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let coordinator = coordinator_for(&config, Arc::new(RecordingStore::new()));

    let discovery = coordinator
        .discover(&CancellationToken::new(), 0)
        .await
        .unwrap();

    assert_eq!(discovery.slugs(), vec!["a1", "a2", "a3", "c1"]);
    assert_eq!(discovery.failed_pages.unwrap().pages(), vec![2]);
}

#[tokio::test]
async fn test_undecodable_listing_page_is_skipped() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(6, &["a1", "a2", "a3"])).await;
    mount_listing(&mock_server, 2, "<html>maintenance</html>".to_string()).await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let coordinator = coordinator_for(&config, Arc::new(RecordingStore::new()));

    let discovery = coordinator
        .discover(&CancellationToken::new(), 0)
        .await
        .unwrap();

    assert_eq!(discovery.slugs(), vec!["a1", "a2", "a3"]);
    let failed = discovery.failed_pages.unwrap();
    assert_eq!(failed.pages(), vec![2]);
    assert!(matches!(failed.failures[0].1, CatalogError::Extract(_)));
}

#[tokio::test]
async fn test_first_page_failure_fails_the_run() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let store = Arc::new(RecordingStore::new());
    let mut coordinator = coordinator_for(&config, store.clone());
    let (tx, mut rx) = mpsc::channel(16);

    let result = coordinator.run(&CancellationToken::new(), 0, Some(tx)).await;

    assert!(matches!(result, Err(CatalogError::DiscoveryFailed { .. })));
    assert_eq!(coordinator.phase(), UpdatePhase::Failed);
    assert!(store.tools().is_empty());

    let events = drain_events(&mut rx);
    assert!(matches!(events.last(), Some(ProgressEvent::Error { .. })));
}

#[tokio::test]
async fn test_malformed_first_page_fails_the_run() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, "{\"found\": ".to_string()).await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let mut coordinator = coordinator_for(&config, Arc::new(RecordingStore::new()));

    let result = coordinator.run(&CancellationToken::new(), 0, None).await;

    match result {
        Err(CatalogError::DiscoveryFailed { source }) => {
            assert!(matches!(*source, CatalogError::Extract(_)));
        }
        other => panic!("expected DiscoveryFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_detail_is_skipped() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(3, &["fd", "missing", "bat"])).await;
    mount_detail(&mock_server, "fd").await;
    mount_detail(&mock_server, "bat").await;

    Mock::given(method("GET"))
        .and(path("/missing/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let store = Arc::new(RecordingStore::new());
    let mut coordinator = coordinator_for(&config, store.clone());
    let (tx, mut rx) = mpsc::channel(64);

    let summary = coordinator
        .run(&CancellationToken::new(), 0, Some(tx))
        .await
        .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.fetch_failures, 1);
    assert_eq!(store.tools().len(), 2);

    let events = drain_events(&mut rx);
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Complete {
            processed: 2,
            total: 3
        })
    );
}

#[tokio::test]
async fn test_page_without_structured_data_is_skipped() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(2, &["fd", "plain"])).await;
    mount_detail(&mock_server, "fd").await;

    Mock::given(method("GET"))
        .and(path("/plain/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>plain</body></html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let mut coordinator = coordinator_for(&config, Arc::new(RecordingStore::new()));

    let summary = coordinator
        .run(&CancellationToken::new(), 0, None)
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.fetch_failures, 1);
}

#[tokio::test]
async fn test_persistence_failures_are_counted() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(3, &["fd", "bat", "ripgrep"])).await;
    for slug in ["fd", "bat", "ripgrep"] {
        mount_detail(&mock_server, slug).await;
    }

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let store = Arc::new(RecordingStore::rejecting(&["bat"]));
    let mut coordinator = coordinator_for(&config, store.clone());

    let summary = coordinator
        .run(&CancellationToken::new(), 0, None)
        .await
        .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.persistence_failures, 1);
    assert_eq!(summary.instructions_written, 2);
    assert!(store.instructions().iter().all(|i| i.command != "brew install bat"));
}

#[tokio::test]
async fn test_empty_catalog_completes() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(0, &[])).await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let mut coordinator = coordinator_for(&config, Arc::new(RecordingStore::new()));

    let summary = coordinator
        .run(&CancellationToken::new(), 0, None)
        .await
        .unwrap();

    assert_eq!(summary.total, 0);
    assert_eq!(coordinator.phase(), UpdatePhase::Complete);
}

#[tokio::test]
async fn test_coordinator_runs_once() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(0, &[])).await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let mut coordinator = coordinator_for(&config, Arc::new(RecordingStore::new()));
    let token = CancellationToken::new();

    coordinator.run(&token, 0, None).await.unwrap();
    let second = coordinator.run(&token, 0, None).await;

    assert!(matches!(second, Err(CatalogError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_cancellation_stops_the_run_promptly() {
    let mock_server = MockServer::start().await;
    let slugs: Vec<String> = (0..12).map(|i| format!("tool-{}", i)).collect();
    let slug_refs: Vec<&str> = slugs.iter().map(String::as_str).collect();

    for (page, chunk) in slug_refs.chunks(3).enumerate() {
        mount_listing(&mock_server, page as u32 + 1, listing_body(12, chunk)).await;
    }

    // The first three tools answer at once, every later one hangs
    for slug in &slug_refs[..3] {
        mount_detail(&mock_server, slug).await;
    }
    Mock::given(method("GET"))
        .and(path_regex(r"^/tool-([3-9]|1[01])/$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), "unused.db");
    let store = Arc::new(RecordingStore::new());
    let mut coordinator = coordinator_for(&config, store.clone());
    let token = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(64);

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = coordinator.run(&token, 0, Some(tx)).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(coordinator.phase(), UpdatePhase::Cancelled);

    let error = result.unwrap_err();
    assert!(error.is_cancelled());
    let summary = *error.partial_summary().unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.total, 12);
    assert_eq!(summary.fetch_failures, 0);
    assert_eq!(summary.persistence_failures, 0);
    assert_eq!(summary.instructions_written, 3);
    assert_eq!(store.tools().len(), 3);

    // Only the in-flight detail requests were issued, and nothing follows
    let requests_at_return = mock_server.received_requests().await.unwrap().len();
    assert!(requests_at_return <= 4 + 3 + config.pipeline.detail_workers);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        mock_server.received_requests().await.unwrap().len(),
        requests_at_return
    );

    let events = drain_events(&mut rx);
    match events.last() {
        Some(ProgressEvent::Error { cause }) => assert!(cause.contains("3 of 12")),
        other => panic!("expected a final Error event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rerun_against_sqlite_is_idempotent() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(3, &["fd", "bat", "ripgrep"])).await;
    for slug in ["fd", "bat", "ripgrep"] {
        mount_detail(&mock_server, slug).await;
    }

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("mirror.db");
    let config = create_test_config(&mock_server.uri(), db_path.to_str().unwrap());
    let store = SqliteStore::new(&db_path).unwrap();

    let first = run_update(
        &config,
        Arc::new(store.clone()),
        &CancellationToken::new(),
        0,
        None,
    )
    .await
    .unwrap();
    let fd_id = store.get_tool_by_slug("fd").unwrap().unwrap().id;

    let second = run_update(
        &config,
        Arc::new(store.clone()),
        &CancellationToken::new(),
        0,
        None,
    )
    .await
    .unwrap();

    assert_eq!(first.processed, 3);
    assert_eq!(second.processed, 3);
    assert_eq!(store.count_tools().unwrap(), 3);
    assert_eq!(store.count_instructions().unwrap(), 3);
    assert_eq!(store.get_tool_by_slug("fd").unwrap().unwrap().id, fd_id);

    let instructions = store.instructions_for_tool(&fd_id).unwrap();
    assert_eq!(instructions.len(), 1);
    assert_eq!(instructions[0].command, "brew install fd");
}

/// Accepts tools but holds every instruction write until the run is cancelled
#[derive(Default)]
struct StalledWriterStore {
    tools: AtomicUsize,
}

#[async_trait]
impl Store for StalledWriterStore {
    async fn upsert_tool(
        &self,
        _token: &CancellationToken,
        tool: &ToolRecord,
    ) -> StorageResult<String> {
        self.tools.fetch_add(1, Ordering::SeqCst);
        Ok(tool.id.clone())
    }

    async fn upsert_install_instruction(
        &self,
        token: &CancellationToken,
        _instruction: &InstallInstructionRecord,
    ) -> StorageResult<()> {
        token.cancelled().await;
        Err(StorageError::Cancelled)
    }
}

#[tokio::test]
async fn test_tool_counts_when_cancelled_while_queueing_instructions() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, 1, listing_body(3, &["fd", "bat", "ripgrep"])).await;
    for slug in ["fd", "bat", "ripgrep"] {
        mount_detail(&mock_server, slug).await;
    }

    // One stalled writer plus a one-slot queue: the third tool's instruction
    // can never be queued
    let mut config = create_test_config(&mock_server.uri(), "unused.db");
    config.pipeline.writer_workers = 1;
    config.pipeline.instruction_buffer = 1;

    let store = Arc::new(StalledWriterStore::default());
    let mut coordinator = coordinator_for(&config, store.clone());
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let error = coordinator.run(&token, 0, None).await.unwrap_err();
    let summary = *error.partial_summary().unwrap();

    assert_eq!(store.tools.load(Ordering::SeqCst), 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.instructions_written, 0);
}
