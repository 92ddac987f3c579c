//! Series mode tests: catalog-driven collection stays separate from the
//! download phase.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use mediathek_dl::download::HttpSeriesCatalog;
use mediathek_dl::{
    Database, DownloadEngine, Pipeline, RatingClient, RunConfig, SearchClient, Store, Transfer,
    TransferError,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CATALOG_PAGE: &str = r#"
    <h2 class="cluster-title">Krimis</h2>
    <a class="teaser-title-link" title="Der Pass" href="/serien/der-pass"></a>
    <h2 class="cluster-title">Drama</h2>
    <a class="teaser-title-link" title="Bad Banks" href="/serien/bad-banks"></a>
"#;

struct CountingTransfer {
    calls: AtomicUsize,
}

#[async_trait]
impl Transfer for CountingTransfer {
    async fn fetch(&self, _url: &str, partial: &Path) -> Result<(), TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(partial, b"episode payload").await.unwrap();
        Ok(())
    }
}

async fn mock_upstream(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/serien"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CATALOG_PAGE))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(body_partial_json(serde_json::json!({"offset": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"results": [{
                "id": "ep1",
                "channel": "ZDF",
                "title": "Der Pass - Folge 1",
                "timestamp": 1_700_000_000,
                "duration": 5400,
                "size": 1_000_000,
                "url_video": "https://cdn.example.org/ep1.mp4",
            }]}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(body_partial_json(serde_json::json!({"offset": 50})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"results": []}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_series_collection_lists_without_downloading() {
    let server = MockServer::start().await;
    mock_upstream(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(Database::new_in_memory().await.unwrap());
    let transfer = Arc::new(CountingTransfer {
        calls: AtomicUsize::new(0),
    });
    let engine = DownloadEngine::new(store.clone(), Arc::clone(&transfer) as Arc<dyn Transfer>);
    let catalog = Arc::new(HttpSeriesCatalog::with_urls(
        format!("{}/serien", server.uri()),
        format!("{}/serien", server.uri()),
    ));
    let pipeline = Pipeline::new(
        store,
        SearchClient::with_base_url(server.uri()),
        RatingClient::new(),
        engine,
    )
    .with_catalog(catalog);

    let config = RunConfig {
        download_dir: dir.path().to_path_buf(),
        min_free_gb: 0.0,
        series_sections: vec!["Krimis".to_string()],
        ..RunConfig::default()
    };

    let batches = pipeline.collect_series(&config).await.unwrap();

    assert_eq!(batches.len(), 1, "section filter keeps only the Krimis series");
    assert_eq!(batches[0].series, "Der Pass");
    assert_eq!(batches[0].candidates.len(), 1);
    assert_eq!(batches[0].candidates[0].title, "Der Pass");
    assert_eq!(
        transfer.calls.load(Ordering::SeqCst),
        0,
        "collection alone must not transfer anything"
    );

    let stats = pipeline.download_series(&batches).await;

    assert_eq!(stats.committed, 1);
    assert_eq!(transfer.calls.load(Ordering::SeqCst), 1);
    let target = dir.path().join("Der Pass").join("Der_Pass.mp4");
    assert!(target.exists(), "episode lands in the per-series directory");
}
