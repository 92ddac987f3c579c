//! Download engine state machine tests with a scripted transfer seam.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use mediathek_dl::download::HttpSeriesCatalog;
use mediathek_dl::store::RawSource;
use mediathek_dl::{
    Candidate, Database, DownloadEngine, RunConfig, RunMode, Store, Transfer, TransferError,
};

/// Transfer that fails a fixed number of times before writing the payload.
struct ScriptedTransfer {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    payload: Vec<u8>,
}

impl ScriptedTransfer {
    fn failing_times(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            payload: b"media payload".to_vec(),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transfer for ScriptedTransfer {
    async fn fetch(&self, url: &str, partial: &Path) -> Result<(), TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prior = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if prior > 0 {
            // A broken attempt still leaves partial bytes behind.
            tokio::fs::write(partial, b"part").await.unwrap();
            return Err(TransferError::HttpStatus {
                url: url.to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
            });
        }
        tokio::fs::write(partial, &self.payload).await.unwrap();
        Ok(())
    }
}

fn raw_source(id: &str, title: &str) -> RawSource {
    RawSource {
        id: id.to_string(),
        channel: Some("ZDF".to_string()),
        topic: Some("Spielfilm".to_string()),
        title: Some(title.to_string()),
        description: Some("Ein Film.".to_string()),
        timestamp: Some(1_700_000_000),
        duration: Some(5400),
        size: Some(1_000_000),
        url_website: Some(format!("https://www.zdf.de/serien/{id}")),
        url_subtitle: None,
        url_video: Some(format!("https://cdn.example.org/{id}.mp4")),
        url_video_low: None,
        url_video_hd: None,
        list_timestamp: None,
    }
}

fn candidate(id: &str, title: &str) -> Candidate {
    Candidate {
        id: id.to_string(),
        title: title.to_string(),
        link: format!("https://cdn.example.org/{id}.mp4"),
        duration: Duration::from_secs(5400),
        published_at: None,
        size_mb: 1.0,
        channel: "ZDF".to_string(),
        format: "mp4".to_string(),
        rating_ref: None,
        rating_resolved: false,
        website: Some(format!("https://www.zdf.de/serien/{id}")),
    }
}

async fn store_with(sources: &[RawSource]) -> Store {
    let db = Database::new_in_memory().await.unwrap();
    let store = Store::new(db);
    store.upsert_sources(sources).await.unwrap();
    store
}

fn config_for(dir: &tempfile::TempDir) -> RunConfig {
    RunConfig {
        download_dir: dir.path().to_path_buf(),
        min_free_gb: 0.0,
        single_file: true,
        ..RunConfig::default()
    }
}

#[tokio::test]
async fn test_fail_twice_then_succeed_commits_and_marks() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[raw_source("a", "Der Film")]).await;
    let transfer = Arc::new(ScriptedTransfer::failing_times(2));
    let engine = DownloadEngine::new(store.clone(), Arc::clone(&transfer) as Arc<dyn Transfer>);

    let stats = engine
        .process(&config_for(&dir), &[candidate("a", "Der Film")], None)
        .await;

    assert_eq!(stats.committed, 1);
    assert_eq!(stats.discarded, 0);
    assert_eq!(transfer.calls(), 3, "two failures plus the successful attempt");

    let final_path = dir.path().join("Der_Film.mp4");
    assert_eq!(tokio::fs::read(&final_path).await.unwrap(), b"media payload");
    assert!(!dir.path().join("Der_Film.mp4.partial").exists());
    assert!(store.is_downloaded("a").await.unwrap());
}

#[tokio::test]
async fn test_three_failures_discard_without_ledger_or_partial() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[raw_source("a", "Der Film")]).await;
    let transfer = Arc::new(ScriptedTransfer::failing_times(usize::MAX));
    let engine = DownloadEngine::new(store.clone(), Arc::clone(&transfer) as Arc<dyn Transfer>);

    let stats = engine
        .process(&config_for(&dir), &[candidate("a", "Der Film")], None)
        .await;

    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.committed, 0);
    assert_eq!(transfer.calls(), 3, "attempts are bounded");
    assert!(!dir.path().join("Der_Film.mp4").exists());
    assert!(
        !dir.path().join("Der_Film.mp4.partial").exists(),
        "exhausted downloads clean up their partial file"
    );
    assert!(!store.is_downloaded("a").await.unwrap());
}

#[tokio::test]
async fn test_admission_refusal_skips_without_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[raw_source("a", "Der Film")]).await;
    let transfer = Arc::new(ScriptedTransfer::failing_times(0));
    let engine = DownloadEngine::new(store.clone(), Arc::clone(&transfer) as Arc<dyn Transfer>);

    let config = RunConfig {
        min_free_gb: f64::MAX,
        ..config_for(&dir)
    };
    let stats = engine
        .process(&config, &[candidate("a", "Der Film")], None)
        .await;

    assert_eq!(stats.skipped, 1);
    assert_eq!(transfer.calls(), 0, "refused items never reach the transfer");
    assert!(!store.is_downloaded("a").await.unwrap());
}

#[tokio::test]
async fn test_one_failure_never_aborts_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[raw_source("a", "Kaputt"), raw_source("b", "Heile Welt")]).await;
    // First item burns all three attempts, second succeeds directly.
    let transfer = Arc::new(ScriptedTransfer::failing_times(3));
    let engine = DownloadEngine::new(store.clone(), Arc::clone(&transfer) as Arc<dyn Transfer>);

    let stats = engine
        .process(
            &config_for(&dir),
            &[candidate("a", "Kaputt"), candidate("b", "Heile Welt")],
            None,
        )
        .await;

    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.committed, 1);
    assert!(store.is_downloaded("b").await.unwrap());
    assert!(!store.is_downloaded("a").await.unwrap());
}

#[tokio::test]
async fn test_ephemeral_mode_never_writes_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[raw_source("a", "Der Film")]).await;
    let transfer = Arc::new(ScriptedTransfer::failing_times(0));
    let engine = DownloadEngine::new(store.clone(), Arc::clone(&transfer) as Arc<dyn Transfer>);

    let config = RunConfig {
        mode: RunMode::Ephemeral,
        ..config_for(&dir)
    };
    let stats = engine
        .process(&config, &[candidate("a", "Der Film")], None)
        .await;

    assert_eq!(stats.committed, 1);
    assert!(
        !store.is_downloaded("a").await.unwrap(),
        "quick runs remember nothing"
    );
}

#[tokio::test]
async fn test_sidecar_written_on_commit_when_enriched() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[raw_source("a", "Der Film")]).await;
    let transfer = Arc::new(ScriptedTransfer::failing_times(0));
    let engine = DownloadEngine::new(store.clone(), Arc::clone(&transfer) as Arc<dyn Transfer>);

    let config = RunConfig {
        enrich: true,
        ..config_for(&dir)
    };
    let mut item = candidate("a", "Der Film");
    item.rating_ref = Some("tt0012345".to_string());
    let ratings: HashMap<String, mediathek_dl::RatingRecord> = [(
        "tt0012345".to_string(),
        mediathek_dl::RatingRecord {
            rating_id: "tt0012345".to_string(),
            kind: Some("Movie".to_string()),
            name: Some("Der Film".to_string()),
            rating_value: Some(7.8),
            rating_count: Some(4321),
            published_at: chrono::NaiveDate::from_ymd_opt(2021, 6, 1),
            genres: Some("Drama".to_string()),
        },
    )]
    .into();

    let stats = engine.process(&config, &[item], Some(&ratings)).await;
    assert_eq!(stats.committed, 1);

    let sidecar = tokio::fs::read_to_string(dir.path().join("Der_Film.nfo"))
        .await
        .unwrap();
    assert!(sidecar.contains("title: Der Film\n"));
    assert!(sidecar.contains("plot: Ein Film.\n"));
    assert!(sidecar.contains("year: 2021\n"));
    assert!(sidecar.contains("id: tt0012345\n"));
}

/// Transfer that clears an obstruction of the final path before its second
/// attempt, simulating a transient commit failure.
struct UnblockingTransfer {
    obstruction: std::path::PathBuf,
    calls: AtomicUsize,
}

#[async_trait]
impl Transfer for UnblockingTransfer {
    async fn fetch(&self, _url: &str, partial: &Path) -> Result<(), TransferError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == 2 {
            tokio::fs::remove_dir(&self.obstruction).await.unwrap();
        }
        tokio::fs::write(partial, b"media payload").await.unwrap();
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_commit_rename_retries_instead_of_discarding() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[raw_source("a", "Der Film")]).await;

    // A directory squatting on the final path makes the first rename fail.
    let obstruction = dir.path().join("Der_Film.mp4");
    tokio::fs::create_dir_all(&obstruction).await.unwrap();

    let transfer = Arc::new(UnblockingTransfer {
        obstruction: obstruction.clone(),
        calls: AtomicUsize::new(0),
    });
    let engine = DownloadEngine::new(store.clone(), Arc::clone(&transfer) as Arc<dyn Transfer>);

    let stats = engine
        .process(&config_for(&dir), &[candidate("a", "Der Film")], None)
        .await;

    assert_eq!(stats.committed, 1, "a complete payload survives a failed rename");
    assert_eq!(stats.discarded, 0);
    assert_eq!(transfer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        tokio::fs::read(dir.path().join("Der_Film.mp4")).await.unwrap(),
        b"media payload"
    );
    assert!(store.is_downloaded("a").await.unwrap());
}

#[tokio::test]
async fn test_episode_metadata_nests_target_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&[raw_source("a", "Die Serie")]).await;

    // Marker fetched from a mocked program page through the catalog seam.
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .respond_with(
            wiremock::ResponseTemplate::new(200).set_body_string("Staffel 2, Folge 7"),
        )
        .mount(&server)
        .await;
    let catalog = Arc::new(HttpSeriesCatalog::with_urls(server.uri(), server.uri()));

    let transfer = Arc::new(ScriptedTransfer::failing_times(0));
    let engine = DownloadEngine::new(store.clone(), Arc::clone(&transfer) as Arc<dyn Transfer>)
        .with_catalog(catalog);

    let mut item = candidate("a", "Die Serie");
    item.website = Some(format!("{}/serien/die-serie", server.uri()));
    let stats = engine.process(&config_for(&dir), &[item], None).await;

    assert_eq!(stats.committed, 1);
    let nested = dir.path().join("Staffel 2").join("S02E07_Die_Serie.mp4");
    assert!(nested.exists(), "episode marker drives the target layout");

    let meta = store.episode_metadata("a").await.unwrap().unwrap();
    assert_eq!(meta.season, Some(2));
    assert_eq!(meta.episode, Some(7));
}
