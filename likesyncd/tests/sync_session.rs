use std::path::{Path, PathBuf};
use std::sync::Arc;

use likesyncd::acquire::{AcquireRequest, AcquisitionError, ConversionSignal, TrackAcquirer};
use likesyncd::catalog::CatalogContext;
use likesyncd::sync::coordinator::{CoordinatorConfig, DownloadCoordinator};
use likesyncd::sync::index::{LocalIndex, LocalRecord};
use likesyncd::sync::session::{SessionError, SyncOptions, SyncService};
use likesyncd::sync::status::{DownloadStatus, StatusKind, status_channel};
use likesyncd::tagger::{MetadataTagger, TagError, TrackTags};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FileAcquirer;

impl TrackAcquirer for FileAcquirer {
    async fn acquire(
        &self,
        request: &AcquireRequest,
        converting: &ConversionSignal,
    ) -> Result<PathBuf, AcquisitionError> {
        converting.fire();
        tokio::fs::create_dir_all(&request.output_dir).await?;
        let target = request.target_path();
        tokio::fs::write(&target, b"audio").await?;
        Ok(target)
    }
}

struct AcceptingTagger;

impl MetadataTagger for AcceptingTagger {
    async fn tag(&self, _path: &Path, _tags: &TrackTags) -> Result<(), TagError> {
        Ok(())
    }
}

fn saved(id: &str, name: &str, artist: &str) -> Value {
    json!({
        "track": {
            "id": id,
            "name": name,
            "artists": [{"name": artist}],
            "album": {"name": "Album", "images": []}
        }
    })
}

async fn mount_library(server: &MockServer, items: Vec<Value>) {
    let total = items.len();
    Mock::given(method("GET"))
        .and(path("/v1/me/tracks"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": items,
            "limit": 50,
            "offset": 0,
            "total": total
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn mirrors_remote_catalog_into_library() {
    let server = MockServer::start().await;
    mount_library(
        &server,
        vec![saved("a", "Back In Black", "AC/DC"), saved("b", "Kept", "Band")],
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let library = dir.path().join("library");
    std::fs::create_dir_all(&library).unwrap();
    let index = LocalIndex::open(&dir.path().join("index.db")).await.unwrap();
    let kept = library.join("Kept - Band.mp3");
    std::fs::write(&kept, b"audio").unwrap();
    index
        .put(&LocalRecord::new("b", "Kept", "Band", Some(kept.clone())))
        .await
        .unwrap();
    let unliked = library.join("Gone - Band.mp3");
    std::fs::write(&unliked, b"audio").unwrap();
    index
        .put(&LocalRecord::new("c", "Gone", "Band", Some(unliked.clone())))
        .await
        .unwrap();

    let (reporter, mut events) = status_channel();
    let coordinator = DownloadCoordinator::new(
        Arc::new(FileAcquirer),
        Arc::new(AcceptingTagger),
        index.clone(),
        CoordinatorConfig::new(&library),
    )
    .with_reporter(reporter);
    let catalog = CatalogContext::new(Some(server.uri()), Some("token".into())).unwrap();
    let service = SyncService::new(catalog, index.clone(), coordinator, SyncOptions::default());

    let result = service.start_sync(&CancellationToken::new()).await.unwrap();

    assert_eq!(result.remote_total, 2);
    assert_eq!(result.already_present, 1);
    assert_eq!(result.removed, 1);
    assert_eq!(result.results.get("a"), Some(&DownloadStatus::Completed));
    assert!(library.join("Back In Black - AC_DC.mp3").exists());
    assert!(kept.exists());
    assert!(!unliked.exists());
    assert!(!index.contains("c").await.unwrap());

    let kinds: Vec<StatusKind> = events.drain().into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StatusKind::Pending,
            StatusKind::Downloading,
            StatusKind::Processing,
            StatusKind::Processing,
            StatusKind::Completed,
        ]
    );

    let summary = serde_json::to_value(&result).unwrap();
    assert_eq!(summary["results"]["a"]["state"], "completed");
}

#[tokio::test]
async fn rejected_token_aborts_before_touching_library() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/me/tracks"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let index = LocalIndex::open(&dir.path().join("index.db")).await.unwrap();
    let file = dir.path().join("Old - Band.mp3");
    std::fs::write(&file, b"audio").unwrap();
    index
        .put(&LocalRecord::new("old", "Old", "Band", Some(file.clone())))
        .await
        .unwrap();
    let coordinator = DownloadCoordinator::new(
        Arc::new(FileAcquirer),
        Arc::new(AcceptingTagger),
        index.clone(),
        CoordinatorConfig::new(dir.path()),
    );
    let catalog = CatalogContext::new(Some(server.uri()), Some("token".into())).unwrap();
    let service = SyncService::new(catalog, index.clone(), coordinator, SyncOptions::default());

    let err = service
        .start_sync(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::AuthUnavailable(_)));
    assert!(index.contains("old").await.unwrap());
    assert!(file.exists());
}
