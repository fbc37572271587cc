use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use tempfile::TempDir;
use tower::ServiceExt;

use strongbox_catalog::{ArtifactCatalog, CatalogError, Page};
use strongbox_catalog_memory::MemoryArtifactCatalog;
use strongbox_core::{ArtifactId, ArtifactRoot, ExportArtifact, ExportFormat, OwnerId};
use strongbox_server::api::{AppState, ListLimits};
use strongbox_server::auth::AuthProvider;
use strongbox_server::auth::api_key::hash_api_key;
use strongbox_server::config::{ApiKeyConfig, AuthConfig};
use strongbox_server::gate::DownloadGate;
use strongbox_server::lifecycle::LifecycleCoordinator;

const ALICE_KEY: &str = "alice-secret-key";
const BOB_KEY: &str = "bob-secret-key";
const CSRF: &str = "4f1c2a9e7b";

// -- Helpers --------------------------------------------------------------

struct Harness {
    _tmp: TempDir,
    root: ArtifactRoot,
    catalog: Arc<MemoryArtifactCatalog>,
    state: AppState,
}

impl Harness {
    fn new(max_per_owner: usize) -> Self {
        Self::with_catalog(max_per_owner, |memory| memory as Arc<dyn ArtifactCatalog>)
    }

    /// Serve through `wrap(memory)` while seeding and inspecting the
    /// underlying memory catalog directly.
    fn with_catalog(
        max_per_owner: usize,
        wrap: impl FnOnce(Arc<MemoryArtifactCatalog>) -> Arc<dyn ArtifactCatalog>,
    ) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = ArtifactRoot::new(tmp.path());
        let catalog = Arc::new(MemoryArtifactCatalog::new(root.clone()));
        let coordinator = LifecycleCoordinator::new(
            wrap(Arc::clone(&catalog)),
            root.clone(),
            DownloadGate::new(max_per_owner),
        );
        let auth = AuthProvider::from_config(&AuthConfig {
            api_keys: vec![
                ApiKeyConfig {
                    owner: "alice".into(),
                    key_hash: hash_api_key(ALICE_KEY),
                },
                ApiKeyConfig {
                    owner: "bob".into(),
                    key_hash: hash_api_key(BOB_KEY),
                },
            ],
            ..AuthConfig::default()
        });

        Self {
            _tmp: tmp,
            root,
            catalog,
            state: AppState {
                coordinator: Arc::new(coordinator),
                auth: Arc::new(auth),
                limits: ListLimits::default(),
                retry_after_seconds: 5,
            },
        }
    }

    fn app(&self) -> axum::Router {
        strongbox_server::api::router(self.state.clone())
    }

    fn gate(&self) -> &DownloadGate {
        self.state.coordinator.gate()
    }

    async fn seed(&self, owner: &str, stamp: &str, files: &[(&str, &[u8])]) -> ExportArtifact {
        let dir = self.root.path().join(owner).join(stamp);
        for (name, data) in files {
            let path = dir.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
        self.state
            .coordinator
            .register(&OwnerId::from(owner), &dir, Some(ExportFormat::Json))
            .await
            .unwrap()
    }

    async fn row_exists(&self, artifact: &ExportArtifact) -> bool {
        match self.catalog.get_by_id(&artifact.id).await {
            Ok(_) => true,
            Err(CatalogError::NotFound(_)) => false,
            Err(e) => panic!("unexpected catalog error: {e}"),
        }
    }

    async fn wait_for_idle_gate(&self) {
        for _ in 0..500 {
            if self.gate().in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("downloads still in flight: {}", self.gate().in_flight());
    }
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn delete(uri: &str, key: &str, cookie: Option<&str>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("x-api-key", key);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, format!("csrf_token={cookie}"));
    }
    if let Some(token) = token {
        builder = builder.header("x-csrf-token", token);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn unpack(archive: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(archive));
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (path, data)
        })
        .collect()
}

/// Incompressible bytes, so archive size tracks content size.
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x >> 32) as u8
        })
        .collect()
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// -- Tests ----------------------------------------------------------------

#[tokio::test]
async fn health_is_public() {
    let h = Harness::new(10);
    let response = h.app().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn exports_require_credentials() {
    let h = Harness::new(10);

    let response = h.app().oneshot(get("/exports", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_json(response).await["error"].is_string());

    let response = h
        .app()
        .oneshot(get("/exports", Some("not-a-key")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn list_shows_only_own_exports_newest_first() {
    let h = Harness::new(10);
    let older = h.seed("alice", "20240101-080000", &[("a.json", b"[]")]).await;
    let newer = h.seed("alice", "20240301-080000", &[("a.json", b"[]")]).await;
    h.seed("bob", "20240201-080000", &[("b.json", b"[]")]).await;

    for uri in ["/exports", "/exports/list"] {
        let response = h.app().oneshot(get(uri, Some(ALICE_KEY))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let exports = json["exports"].as_array().unwrap();
        let ids: Vec<&str> = exports.iter().map(|e| e["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);
        assert!(exports[0].get("directory_path").is_none());
        assert_eq!(
            exports[0]["file_name"],
            "export-alice-20240301-080000.tar.gz"
        );
    }
}

#[tokio::test]
async fn list_pagination_is_clamped() {
    let h = Harness::new(10);
    h.seed("alice", "20240101-080000", &[("a.json", b"[]")]).await;
    h.seed("alice", "20240102-080000", &[("a.json", b"[]")]).await;

    let response = h
        .app()
        .oneshot(get("/exports?limit=100000", Some(ALICE_KEY)))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["limit"], 200);
    assert_eq!(json["exports"].as_array().unwrap().len(), 2);

    let response = h
        .app()
        .oneshot(get("/exports?limit=1&offset=1", Some(ALICE_KEY)))
        .await
        .unwrap();
    let json = body_json(response).await;
    let exports = json["exports"].as_array().unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0]["id"], "alice/20240101-080000");
}

#[tokio::test]
async fn download_streams_archive_and_keeps_export() {
    let h = Harness::new(10);
    let big = noise(300 * 1024, 7);
    let artifact = h
        .seed(
            "alice",
            "20240101-080000",
            &[("records.json", b"[{\"id\":1}]"), ("media/photo.bin", &big)],
        )
        .await;

    let response = h
        .app()
        .oneshot(get(
            &format!("/exports/download/{}", artifact.id),
            Some(ALICE_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/gzip");
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_owned();
    assert!(disposition.starts_with("attachment;"), "{disposition}");
    assert!(
        disposition.contains("export-alice-20240101-080000.tar.gz"),
        "{disposition}"
    );

    let entries = unpack(&body_bytes(response).await);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries["records.json"], b"[{\"id\":1}]");
    assert_eq!(entries["media/photo.bin"], big);

    assert!(Path::new(&artifact.directory_path).exists());
    assert!(h.row_exists(&artifact).await);
    h.wait_for_idle_gate().await;
}

#[tokio::test]
async fn completed_download_with_delete_after_removes_export() {
    let h = Harness::new(10);
    let artifact = h
        .seed("alice", "20240101-080000", &[("records.json", b"[1,2,3]")])
        .await;

    let response = h
        .app()
        .oneshot(get(
            &format!("/exports/download/{}?delete_after=true", artifact.id),
            Some(ALICE_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entries = unpack(&body_bytes(response).await);
    assert_eq!(entries["records.json"], b"[1,2,3]");

    // The body only ends after cleanup has run.
    assert!(!Path::new(&artifact.directory_path).exists());
    assert!(!h.row_exists(&artifact).await);
    assert_eq!(h.gate().in_flight(), 0);
}

#[tokio::test]
async fn client_disconnect_preserves_export() {
    let h = Harness::new(10);
    let files: Vec<Vec<u8>> = (0..3).map(|i| noise(512 * 1024, i + 1)).collect();
    let artifact = h
        .seed(
            "alice",
            "20240101-080000",
            &[("a.bin", &files[0]), ("b.bin", &files[1]), ("c.bin", &files[2])],
        )
        .await;

    let response = h
        .app()
        .oneshot(get(
            &format!("/exports/download/{}?delete_after=true", artifact.id),
            Some(ALICE_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut stream = response.into_body().into_data_stream();
    let first = stream.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    drop(stream);

    h.wait_for_idle_gate().await;
    let dir = Path::new(&artifact.directory_path);
    assert_eq!(std::fs::read(dir.join("a.bin")).unwrap(), files[0]);
    assert_eq!(std::fs::read(dir.join("c.bin")).unwrap(), files[2]);
    assert!(h.row_exists(&artifact).await);
}

#[tokio::test]
async fn non_owner_download_is_forbidden_and_logged() {
    let h = Harness::new(10);
    let artifact = h
        .seed("alice", "20240101-080000", &[("records.json", b"[]")])
        .await;

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let response = h
        .app()
        .oneshot(get(
            &format!("/exports/download/{}", artifact.id),
            Some(BOB_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(!body.contains("alice"), "{body}");

    let out = logs.contents();
    assert!(out.contains("WARN"), "{out}");
    assert!(out.contains("security"), "{out}");
    assert!(out.contains("requester=bob"), "{out}");
    assert!(out.contains("owner=alice"), "{out}");
    assert!(out.contains(artifact.id.as_str()), "{out}");

    assert_eq!(h.gate().tracked_owners(), 0);
    assert!(Path::new(&artifact.directory_path).exists());
}

#[tokio::test]
async fn missing_row_and_missing_files_are_reported_distinctly() {
    let h = Harness::new(10);

    let response = h
        .app()
        .oneshot(get(
            "/exports/download/alice/19990101-000000",
            Some(ALICE_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "export not found");

    let artifact = h
        .seed("alice", "20240101-080000", &[("records.json", b"[]")])
        .await;
    std::fs::remove_dir_all(&artifact.directory_path).unwrap();

    let response = h
        .app()
        .oneshot(get(
            &format!("/exports/download/{}", artifact.id),
            Some(ALICE_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "export files not found");
    assert!(h.row_exists(&artifact).await);
}

#[tokio::test]
async fn malformed_ids_are_rejected() {
    let h = Harness::new(10);
    for uri in [
        "/exports/download/alice/../bob/20240101-080000",
        "/exports/download/alice/2024/extra",
        "/exports/download/..",
    ] {
        let response = h.app().oneshot(get(uri, Some(ALICE_KEY))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

/// Serves rows whose stored directory was rewritten after registration.
struct TamperedCatalog {
    inner: Arc<MemoryArtifactCatalog>,
    directory_path: String,
}

#[async_trait::async_trait]
impl ArtifactCatalog for TamperedCatalog {
    async fn create(&self, artifact: &ExportArtifact) -> Result<(), CatalogError> {
        self.inner.create(artifact).await
    }

    async fn get_by_id(&self, id: &ArtifactId) -> Result<ExportArtifact, CatalogError> {
        let mut artifact = self.inner.get_by_id(id).await?;
        artifact.directory_path.clone_from(&self.directory_path);
        Ok(artifact)
    }

    async fn list_by_owner(
        &self,
        owner: &OwnerId,
        page: Page,
    ) -> Result<Vec<ExportArtifact>, CatalogError> {
        self.inner.list_by_owner(owner, page).await
    }

    async fn delete(&self, id: &ArtifactId) -> Result<(), CatalogError> {
        self.inner.delete(id).await
    }

    async fn owners(&self) -> Result<Vec<OwnerId>, CatalogError> {
        self.inner.owners().await
    }
}

#[tokio::test]
async fn tampered_row_is_refused_without_revealing_its_path() {
    let secret = "/var/lib/secret/backups/alice";
    let h = Harness::with_catalog(10, |memory| {
        Arc::new(TamperedCatalog {
            inner: memory,
            directory_path: secret.to_owned(),
        })
    });
    let artifact = h
        .seed("alice", "20240101-000000", &[("records.json", b"[]")])
        .await;

    let download = h
        .app()
        .oneshot(get(
            &format!("/exports/download/{}", artifact.id),
            Some(ALICE_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(download).await).unwrap();
    assert!(!body.contains("/var/lib"), "body leaked a path: {body}");

    let removal = h
        .app()
        .oneshot(delete(
            &format!("/exports/delete/{}", artifact.id),
            ALICE_KEY,
            Some(CSRF),
            Some(CSRF),
        ))
        .await
        .unwrap();
    assert_eq!(removal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(removal).await).unwrap();
    assert!(!body.contains("/var/lib"), "body leaked a path: {body}");

    assert!(h.row_exists(&artifact).await);
    assert_eq!(h.gate().in_flight(), 0);
}

#[tokio::test]
async fn eleventh_concurrent_download_is_rate_limited() {
    let h = Harness::new(10);
    let artifact = h
        .seed("alice", "20240101-080000", &[("records.json", b"[]")])
        .await;
    let uri = format!("/exports/download/{}", artifact.id);

    let mut open = Vec::new();
    for _ in 0..10 {
        let response = h.app().oneshot(get(&uri, Some(ALICE_KEY))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        open.push(response);
    }
    assert_eq!(h.gate().active(&OwnerId::from("alice")), 10);

    let response = h.app().oneshot(get(&uri, Some(ALICE_KEY))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "5");

    // Another owner is unaffected.
    let bob = h.seed("bob", "20240101-080000", &[("b.json", b"[]")]).await;
    let response = h
        .app()
        .oneshot(get(&format!("/exports/download/{}", bob.id), Some(BOB_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_bytes(response).await;

    // Finishing one of Alice's downloads frees a slot.
    let finished = open.pop().unwrap();
    assert!(unpack(&body_bytes(finished).await).contains_key("records.json"));
    let response = h.app().oneshot(get(&uri, Some(ALICE_KEY))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    open.push(response);

    drop(open);
    h.wait_for_idle_gate().await;
    assert_eq!(h.gate().tracked_owners(), 0);
}

#[tokio::test]
async fn delete_with_token_returns_empty_ok_then_not_found() {
    let h = Harness::new(10);
    let artifact = h
        .seed("alice", "20240101-080000", &[("records.json", b"[]")])
        .await;
    let uri = format!("/exports/delete/{}", artifact.id);

    let response = h
        .app()
        .oneshot(delete(&uri, ALICE_KEY, Some(CSRF), Some(CSRF)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
    assert!(!Path::new(&artifact.directory_path).exists());
    assert!(!h.row_exists(&artifact).await);

    let response = h
        .app()
        .oneshot(delete(&uri, ALICE_KEY, Some(CSRF), Some(CSRF)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_without_matching_token_is_forbidden() {
    let h = Harness::new(10);
    let artifact = h
        .seed("alice", "20240101-080000", &[("records.json", b"[]")])
        .await;
    let uri = format!("/exports/delete/{}", artifact.id);

    for (cookie, token) in [
        (None, None),
        (Some(CSRF), None),
        (None, Some(CSRF)),
        (Some(CSRF), Some("forged")),
    ] {
        let response = h
            .app()
            .oneshot(delete(&uri, ALICE_KEY, cookie, token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
    assert!(Path::new(&artifact.directory_path).exists());
    assert!(h.row_exists(&artifact).await);
}

#[tokio::test]
async fn delete_by_non_owner_is_forbidden() {
    let h = Harness::new(10);
    let artifact = h
        .seed("alice", "20240101-080000", &[("records.json", b"[]")])
        .await;

    let response = h
        .app()
        .oneshot(delete(
            &format!("/exports/delete/{}", artifact.id),
            BOB_KEY,
            Some(CSRF),
            Some(CSRF),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(h.row_exists(&artifact).await);
}

#[tokio::test]
async fn openapi_document_lists_export_routes() {
    let h = Harness::new(10);
    let response = h
        .app()
        .oneshot(get("/api-doc/openapi.json", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let paths = json["paths"].as_object().unwrap();
    assert!(paths.contains_key("/exports"));
    assert!(paths.contains_key("/exports/download/{id}"));
    assert!(paths.contains_key("/exports/delete/{id}"));
}
