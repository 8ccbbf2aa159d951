//! Shared helpers for integration tests: an HTTP server that serves
//! in-memory files and counts requests per path, plus fake GDAL tools.
//
// Not every test binary uses every helper.
#![allow(dead_code)]

use ahnget_types::WorkItem;
use axum::extract::{Path as UrlPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

type FileMap = Arc<HashMap<String, Vec<u8>>>;

pub struct TestServer {
    base_url: String,
    request_counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl TestServer {
    pub async fn new<S: Into<String>>(files: Vec<(S, Vec<u8>)>) -> Self {
        let files: FileMap = Arc::new(
            files
                .into_iter()
                .map(|(name, bytes)| (name.into(), bytes))
                .collect(),
        );

        let request_counts = Arc::new(Mutex::new(HashMap::new()));
        let counts = request_counts.clone();

        let app = Router::new()
            .route("/files/:name", get(serve_file))
            .with_state(files)
            .layer(axum::middleware::from_fn(move |req: Request, next: Next| {
                let counts = counts.clone();
                async move {
                    let path = req.uri().path().to_string();
                    if let Ok(mut counts) = counts.lock() {
                        *counts.entry(path).or_insert(0) += 1;
                    }
                    next.run(req).await
                }
            }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", addr.port()),
            request_counts,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/files/{}", self.base_url, name)
    }

    pub fn request_count(&self, name: &str) -> usize {
        self.request_counts
            .lock()
            .unwrap()
            .get(&format!("/files/{}", name))
            .copied()
            .unwrap_or(0)
    }

    pub fn work_item(&self, id: &str, name: &str, expected_size: u64) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            url: self.url(name),
            filename: name.to_string(),
            expected_size,
        }
    }
}

async fn serve_file(
    State(files): State<FileMap>,
    UrlPath(name): UrlPath<String>,
) -> axum::response::Response {
    match files.get(&name) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Write an executable shell script standing in for gdalinfo.
#[cfg(unix)]
pub fn fake_gdalinfo(dir: &tempfile::TempDir, script: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("gdalinfo");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
