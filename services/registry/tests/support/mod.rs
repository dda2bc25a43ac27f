//! In-process HTTP server standing in for the open-data portal.
//!
//! - `GET|HEAD /files/:name` serves a registered file with its validators
//! - `GET|HEAD /hang/:name` accepts the request and never answers
//! - anything else is 404

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct ServedFile {
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Clone, Default)]
struct ServerState {
    files: Arc<Mutex<HashMap<String, ServedFile>>>,
    downloads: Arc<AtomicUsize>,
}

pub struct FileServer {
    base_url: String,
    state: ServerState,
}

impl FileServer {
    pub async fn start() -> Self {
        let state = ServerState::default();
        let app = Router::new()
            .route("/files/:name", get(serve_file))
            .route("/hang/:name", get(hang))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("listener addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test server");
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn put(&self, name: &str, file: ServedFile) {
        self.state.files.lock().unwrap().insert(name.to_string(), file);
    }

    pub fn remove(&self, name: &str) {
        self.state.files.lock().unwrap().remove(name);
    }

    pub fn file_url(&self, name: &str) -> String {
        format!("{}/files/{}", self.base_url, name)
    }

    pub fn hanging_url(&self, name: &str) -> String {
        format!("{}/hang/{}", self.base_url, name)
    }

    /// Number of GET requests answered so far (HEAD excluded).
    pub fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }
}

async fn serve_file(State(state): State<ServerState>, method: Method, Path(name): Path<String>) -> Response {
    let Some(file) = state.files.lock().unwrap().get(&name).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if method == Method::GET {
        state.downloads.fetch_add(1, Ordering::SeqCst);
    }

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"));
    if let Some(etag) = &file.etag {
        headers.insert(header::ETAG, HeaderValue::from_str(etag).unwrap());
    }
    if let Some(last_modified) = &file.last_modified {
        headers.insert(header::LAST_MODIFIED, HeaderValue::from_str(last_modified).unwrap());
    }
    (headers, file.body).into_response()
}

async fn hang(Path(_name): Path<String>) -> StatusCode {
    std::future::pending::<()>().await;
    StatusCode::OK
}

/// CSV body with the published header and the given data rows.
pub fn csv_body<S: AsRef<str>>(rows: &[S]) -> Vec<u8> {
    let mut body = String::from("АВС/ DEF;От;До;Емкость;Оператор;Регион;ИНН");
    for row in rows {
        body.push('\n');
        body.push_str(row.as_ref());
    }
    body.push('\n');
    body.into_bytes()
}
