//! In-process HTTP servers standing in for partner APIs in tests.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;

/// Requests seen by a fake endpoint: the `Authorization` header and JSON body.
pub type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

pub fn seen() -> Seen {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(seen: &Seen, headers: &HeaderMap, body: Value) {
    let auth = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    seen.lock().push((auth, body));
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
