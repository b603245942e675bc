//! HTTP adapters against an in-process fake gateway.

use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use catalog_client::remote::{
    BlobStore, HttpRemote, ProcedureGateway, RemoteError, RemoteStore,
};
use catalog_engine::SyncCursor;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "secret";

#[derive(Clone, Default)]
struct Gateway {
    documents: Arc<Mutex<BTreeMap<(String, String), Value>>>,
}

/// Rejects requests without the expected bearer token.
struct Authorized;

impl FromRequestParts<Gateway> for Authorized {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _: &Gateway) -> Result<Self, Self::Rejection> {
        match parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        {
            Some(header) if header == format!("Bearer {TOKEN}") => Ok(Authorized),
            _ => Err((StatusCode::UNAUTHORIZED, "Missing or invalid bearer token")),
        }
    }
}

async fn get_document(
    State(gateway): State<Gateway>,
    _auth: Authorized,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let documents = gateway.documents.lock().unwrap();
    documents
        .get(&(collection, id))
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_document(
    State(gateway): State<Gateway>,
    _auth: Authorized,
    Path((collection, id)): Path<(String, String)>,
    Json(document): Json<Value>,
) -> StatusCode {
    gateway
        .documents
        .lock()
        .unwrap()
        .insert((collection, id), document);
    StatusCode::NO_CONTENT
}

async fn delete_document(
    State(gateway): State<Gateway>,
    _auth: Authorized,
    Path((collection, id)): Path<(String, String)>,
) -> StatusCode {
    match gateway.documents.lock().unwrap().remove(&(collection, id)) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

#[derive(Deserialize)]
struct ChangesQuery {
    since: String,
    limit: usize,
}

/// Echoes the request parameters back inside a single change.
async fn changes(
    _auth: Authorized,
    Path(collection): Path<String>,
    Query(query): Query<ChangesQuery>,
) -> Json<Value> {
    Json(json!({
        "changes": [{
            "stamp": 8,
            "id": "p1",
            "document": {"collection": collection, "since": query.since, "limit": query.limit}
        }],
        "hasMore": true
    }))
}

async fn upload(
    _auth: Authorized,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({
        "url": format!("https://cdn.example.com/{path}?type={content_type}&size={}", body.len())
    }))
}

async fn function(_auth: Authorized, Path(name): Path<String>, Json(payload): Json<Value>) -> (StatusCode, Json<Value>) {
    match name.as_str() {
        "createOrder" => (
            StatusCode::OK,
            Json(json!({"success": true, "data": {"orderId": "o1", "sequence": payload["lines"].as_array().map_or(0, Vec::len)}})),
        ),
        "finalizeSale" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "Order already paid"})),
        ),
        _ => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "down"}))),
    }
}

/// Test helper to start the fake gateway and a client pointed at it.
async fn serve(token: Option<&str>) -> (Gateway, HttpRemote) {
    let gateway = Gateway::default();
    let app = Router::new()
        .route(
            "/api/collections/{collection}/documents/{id}",
            get(get_document).put(put_document).delete(delete_document),
        )
        .route("/api/collections/{collection}/changes", get(changes))
        .route("/api/blobs/{*path}", put(upload))
        .route("/api/functions/{name}", post(function))
        .with_state(gateway.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let remote = HttpRemote::new(
        &format!("http://{addr}/api"),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap();
    (gateway, remote)
}

#[cfg(test)]
mod document_tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let (gateway, remote) = serve(Some(TOKEN)).await;

        assert_eq!(remote.get("products", "p1").await.unwrap(), None);

        let doc = json!({"id": "p1", "name": "Latte", "updatedAt": 100});
        remote.set("products", "p1", doc.clone()).await.unwrap();
        assert_eq!(remote.get("products", "p1").await.unwrap(), Some(doc));
        assert_eq!(gateway.documents.lock().unwrap().len(), 1);

        RemoteStore::delete(&remote, "products", "p1").await.unwrap();
        // Deleting again is not an error.
        RemoteStore::delete(&remote, "products", "p1").await.unwrap();
        assert!(gateway.documents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let (_gateway, remote) = serve(None).await;

        let err = remote.get("products", "p1").await.unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 401, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_changes_carry_cursor_and_limit() {
        let (_gateway, remote) = serve(Some(TOKEN)).await;

        let batch = remote
            .changes_since("products", &SyncCursor::new(7, "p_0"), 50)
            .await
            .unwrap();

        assert!(batch.has_more);
        assert_eq!(batch.changes[0].cursor(), SyncCursor::new(8, "p1"));
        let echoed = &batch.changes[0].document;
        assert_eq!(echoed["collection"], "products");
        assert_eq!(echoed["since"], "7_p_0");
        assert_eq!(echoed["limit"], 50);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_offline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let remote = HttpRemote::new(&format!("http://{addr}"), None, Duration::from_secs(2)).unwrap();
        let err = remote.get("products", "p1").await.unwrap_err();
        assert_eq!(err, RemoteError::Offline);
        assert!(err.is_transient());
    }
}

#[cfg(test)]
mod blob_and_procedure_tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_returns_url() {
        let (_gateway, remote) = serve(Some(TOKEN)).await;

        let url = remote
            .upload("products/owner-1/1700_latte.png", vec![0; 3], "image/png")
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://cdn.example.com/products/owner-1/1700_latte.png?type=image/png&size=3"
        );
    }

    #[tokio::test]
    async fn test_procedure_envelopes() {
        let (_gateway, remote) = serve(Some(TOKEN)).await;

        let created = remote
            .call("createOrder", json!({"lines": [{}, {}]}))
            .await
            .unwrap();
        assert!(created.success);
        assert_eq!(created.data["sequence"], 2);

        let rejected = remote.call("finalizeSale", json!({})).await.unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.error.as_deref(), Some("Order already paid"));

        let down = remote.call("scanOrderSlip", json!({})).await.unwrap_err();
        assert!(matches!(down, RemoteError::Status { status: 503, .. }));
        assert!(down.is_transient());
    }
}
