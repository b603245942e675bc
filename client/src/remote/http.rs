//! Remote collaborators over a JSON HTTP gateway.
//!
//! Routes, relative to the configured base URL:
//!
//! | Call | Route |
//! |---|---|
//! | create | `POST /collections/{c}/documents` |
//! | get / set / update / delete | `GET` / `PUT` / `PATCH` / `DELETE /collections/{c}/documents/{id}` |
//! | query | `POST /collections/{c}/query` |
//! | changes | `GET /collections/{c}/changes?since={token}&limit={n}` |
//! | batch | `POST /batch` |
//! | blobs | `PUT` / `DELETE /blobs/{path}` |
//! | procedures | `POST /functions/{name}` |

use super::{
    BatchOp, BlobStore, ChangeBatch, Filter, ProcedureGateway, ProcedureResponse, RemoteError,
    RemoteResult, RemoteStore,
};
use async_trait::async_trait;
use catalog_engine::SyncCursor;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base: Url,
    auth_token: Option<String>,
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Deserialize)]
struct Documents {
    documents: Vec<Value>,
}

#[derive(Deserialize)]
struct Uploaded {
    url: String,
}

impl HttpRemote {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base = Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> RemoteResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn document_url(&self, collection: &str, id: &str) -> RemoteResult<Url> {
        self.url(["collections", collection, "documents", id])
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(response).await)
        }
    }
}

async fn status_error(response: Response) -> RemoteError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    RemoteError::Status { status, message }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn create(&self, collection: &str, document: Value) -> RemoteResult<String> {
        let url = self.url(["collections", collection, "documents"])?;
        let response = self
            .send(self.request(Method::POST, url).json(&document))
            .await?;
        let created: Created = response.json().await?;
        Ok(created.id)
    }

    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Value>> {
        let url = self.document_url(collection, id)?;
        let response = self.request(Method::GET, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            _ => Err(status_error(response).await),
        }
    }

    async fn set(&self, collection: &str, id: &str, document: Value) -> RemoteResult<()> {
        let url = self.document_url(collection, id)?;
        self.send(self.request(Method::PUT, url).json(&document))
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> RemoteResult<()> {
        let url = self.document_url(collection, id)?;
        let response = self
            .request(Method::PATCH, url)
            .json(&fields)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(format!("{collection}/{id}"))),
            status if status.is_success() => Ok(()),
            _ => Err(status_error(response).await),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
        let url = self.document_url(collection, id)?;
        let response = self.request(Method::DELETE, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(status_error(response).await),
        }
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> RemoteResult<Vec<Value>> {
        let url = self.url(["collections", collection, "query"])?;
        let response = self
            .send(
                self.request(Method::POST, url)
                    .json(&json!({ "filters": filters })),
            )
            .await?;
        let found: Documents = response.json().await?;
        Ok(found.documents)
    }

    async fn changes_since(
        &self,
        collection: &str,
        cursor: &SyncCursor,
        limit: usize,
    ) -> RemoteResult<ChangeBatch> {
        let url = self.url(["collections", collection, "changes"])?;
        let since = cursor.to_token();
        let limit = limit.to_string();
        let response = self
            .send(
                self.request(Method::GET, url)
                    .query(&[("since", since.as_str()), ("limit", limit.as_str())]),
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn batch_write(&self, ops: Vec<BatchOp>) -> RemoteResult<()> {
        let url = self.url(["batch"])?;
        self.send(self.request(Method::POST, url).json(&json!({ "ops": ops })))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for HttpRemote {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> RemoteResult<String> {
        let url = self.url(std::iter::once("blobs").chain(path.split('/')))?;
        let response = self
            .send(
                self.request(Method::PUT, url)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(bytes),
            )
            .await?;
        let uploaded: Uploaded = response.json().await?;
        Ok(uploaded.url)
    }

    async fn delete(&self, path: &str) -> RemoteResult<()> {
        let url = self.url(std::iter::once("blobs").chain(path.split('/')))?;
        let response = self.request(Method::DELETE, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(status_error(response).await),
        }
    }
}

#[async_trait]
impl ProcedureGateway for HttpRemote {
    async fn call(&self, name: &str, payload: Value) -> RemoteResult<ProcedureResponse> {
        let url = self.url(["functions", name])?;
        let response = self
            .request(Method::POST, url)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Failed procedures usually still answer with the envelope.
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ProcedureResponse>(&body) {
            Ok(envelope) if !envelope.success => Ok(envelope),
            _ => Err(RemoteError::Status {
                status: status.as_u16(),
                message: body,
            }),
        }
    }
}
