//! HTTP document store client
//!
//! Talks to the remote document service:
//!
//! - `PUT    documents/{path}` create or overwrite
//! - `PATCH  documents/{path}` merge fields
//! - `GET    documents/{path}` read one document
//! - `GET    documents/{collection}?where=..&equals=..` query a collection
//! - `DELETE documents/{path}`
//! - `POST   batch` atomic write batch
//! - `GET    listen/{collection}` (WebSocket) realtime query snapshots
//!
//! The watch connection reconnects with exponential backoff until the
//! subscription is dropped.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::document::{CollectionPath, Document, DocumentPath, FieldFilter, RemoteDocument};
use super::error::{RemoteError, RemoteResult};
use super::store::{BatchWrite, DocumentStore, Subscription, WriteBatch};

/// Backoff for the realtime watch connection
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    documents: Vec<RemoteDocument>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum WireWrite<'a> {
    Set {
        path: &'a DocumentPath,
        data: &'a Document,
    },
    Delete {
        path: &'a DocumentPath,
    },
}

#[derive(Debug, Serialize)]
struct WireBatch<'a> {
    writes: Vec<WireWrite<'a>>,
}

/// Current bearer token, shared with running watch connections
type SharedToken = Arc<RwLock<Option<String>>>;

fn read_token(token: &SharedToken) -> Option<String> {
    token.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// `DocumentStore` backed by the remote HTTP service
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base: Url,
    token: SharedToken,
    reconnect: ReconnectPolicy,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str) -> RemoteResult<Self> {
        // A trailing slash makes `join` append instead of replace
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base = Url::parse(&normalized).map_err(|source| RemoteError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|source| RemoteError::Transport {
                url: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            base,
            token: Arc::new(RwLock::new(None)),
            reconnect: ReconnectPolicy::default(),
        })
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Bearer token sent with every request; `None` sends none
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    fn token(&self) -> Option<String> {
        read_token(&self.token)
    }

    fn url(&self, route: &str, path: &str) -> RemoteResult<Url> {
        let relative = if path.is_empty() {
            route.to_string()
        } else {
            format!("{route}/{path}")
        };
        self.base
            .join(&relative)
            .map_err(|source| RemoteError::InvalidUrl {
                url: relative,
                source,
            })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and map non-success statuses to `RemoteError::Status`
    async fn send(&self, builder: RequestBuilder, path: &str) -> RemoteResult<Response> {
        let response = builder.send().await.map_err(|source| RemoteError::Transport {
            url: path.to_string(),
            source,
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response, path: &str) -> RemoteResult<T> {
        response.json().await.map_err(|e| RemoteError::Decode {
            path: path.to_string(),
            details: e.to_string(),
        })
    }

    fn listen_url(&self, collection: &CollectionPath, filter: Option<&FieldFilter>) -> RemoteResult<Url> {
        let mut url = self.url("listen", collection.as_str())?;
        if let Some(filter) = filter {
            url.query_pairs_mut()
                .append_pair("where", &filter.field)
                .append_pair("equals", &filter.value.to_string());
        }

        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| RemoteError::Watch(format!("cannot use scheme {scheme} for {url}")))?;
        Ok(url)
    }
}

fn is_not_found(err: &RemoteError) -> bool {
    matches!(err, RemoteError::Status { status, .. } if *status == StatusCode::NOT_FOUND.as_u16())
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn set(&self, path: &DocumentPath, doc: Document) -> RemoteResult<()> {
        let url = self.url("documents", path.as_str())?;
        self.send(self.request(Method::PUT, url).json(&doc), path.as_str())
            .await?;
        Ok(())
    }

    async fn update(&self, path: &DocumentPath, fields: Document) -> RemoteResult<()> {
        let url = self.url("documents", path.as_str())?;
        match self
            .send(self.request(Method::PATCH, url).json(&fields), path.as_str())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(RemoteError::NotFound(path.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, path: &DocumentPath) -> RemoteResult<Option<Document>> {
        let url = self.url("documents", path.as_str())?;
        match self.send(self.request(Method::GET, url), path.as_str()).await {
            Ok(response) => Ok(Some(Self::json(response, path.as_str()).await?)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filter: Option<&FieldFilter>,
    ) -> RemoteResult<Vec<RemoteDocument>> {
        let url = self.url("documents", collection.as_str())?;
        let mut builder = self.request(Method::GET, url);
        if let Some(filter) = filter {
            builder = builder.query(&[
                ("where", filter.field.clone()),
                ("equals", filter.value.to_string()),
            ]);
        }

        let response = self.send(builder, collection.as_str()).await?;
        let parsed: QueryResponse = Self::json(response, collection.as_str()).await?;
        Ok(parsed.documents)
    }

    async fn delete(&self, path: &DocumentPath) -> RemoteResult<()> {
        let url = self.url("documents", path.as_str())?;
        match self.send(self.request(Method::DELETE, url), path.as_str()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn commit(&self, batch: WriteBatch) -> RemoteResult<()> {
        batch.check_limit()?;
        if batch.is_empty() {
            return Ok(());
        }

        let body = WireBatch {
            writes: batch
                .writes()
                .iter()
                .map(|w| match w {
                    BatchWrite::Set(path, data) => WireWrite::Set { path, data },
                    BatchWrite::Delete(path) => WireWrite::Delete { path },
                })
                .collect(),
        };

        let url = self.url("batch", "")?;
        self.send(self.request(Method::POST, url).json(&body), "batch")
            .await?;
        debug!(size = batch.len(), "Committed batch");
        Ok(())
    }

    async fn listen(
        &self,
        collection: &CollectionPath,
        filter: Option<FieldFilter>,
    ) -> RemoteResult<Subscription> {
        let url = self.listen_url(collection, filter.as_ref())?;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(watch_loop(
            url,
            self.token.clone(),
            self.reconnect,
            tx,
            cancel.clone(),
        ));

        Ok(Subscription::new(rx, cancel))
    }
}

/// Keep a watch connection open, reconnecting with exponential backoff
///
/// Every attempt authenticates with the token current at that moment.
async fn watch_loop(
    url: Url,
    token: SharedToken,
    policy: ReconnectPolicy,
    tx: mpsc::UnboundedSender<Vec<RemoteDocument>>,
    cancel: CancellationToken,
) {
    let mut delay = policy.initial_delay;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = stream_snapshots(&url, &token, &tx) => match result {
                Ok(()) => {
                    debug!(%url, "Watch connection closed");
                    delay = policy.initial_delay;
                }
                Err(e) => warn!(%url, error = %e, "Watch connection failed"),
            }
        }

        if tx.is_closed() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }

    debug!(%url, "Watch stopped");
}

fn watch_request(url: &Url, token: &SharedToken) -> RemoteResult<Request> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| RemoteError::Watch(e.to_string()))?;
    if let Some(token) = read_token(token) {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| RemoteError::Watch(e.to_string()))?;
        request.headers_mut().insert("Authorization", value);
    }
    Ok(request)
}

/// Forward snapshots from one connection until it closes
async fn stream_snapshots(
    url: &Url,
    token: &SharedToken,
    tx: &mpsc::UnboundedSender<Vec<RemoteDocument>>,
) -> RemoteResult<()> {
    let request = watch_request(url, token)?;
    let (mut ws, _response) = connect_async(request)
        .await
        .map_err(|e| RemoteError::Watch(e.to_string()))?;
    info!(%url, "Watch connected");

    while let Some(message) = ws.next().await {
        let parsed: QueryResponse = match message.map_err(|e| RemoteError::Watch(e.to_string()))? {
            Message::Text(text) => serde_json::from_str(&text),
            Message::Binary(data) => serde_json::from_slice(&data),
            Message::Close(_) => return Ok(()),
            _ => continue,
        }
        .map_err(|e| RemoteError::Decode {
            path: url.path().to_string(),
            details: e.to_string(),
        })?;

        if tx.send(parsed.documents).is_err() {
            return Ok(());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn doc() -> Document {
        let mut d = Document::new();
        d.insert("Title".into(), json!("Plan"));
        d
    }

    #[tokio::test]
    async fn test_set_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/documents/tasks/u1/userTasks/t1"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({"Title": "Plan"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(&server.uri()).unwrap();
        store.set_token(Some("tok".into()));
        store
            .set(&DocumentPath::new("tasks/u1/userTasks/t1"), doc())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents/tasks/u1/userTasks/t1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(&server.uri()).unwrap();
        let result = store
            .get(&DocumentPath::new("tasks/u1/userTasks/t1"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_query_with_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents/active_sessions"))
            .and(query_param("where", "userId"))
            .and(query_param("equals", "\"u1\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [
                    {"path": "active_sessions/u1", "data": {"userId": "u1", "deviceId": "d1"}}
                ]
            })))
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(&format!("{}/", server.uri())).unwrap();
        let filter = FieldFilter::eq("userId", "u1");
        let docs = store
            .query(&CollectionPath::new("active_sessions"), Some(&filter))
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path.id(), "u1");
        assert_eq!(docs[0].data["deviceId"], json!("d1"));
    }

    #[tokio::test]
    async fn test_commit_posts_writes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batch"))
            .and(body_json(json!({
                "writes": [
                    {"op": "set", "path": "s/a", "data": {"Title": "Plan"}},
                    {"op": "delete", "path": "s/b"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(&server.uri()).unwrap();
        let mut batch = WriteBatch::new();
        batch
            .set(DocumentPath::new("s/a"), doc())
            .delete(DocumentPath::new("s/b"));
        store.commit(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_succeeds_and_errors_map() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/documents/s/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/documents/s/broken"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(&server.uri()).unwrap();
        store.delete(&DocumentPath::new("s/gone")).await.unwrap();

        let err = store
            .set(&DocumentPath::new("s/broken"), doc())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("maintenance"));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(&server.uri()).unwrap();
        let err = store
            .update(&DocumentPath::new("active_sessions/u1"), doc())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[test]
    fn test_listen_url_scheme() {
        let store = HttpDocumentStore::new("https://api.example.com/v1").unwrap();
        let url = store
            .listen_url(
                &CollectionPath::new("active_sessions"),
                Some(&FieldFilter::eq("userId", "u1")),
            )
            .unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/v1/listen/active_sessions");
        assert!(url.query().unwrap_or_default().contains("where=userId"));
    }

    #[test]
    fn test_watch_reconnect_uses_refreshed_token() {
        let store = HttpDocumentStore::new("https://api.example.com").unwrap();
        let url = store
            .listen_url(&CollectionPath::new("active_sessions"), None)
            .unwrap();
        // The handle a running watch holds
        let watch_token = store.token.clone();

        let first = watch_request(&url, &watch_token).unwrap();
        assert!(first.headers().get("Authorization").is_none());

        store.set_token(Some("fresh".into()));
        let second = watch_request(&url, &watch_token).unwrap();
        assert_eq!(second.headers()["Authorization"], "Bearer fresh");

        store.set_token(None);
        let third = watch_request(&url, &watch_token).unwrap();
        assert!(third.headers().get("Authorization").is_none());
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            HttpDocumentStore::new("not a url"),
            Err(RemoteError::InvalidUrl { .. })
        ));
    }
}
