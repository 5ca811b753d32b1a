//! # HTTP Remote
//!
//! [`RemoteStore`] over the Firebase-style REST protocol.
//!
//! ## Request Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  path "users/1"  ──►  {base_url}/users/1.json?auth=<token>              │
//! │  path ""         ──►  {base_url}/.json?auth=<token>                     │
//! │                                                                         │
//! │  GET     fetch value (null when missing)                                │
//! │  PUT     replace value          ─┐                                      │
//! │  PATCH   merge child paths       ├─ &print=silent (204, no echo)        │
//! │  DELETE  remove value           ─┘                                      │
//! │                                                                         │
//! │  non-2xx  ──►  SyncError::RequestFailed { url without auth }            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use tideline_core::tree::split_path;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;

// =============================================================================
// Auth Tokens
// =============================================================================

/// Supplies the `auth` query parameter for each request.
///
/// Called once per request, so implementations can refresh short-lived
/// tokens.
#[async_trait]
pub trait AuthTokenProvider: Send + Sync {
    /// Returns the token, or `None` to send the request unauthenticated.
    async fn token(&self) -> SyncResult<Option<String>>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl AuthTokenProvider for StaticToken {
    async fn token(&self) -> SyncResult<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

// =============================================================================
// HTTP Remote
// =============================================================================

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// REST client for a remote JSON document store.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    auth: Option<Arc<dyn AuthTokenProvider>>,
    timeout: Duration,
}

impl HttpRemote {
    /// Creates a client for `base_url` (http or https).
    pub fn new(base_url: &str) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Base URL must start with http:// or https://, got: {}",
                base_url
            )));
        }
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!(
                "Base URL cannot have child paths: {}",
                base_url
            )));
        }

        Ok(HttpRemote {
            client: Client::new(),
            base_url,
            auth: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Creates a client from the `[remote]` section.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let base_url = config
            .base_url()
            .ok_or_else(|| SyncError::InvalidConfig("remote.base_url is not set".into()))?;

        let mut remote = HttpRemote::new(base_url)?.with_timeout(config.request_timeout());
        if let Some(token) = &config.remote.auth_token {
            remote = remote.with_auth_token(token.clone());
        }
        Ok(remote)
    }

    pub fn with_auth_token(self, token: impl Into<String>) -> Self {
        self.with_auth_provider(Arc::new(StaticToken::new(token)))
    }

    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthTokenProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the URL for `path` without the auth parameter.
    pub fn url_for(&self, path: &str, silent: bool) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        let segments = split_path(path);

        {
            let mut parts = url
                .path_segments_mut()
                .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?;
            parts.pop_if_empty();

            match segments.split_last() {
                Some((leaf, parents)) => {
                    parts.extend(parents);
                    parts.push(&format!("{leaf}.json"));
                }
                None => {
                    parts.push(".json");
                }
            }
        }

        if silent {
            url.query_pairs_mut().append_pair("print", "silent");
        }
        Ok(url)
    }

    async fn send(&self, method: Method, path: &str, body: Option<&str>) -> SyncResult<String> {
        let silent = method != Method::GET;
        let mut url = self.url_for(path, silent)?;
        let display_url = url.to_string();

        if let Some(provider) = &self.auth {
            if let Some(token) = provider.token().await? {
                url.query_pairs_mut().append_pair("auth", &token);
            }
        }

        debug!(method = %method, url = %display_url, "Remote request");

        let mut request = self.client.request(method.clone(), url).timeout(self.timeout);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Timeout(self.timeout)
            } else {
                SyncError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(
                method = %method,
                url = %display_url,
                status = status.as_u16(),
                "Remote request failed"
            );
            return Err(SyncError::RequestFailed {
                method: method.to_string(),
                url: display_url,
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.text().await?)
    }
}

impl fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.auth.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn get(&self, path: &str) -> SyncResult<Value> {
        let text = self.send(Method::GET, path, None).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn put(&self, path: &str, body: &str) -> SyncResult<()> {
        self.send(Method::PUT, path, Some(body)).await.map(|_| ())
    }

    async fn patch(&self, path: &str, body: &str) -> SyncResult<()> {
        self.send(Method::PATCH, path, Some(body)).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> SyncResult<()> {
        self.send(Method::DELETE, path, None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_remote::MemoryRemote;
    use axum::extract::{Path, RawQuery, State};
    use axum::http::{Method as AxumMethod, StatusCode};
    use axum::routing::any;
    use axum::Router;
    use serde_json::json;

    #[derive(Clone)]
    struct TestServer {
        remote: Arc<MemoryRemote>,
        token: Option<String>,
        queries: Arc<parking_lot::Mutex<Vec<String>>>,
        delay: Duration,
    }

    async fn handle(
        State(server): State<TestServer>,
        method: AxumMethod,
        Path(path): Path<String>,
        RawQuery(query): RawQuery,
        body: String,
    ) -> (StatusCode, String) {
        let query = query.unwrap_or_default();
        server.queries.lock().push(query.clone());
        tokio::time::sleep(server.delay).await;

        if let Some(token) = &server.token {
            if !query.contains(&format!("auth={token}")) {
                return (StatusCode::UNAUTHORIZED, "Permission denied".into());
            }
        }

        let path = path.trim_end_matches(".json");
        let result = match method {
            AxumMethod::GET => server.remote.get(path).await.map(|v| v.to_string()),
            AxumMethod::PUT => server.remote.put(path, &body).await.map(|_| String::new()),
            AxumMethod::PATCH => server.remote.patch(path, &body).await.map(|_| String::new()),
            AxumMethod::DELETE => server.remote.delete(path).await.map(|_| String::new()),
            _ => return (StatusCode::METHOD_NOT_ALLOWED, String::new()),
        };

        match result {
            Ok(body) if body.is_empty() => (StatusCode::NO_CONTENT, body),
            Ok(body) => (StatusCode::OK, body),
            Err(SyncError::RequestFailed {
                status, message, ..
            }) => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
                message,
            ),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    async fn serve(server: TestServer) -> String {
        let app = Router::new()
            .route("/{*path}", any(handle))
            .with_state(server);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn test_server(token: Option<&str>) -> TestServer {
        TestServer {
            remote: Arc::new(MemoryRemote::new()),
            token: token.map(str::to_string),
            queries: Arc::new(parking_lot::Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_url_building() {
        let remote = HttpRemote::new("https://example.firebaseio.com/").unwrap();
        assert_eq!(
            remote.url_for("users/1", false).unwrap().as_str(),
            "https://example.firebaseio.com/users/1.json"
        );
        assert_eq!(
            remote.url_for("", false).unwrap().as_str(),
            "https://example.firebaseio.com/.json"
        );
        assert_eq!(
            remote.url_for("/users/1/name/", true).unwrap().as_str(),
            "https://example.firebaseio.com/users/1/name.json?print=silent"
        );

        let nested = HttpRemote::new("http://localhost:9000/v1").unwrap();
        assert_eq!(
            nested.url_for("a", false).unwrap().as_str(),
            "http://localhost:9000/v1/a.json"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            HttpRemote::new("ws://example.test"),
            Err(SyncError::InvalidUrl(_))
        ));
        assert!(HttpRemote::new("::not a url::").is_err());

        let config = SyncConfig::default();
        assert!(matches!(
            HttpRemote::from_config(&config),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_round_trip_through_server() {
        let server = test_server(None);
        let memory = server.remote.clone();
        let queries = server.queries.clone();
        let remote = HttpRemote::new(&serve(server).await).unwrap();

        remote.put("users/1", r#"{"name":"Ada","age":36}"#).await.unwrap();
        remote.patch("users/1", r#"{"name":"Grace"}"#).await.unwrap();
        assert_eq!(
            remote.get("users/1").await.unwrap(),
            json!({"name": "Grace", "age": 36})
        );
        assert_eq!(memory.value_at("users/1/age"), json!(36));

        remote.delete("users/1").await.unwrap();
        assert!(remote.get("users").await.unwrap().is_null());
        assert!(remote.get("").await.unwrap().is_null());

        let queries = queries.lock().clone();
        assert_eq!(queries[0], "print=silent");
        assert_eq!(queries[2], "");
    }

    #[tokio::test]
    async fn test_auth_token_is_sent_and_redacted() {
        let server = test_server(Some("s3cret"));
        let base = serve(server).await;

        let anonymous = HttpRemote::new(&base).unwrap();
        let err = anonymous.put("a", "1").await.unwrap_err();
        match err {
            SyncError::RequestFailed {
                status, ref url, ..
            } => {
                assert_eq!(status, 401);
                assert!(url.ends_with("/a.json?print=silent"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_retryable());

        let authed = HttpRemote::new(&base).unwrap().with_auth_token("s3cret");
        authed.put("a", "1").await.unwrap();
        assert_eq!(authed.get("a").await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_failed_status_carries_body() {
        let server = test_server(None);
        server.remote.fail_path("users/9", 503);
        let remote = HttpRemote::new(&serve(server).await).unwrap();

        let err = remote.get("users/9").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("injected failure"));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mut server = test_server(None);
        server.delay = Duration::from_secs(5);
        let remote = HttpRemote::new(&serve(server).await)
            .unwrap()
            .with_timeout(Duration::from_millis(50));

        let err = remote.get("slow").await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
    }
}
