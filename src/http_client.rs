use anyhow::Context;
use reqwest::header::{self, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::auth::CredentialStore;
use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::error::{normalize, ApiError, RequestFailure};
use crate::retry::{with_retry, RetryPolicy};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Events emitted by the client for the application to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A response came back 401; stored credentials have already been removed
    AuthenticationFailed { url: String, login_path: String },
}

/// Description of a single API call
///
/// Built with the consuming builder methods, then handed to the client by
/// reference; the client never modifies it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    body: Option<Value>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// `path` is relative to the client's base URL, or an absolute http(s) URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` and attach it
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, RequestFailure> {
        let value = serde_json::to_value(body).context("Failed to serialize request body")?;
        Ok(self.body(value))
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Header override; replaces any header of the same name the client would send
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Per-request timeout overriding the client default
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// HTTP client for the rental backend
///
/// Attaches the stored bearer token to every request, purges credentials on
/// 401 and reports it through [`ClientEvent`], and normalizes every failure
/// into an [`ApiError`].
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL without trailing slash
    base_url: String,

    /// Credential context shared with the session service
    credentials: Arc<CredentialStore>,

    /// Reported to subscribers on authentication failure
    login_path: String,

    events: broadcast::Sender<ClientEvent>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: &ClientConfig, credentials: Arc<CredentialStore>) -> anyhow::Result<Self> {
        Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base URL: {}", config.base_url))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            login_path: config.login_path.clone(),
            events,
        })
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a request and decode the response data
    pub async fn send<T: DeserializeOwned>(&self, request: &RequestDescriptor) -> Result<T, ApiError> {
        self.dispatch(request)
            .await
            .map_err(|failure| self.report(request, failure))
    }

    /// Execute a request that fails as cancelled once `token` fires
    pub async fn send_cancellable<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        token: &CancelToken,
    ) -> Result<T, ApiError> {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(RequestFailure::Cancelled),
            result = self.dispatch(request) => result,
        };

        result.map_err(|failure| self.report(request, failure))
    }

    /// Execute a request, retrying failures according to `policy`
    pub async fn send_with_retry<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        policy: RetryPolicy,
    ) -> Result<T, ApiError> {
        with_retry(|| self.send(request), policy).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(&RequestDescriptor::get(path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = RequestDescriptor::post(path).json(body).map_err(normalize)?;
        self.send(&request).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = RequestDescriptor::put(path).json(body).map_err(normalize)?;
        self.send(&request).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = RequestDescriptor::patch(path).json(body).map_err(normalize)?;
        self.send(&request).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(&RequestDescriptor::delete(path)).await
    }

    async fn dispatch<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
    ) -> Result<T, RequestFailure> {
        let data = self.execute(request).await?;
        let decoded = serde_json::from_value(data).context("Failed to decode response data")?;
        Ok(decoded)
    }

    /// Send the request and return the response body as JSON
    async fn execute(&self, request: &RequestDescriptor) -> Result<Value, RequestFailure> {
        let url = self.resolve_url(&request.path)?;
        let request_id = Uuid::new_v4().to_string();

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .header(header::ACCEPT, "application/json")
            .header("X-Request-Id", &request_id);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        // A missing token is not an error; the request goes out unauthenticated
        match self.credentials.access_token() {
            Ok(Some(token)) => builder = builder.bearer_auth(token),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read access token, sending unauthenticated")
            }
        }

        let mut req = builder.build()?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", name))?;
            req.headers_mut().insert(name, value);
        }

        tracing::debug!(
            method = %request.method,
            url = %url,
            request_id = %request_id,
            "Sending HTTP request"
        );

        let response = self.client.execute(req).await?;
        let status = response.status();

        tracing::debug!(
            status = %status,
            request_id = %request_id,
            "Received HTTP response"
        );

        if status == StatusCode::UNAUTHORIZED {
            self.handle_unauthorized(&url);
        }

        let text = response.text().await?;

        if !status.is_success() {
            return Err(RequestFailure::Status { status, body: text });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        // Non-JSON payloads are handed back as a plain string
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    fn resolve_url(&self, path: &str) -> Result<Url, RequestFailure> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        };

        let url = Url::parse(&raw).with_context(|| format!("Invalid request URL: {}", raw))?;
        Ok(url)
    }

    /// Purge credentials and notify subscribers; runs for any request that gets a 401
    fn handle_unauthorized(&self, url: &Url) {
        tracing::warn!(url = %url, "Received 401, clearing stored credentials");

        if let Err(e) = self.credentials.clear() {
            tracing::error!(error = %e, "Failed to clear stored credentials");
        }

        let event = ClientEvent::AuthenticationFailed {
            url: url.to_string(),
            login_path: self.login_path.clone(),
        };

        // No subscribers is fine
        if self.events.send(event).is_err() {
            tracing::debug!("No subscribers for authentication failure event");
        }
    }

    /// Normalize a failure and log it once
    fn report(&self, request: &RequestDescriptor, failure: RequestFailure) -> ApiError {
        let error = normalize(failure);

        tracing::warn!(
            method = %request.method,
            path = %request.path,
            code = %error.code,
            message = %error.message,
            "API request failed"
        );

        error
    }
}
