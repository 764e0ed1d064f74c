//! HTTP cart backend
//!
//! Maps [`CartBackend`] calls onto the cart service's JSON resources:
//!
//! | Call           | Request                                            |
//! |----------------|----------------------------------------------------|
//! | `add_line`     | `POST   {base}/users/{user}/lines` `{variantId, quantity}` |
//! | `set_quantity` | `PUT    {base}/users/{user}/lines/{variant}` `{quantity}`  |
//! | `remove_line`  | `DELETE {base}/users/{user}/lines/{variant}`       |
//! | `fetch_line`   | `GET    {base}/users/{user}/lines/{variant}`       |
//! | `fetch_cart`   | `GET    {base}/users/{user}/lines`                 |
//!
//! Authentication is the [`HttpClient`]'s concern. A 401 surfaces as
//! [`CartError::Unauthorized`] so the session collaborator can take over.

use crate::backend::CartBackend;
use async_trait::async_trait;
use cart_types::{CartError, LineKey, LineSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP method subset used by the cart service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

/// Outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method
    pub method: Method,
    /// Path relative to the client's base URL
    pub path: String,
    /// JSON body, if any
    pub body: Option<Value>,
}

impl HttpRequest {
    fn new(method: Method, path: String) -> Self {
        Self {
            method,
            path,
            body: None,
        }
    }

    fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response from the cart service
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Decoded JSON body (`Null` when empty)
    pub body: Value,
}

impl HttpResponse {
    /// Create response
    #[inline]
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Decode a raw response body
    ///
    /// Success bodies must be JSON. Error bodies are often plain text or
    /// HTML from a proxy; those keep their text under `message` so the
    /// status still decides the error.
    ///
    /// # Errors
    /// `CartError::Decode` for a 2xx body that is not JSON.
    pub fn from_bytes(status: u16, bytes: &[u8]) -> Result<Self, CartError> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::new(status, Value::Null));
        }
        match serde_json::from_str(text) {
            Ok(body) => Ok(Self::new(status, body)),
            Err(_) if !(200..300).contains(&status) => Ok(Self::new(
                status,
                serde_json::json!({ "message": text }),
            )),
            Err(error) => Err(error.into()),
        }
    }

    /// Whether the status is 2xx
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Convert a non-2xx response into the matching error
    fn into_error(self) -> CartError {
        if self.status == 401 {
            return CartError::Unauthorized;
        }
        let message = ["message", "error"]
            .iter()
            .find_map(|field| self.body.get(field).and_then(Value::as_str))
            .unwrap_or("request failed")
            .to_string();
        CartError::rejected(self.status, message)
    }
}

/// Authenticated transport supplied by the session collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send one request; transport failures map to [`CartError::Transport`]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, CartError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddLineBody<'a> {
    variant_id: &'a str,
    quantity: u32,
}

#[derive(Serialize)]
struct QuantityBody {
    quantity: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLine {
    variant_id: String,
    #[serde(flatten)]
    snapshot: LineSnapshot,
}

#[derive(Deserialize)]
struct WireCart {
    lines: Vec<WireLine>,
}

/// [`CartBackend`] over an [`HttpClient`]
#[derive(Debug)]
pub struct HttpCartBackend<C> {
    client: C,
    user_id: String,
    base_path: String,
}

impl<C: HttpClient> HttpCartBackend<C> {
    /// Create backend for one user's cart under `/cart`
    #[must_use]
    pub fn new(client: C, user_id: impl Into<String>) -> Self {
        Self {
            client,
            user_id: user_id.into(),
            base_path: "/cart".to_string(),
        }
    }

    /// With a different resource prefix
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into().trim_end_matches('/').to_string();
        self
    }

    fn lines_path(&self, user_id: &str) -> String {
        format!(
            "{}/users/{}/lines",
            self.base_path,
            urlencoding::encode(user_id)
        )
    }

    fn line_path(&self, key: &LineKey) -> String {
        format!(
            "{}/{}",
            self.lines_path(&key.user_id),
            urlencoding::encode(&key.variant_id)
        )
    }

    async fn expect_ok(&self, request: HttpRequest) -> Result<HttpResponse, CartError> {
        let method = request.method;
        let response = self.client.send(request).await?;
        if response.is_ok() {
            Ok(response)
        } else {
            tracing::debug!(status = response.status, ?method, "cart request rejected");
            Err(response.into_error())
        }
    }
}

#[async_trait]
impl<C: HttpClient> CartBackend<LineKey> for HttpCartBackend<C> {
    async fn add_line(&self, key: &LineKey, quantity: u32) -> Result<LineSnapshot, CartError> {
        let body = serde_json::to_value(AddLineBody {
            variant_id: &key.variant_id,
            quantity,
        })?;
        let request =
            HttpRequest::new(Method::Post, self.lines_path(&key.user_id)).with_body(body);
        let response = self.expect_ok(request).await?;
        Ok(serde_json::from_value(response.body)?)
    }

    async fn set_quantity(&self, key: &LineKey, quantity: u32) -> Result<LineSnapshot, CartError> {
        let body = serde_json::to_value(QuantityBody { quantity })?;
        let request = HttpRequest::new(Method::Put, self.line_path(key)).with_body(body);
        let response = self.expect_ok(request).await?;
        Ok(serde_json::from_value(response.body)?)
    }

    async fn remove_line(&self, key: &LineKey) -> Result<(), CartError> {
        let request = HttpRequest::new(Method::Delete, self.line_path(key));
        self.expect_ok(request).await.map(|_| ())
    }

    async fn fetch_line(&self, key: &LineKey) -> Result<Option<LineSnapshot>, CartError> {
        let request = HttpRequest::new(Method::Get, self.line_path(key));
        let response = self.client.send(request).await?;
        match response.status {
            404 => Ok(None),
            _ if response.is_ok() => Ok(Some(serde_json::from_value(response.body)?)),
            _ => Err(response.into_error()),
        }
    }

    async fn fetch_cart(&self) -> Result<Vec<(LineKey, LineSnapshot)>, CartError> {
        let request = HttpRequest::new(Method::Get, self.lines_path(&self.user_id));
        let response = self.expect_ok(request).await?;
        let cart: WireCart = serde_json::from_value(response.body)?;
        Ok(cart
            .lines
            .into_iter()
            .map(|line| (LineKey::new(&self.user_id, line.variant_id), line.snapshot))
            .collect())
    }
}

/// [`HttpClient`] over `reqwest` with bearer authentication
#[cfg(feature = "reqwest-client")]
#[derive(Debug)]
pub struct ReqwestClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: parking_lot::RwLock<Option<String>>,
}

#[cfg(feature = "reqwest-client")]
impl ReqwestClient {
    /// Create client for a service root such as `https://shop.example.com/api`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: parking_lot::RwLock::new(None),
        }
    }

    /// Replace the access token (called by the auth collaborator on refresh)
    pub fn set_token(&self, token: Option<String>) {
        *self.bearer_token.write() = token;
    }

    /// Absolute URL for a request path
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[cfg(feature = "reqwest-client")]
#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, CartError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, self.url(&request.path));
        if let Some(token) = self.bearer_token.read().as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CartError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CartError::Transport(e.to_string()))?;
        HttpResponse::from_bytes(status, &bytes)
    }
}
