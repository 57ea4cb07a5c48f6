/// API Client: the single point of entry for all calls to the evaluation backend.
///
/// Every endpoint module (auth, upload, evaluate, poller) goes through
/// `ApiClient::request`, which owns status handling. 404 is reported as its own
/// error so polling can treat "job not visible yet" as a soft retry.
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{multipart::Form, Client, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{ClientError, ClientResult};
use crate::session::Session;

pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Request body variants the backend accepts.
#[derive(Debug)]
pub enum RequestBody {
    Json(Value),
    Multipart(Form),
}

/// Method, extra headers and optional body for one call.
#[derive(Debug)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn post() -> Self {
        Self {
            method: Method::POST,
            ..Self::get()
        }
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> ClientResult<Self> {
        self.body = Some(RequestBody::Json(serde_json::to_value(body)?));
        Ok(self)
    }

    pub fn multipart(mut self, form: Form) -> Self {
        self.body = Some(RequestBody::Multipart(form));
        self
    }

    /// Adds `Authorization: Bearer <token>` and `X-Tenant-ID: <tenant>`.
    pub fn with_session(mut self, session: &Session) -> ClientResult<Self> {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", session.token))
            .map_err(|_| ClientError::Validation("token contains invalid characters".into()))?;
        let tenant = HeaderValue::from_str(&session.tenant_id).map_err(|_| {
            ClientError::Validation("tenant id contains invalid characters".into())
        })?;
        self.headers.insert(AUTHORIZATION, bearer);
        self.headers
            .insert(HeaderName::from_static("x-tenant-id"), tenant);
        Ok(self)
    }
}

/// Thin wrapper over `reqwest::Client` bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `url(prefix)` with `id` appended as one percent-encoded path segment,
    /// so `/`, `?` or `#` in a server-issued id stay inside that segment.
    pub fn resource_url(&self, prefix: &str, id: &str) -> ClientResult<String> {
        let mut url = Url::parse(&self.url(prefix))
            .map_err(|e| ClientError::Validation(format!("invalid API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Validation("API URL cannot take a path".into()))?
            .pop_if_empty()
            .push(id);
        Ok(url.into())
    }

    /// Performs the call and returns the parsed body.
    ///
    /// The body is always read in full and parsed leniently: an empty or
    /// non-JSON body becomes `{}`. Status mapping:
    /// - 404 → `ClientError::NotFound`
    /// - other non-2xx → `ClientError::Request` with the server's message,
    ///   or the status text when the body carries none
    pub async fn request(&self, path: &str, options: RequestOptions) -> ClientResult<Value> {
        self.send(self.url(path), options).await
    }

    async fn send(&self, url: String, options: RequestOptions) -> ClientResult<Value> {
        let method = options.method.clone();

        let mut builder = self
            .client
            .request(options.method, &url)
            .headers(options.headers);
        builder = match options.body {
            Some(RequestBody::Json(body)) => builder.json(&body),
            Some(RequestBody::Multipart(form)) => builder.multipart(form),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = parse_body_lenient(&text);

        debug!("{method} {url} -> {}", status.as_u16());

        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound { url });
        }

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| status_text(status));
            warn!("{method} {url} failed with {}: {message}", status.as_u16());
            return Err(ClientError::Request {
                status: status.as_u16(),
                message,
            });
        }

        Ok(body)
    }

    /// `request` followed by deserialization into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> ClientResult<T> {
        let body = self.request(path, options).await?;
        serde_json::from_value(body).map_err(ClientError::Parse)
    }

    /// `request_as` against `resource_url(prefix, id)`.
    pub async fn request_resource_as<T: DeserializeOwned>(
        &self,
        prefix: &str,
        id: &str,
        options: RequestOptions,
    ) -> ClientResult<T> {
        let body = self.send(self.resource_url(prefix, id)?, options).await?;
        serde_json::from_value(body).map_err(ClientError::Parse)
    }
}

/// Parses `text` as JSON, yielding an empty object on empty or invalid input.
pub fn parse_body_lenient(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Pulls a human-readable message out of an error body.
/// Checks `detail`, then `message`, then `error` (string or `{message}`).
fn error_message(body: &Value) -> Option<String> {
    let non_empty = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);

    body.get("detail")
        .and_then(non_empty)
        .or_else(|| body.get("message").and_then(non_empty))
        .or_else(|| {
            body.get("error").and_then(|e| {
                non_empty(e).or_else(|| e.get("message").and_then(non_empty))
            })
        })
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}
