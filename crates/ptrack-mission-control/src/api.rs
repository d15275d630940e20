//! HTTP pull endpoints of the task backend.

use ptrack_core::{QueueSnapshot, RosterEntry};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("request to {path} failed: {message}")]
    Transport { path: String, message: String },
    #[error("{path} returned {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },
    #[error("could not decode {path} response: {message}")]
    Decode { path: String, message: String },
}

/// A response body as the backend sent it. Empty bodies mean "no value".
#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    Empty,
    Json(Value),
    Text(String),
}

impl ApiBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, ApiBody::Empty)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SightingRequest {
    pub pokemon: String,
    pub location: String,
    pub element: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SpawnRequest {
    pub id: i64,
    pub name: String,
    #[serde(rename = "imageNum")]
    pub image_num: u32,
}

#[derive(Serialize)]
struct QueueQuery<'a> {
    name: &'a str,
}

/// Classify a raw response body by status and content type.
pub fn parse_body(
    path: &str,
    status: StatusCode,
    content_type: Option<&str>,
    text: String,
) -> Result<ApiBody, ApiError> {
    if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
        return Ok(ApiBody::Empty);
    }
    if text.trim().is_empty() {
        return Ok(ApiBody::Empty);
    }
    let is_json = content_type
        .map(|value| value.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(&text)
            .map(ApiBody::Json)
            .map_err(|err| ApiError::Decode {
                path: path.to_string(),
                message: err.to_string(),
            })
    } else {
        Ok(ApiBody::Text(text))
    }
}

/// Counters come back as `{"count": n}`, a bare number, or a numeric string.
pub fn count_from_body(body: &ApiBody) -> Option<u64> {
    match body {
        ApiBody::Json(Value::Number(n)) => n.as_u64(),
        ApiBody::Json(Value::Object(map)) => map.get("count").and_then(count_from_value),
        ApiBody::Json(Value::String(s)) | ApiBody::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ApiError::Client(err.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiBody, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|err| ApiError::Transport {
            path: path.to_string(),
            message: err.to_string(),
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(|err| ApiError::Transport {
            path: path.to_string(),
            message: err.to_string(),
        })?;

        if !status.is_success() {
            return Err(ApiError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        parse_body(path, status, content_type.as_deref(), text)
    }

    /// `None` when the backend answered without a usable snapshot.
    pub async fn queue_stats(&self, queue_name: &str) -> Result<Option<QueueSnapshot>, ApiError> {
        let path = "/state/queue";
        let body = self
            .request(Method::POST, path, Some(&QueueQuery { name: queue_name }))
            .await?;
        match body {
            ApiBody::Json(value @ Value::Object(_)) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| ApiError::Decode {
                    path: path.to_string(),
                    message: err.to_string(),
                }),
            _ => Ok(None),
        }
    }

    /// `None` unless the backend returned a JSON array.
    pub async fn agents(&self) -> Result<Option<Vec<RosterEntry>>, ApiError> {
        let path = "/state/agents";
        let body = self.request::<()>(Method::GET, path, None).await?;
        match body {
            ApiBody::Json(value @ Value::Array(_)) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| ApiError::Decode {
                    path: path.to_string(),
                    message: err.to_string(),
                }),
            _ => Ok(None),
        }
    }

    pub async fn dead_letter_count(&self) -> Result<Option<u64>, ApiError> {
        let body = self
            .request::<()>(Method::GET, "/state/dead-message", None)
            .await?;
        Ok(count_from_body(&body))
    }

    pub async fn live_user_count(&self) -> Result<Option<u64>, ApiError> {
        let body = self
            .request::<()>(Method::GET, "/state/hub/active", None)
            .await?;
        Ok(count_from_body(&body))
    }

    pub async fn submit_sighting(&self, sighting: &SightingRequest) -> Result<ApiBody, ApiError> {
        self.request(Method::POST, "/sighting", Some(sighting)).await
    }

    pub async fn spawn_agent(&self, spawn: &SpawnRequest) -> Result<ApiBody, ApiError> {
        self.request(Method::POST, "/spawn/rocket-agent", Some(spawn))
            .await
    }

    pub async fn reset_system(&self) -> Result<(), ApiError> {
        self.request::<()>(Method::GET, "/reset/system", None)
            .await
            .map(|_| ())
    }
}
