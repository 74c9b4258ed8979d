//! Shared HTTP client with rate limiting

use quill_core::{ConfigError, ProviderConfig, ProviderError, QuillError, QuillResult};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// How the API key is presented.
#[derive(Clone)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer(String),
    /// `x-api-key: <key>` plus the pinned `anthropic-version`
    AnthropicKey(String),
}

/// JSON-over-HTTP client for one provider, with a permit-per-minute
/// semaphore and a minimum interval between requests.
pub struct HttpClient {
    provider: &'static str,
    client: Client,
    auth: AuthScheme,
    base_url: String,
    rate_limiter: Arc<Semaphore>,
    last_request: AtomicU64,
    min_request_interval_ms: u64,
    start_time: Instant,
}

impl HttpClient {
    pub fn new(
        provider: &'static str,
        config: &ProviderConfig,
        default_base_url: &str,
        auth: AuthScheme,
    ) -> QuillResult<Self> {
        let rpm = config.requests_per_minute.max(1);
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "provider".to_string(),
                value: provider.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            provider,
            client,
            auth,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            rate_limiter: Arc::new(Semaphore::new(rpm as usize)),
            last_request: AtomicU64::new(0),
            min_request_interval_ms: (60_000 / rpm as u64).max(10),
            start_time: Instant::now(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `endpoint` and decode the JSON response.
    pub async fn post_json<Req: Serialize + ?Sized, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> QuillResult<Res> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| request_failed(self.provider, 0, format!("Rate limiter error: {}", e)))?;

        let now_ms = self.start_time.elapsed().as_millis() as u64;
        let last_ms = self.last_request.load(Ordering::Relaxed);
        let elapsed = now_ms.saturating_sub(last_ms);
        if last_ms > 0 && elapsed < self.min_request_interval_ms {
            tokio::time::sleep(Duration::from_millis(self.min_request_interval_ms - elapsed)).await;
        }
        self.last_request
            .store(self.start_time.elapsed().as_millis() as u64, Ordering::Relaxed);

        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let request = self.client.post(&url).json(body);
        let request = match &self.auth {
            AuthScheme::Bearer(key) => request.bearer_auth(key),
            AuthScheme::AnthropicKey(key) => request
                .header("x-api-key", key)
                .header("anthropic-version", "2023-06-01"),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                QuillError::from(ProviderError::Timeout {
                    provider: self.provider.to_string(),
                })
            } else {
                request_failed(self.provider, 0, format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| {
                invalid_response(self.provider, format!("Failed to parse response: {}", e))
            });
        }

        let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::debug!(provider = self.provider, status = status.as_u16(), "Provider returned error status");

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                provider: self.provider.to_string(),
                retry_after_ms,
            }
            .into(),
            _ => request_failed(self.provider, status.as_u16(), extract_error_message(&error_text)),
        })
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

pub(crate) fn request_failed(provider: &str, status: u16, message: impl Into<String>) -> QuillError {
    ProviderError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
    .into()
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> QuillError {
    ProviderError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as u64)
}

/// `{"error": {"message": ".."}}`, `{"error": ".."}` or the raw body.
fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match &value["error"] {
            serde_json::Value::String(message) => message.clone(),
            serde_json::Value::Object(detail) => detail
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()),
            _ => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_ms(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after_ms(&headers), Some(1_500));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"Invalid API key","type":"auth"}}"#),
            "Invalid API key"
        );
        assert_eq!(extract_error_message(r#"{"error":"model not found"}"#), "model not found");
        assert_eq!(extract_error_message("gateway exploded"), "gateway exploded");
    }

    #[test]
    fn test_base_url_override_and_debug_redaction() {
        let config = ProviderConfig {
            base_url: Some("http://localhost:9999/v1/".to_string()),
            api_key: Some("sk-secret".to_string()),
            ..ProviderConfig::default()
        };
        let client = HttpClient::new(
            "openai",
            &config,
            "https://api.openai.com/v1",
            AuthScheme::Bearer("sk-secret".to_string()),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:9999/v1");
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("sk-secret"));
    }
}
