//! HTTP embedding backend
//!
//! Blocking client for OpenAI-compatible `/embeddings` endpoints, such as a
//! text-embeddings server hosting `multi-qa-mpnet-base-dot-v1`. Transport
//! failures and 429/5xx responses are retried per [`RetryPolicy`]; malformed
//! responses are not.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::embeddings::{Embedder, Embedding, EmbeddingError};

/// Retry policy for remote embedding calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,
    /// Delay before the first retry; doubles per retry up to 32x
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.saturating_sub(1).min(5) as u32;
        self.backoff_base * (1u32 << capped)
    }
}

/// Connection settings for [`HttpEmbedder`]
#[derive(Debug, Clone)]
pub struct HttpEmbedderOptions {
    /// Base URL; `/embeddings` is appended
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Embeddings client for OpenAI-compatible endpoints
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    retry: RetryPolicy,
}

impl HttpEmbedder {
    pub fn new(options: HttpEmbedderOptions) -> Result<Self, EmbeddingError> {
        if options.model.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfiguration(
                "missing embedding model name".to_string(),
            ));
        }
        if options.base_url.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfiguration(
                "missing embedding endpoint".to_string(),
            ));
        }
        if options.retry.max_attempts == 0 {
            return Err(EmbeddingError::InvalidConfiguration(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = options.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| EmbeddingError::InvalidConfiguration("invalid API key".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(Duration::from_secs(5))
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::Backend(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", options.base_url.trim_end_matches('/')),
            model: options.model,
            dimension: options.dimension,
            retry: options.retry,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }
}

impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp.json().map_err(|e| {
                            EmbeddingError::Validation(format!(
                                "unparseable embedding response: {}",
                                e
                            ))
                        })?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        debug!(
                            inputs = texts.len(),
                            attempt = attempt,
                            "Remote embedding batch complete"
                        );
                        return Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect());
                    }

                    let body = resp.text().unwrap_or_else(|_| "<body unavailable>".to_string());
                    if Self::should_retry(status) && attempt < self.retry.max_attempts {
                        warn!(
                            status = %status,
                            attempt = attempt,
                            "Embedding request failed, retrying"
                        );
                        thread::sleep(self.retry.backoff(attempt));
                        continue;
                    }
                    return Err(EmbeddingError::Backend(format!(
                        "embedding request failed ({}): {}",
                        status, body
                    )));
                }
                Err(err) => {
                    if Self::is_retryable_error(&err) && attempt < self.retry.max_attempts {
                        warn!(error = %err, attempt = attempt, "Embedding request error, retrying");
                        thread::sleep(self.retry.backoff(attempt));
                        continue;
                    }
                    return Err(EmbeddingError::Backend(err.to_string()));
                }
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const OK_BODY: &str = r#"{"data": [
        {"embedding": [0.0, 2.0], "index": 1},
        {"embedding": [3.0, 4.0], "index": 0}
    ]}"#;

    fn read_request(stream: &mut TcpStream) {
        let mut reader = BufReader::new(stream);
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0u8; content_length];
        let _ = reader.read_exact(&mut body);
    }

    /// Local server answering with `responses` in order, repeating the last
    /// one. Returns the base URL and a request counter.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut stream);
                let (status, body) = responses[n.min(responses.len() - 1)];
                let reply = format!(
                    "HTTP/1.1 {} Canned\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes());
            }
        });

        (format!("http://{}/v1", addr), requests)
    }

    fn embedder_for(base_url: String, max_attempts: usize) -> HttpEmbedder {
        HttpEmbedder::new(HttpEmbedderOptions {
            base_url,
            model: "test-model".to_string(),
            dimension: 2,
            api_key: Some("secret".to_string()),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts,
                backoff_base: Duration::from_millis(1),
            },
        })
        .unwrap()
    }

    fn options() -> HttpEmbedderOptions {
        HttpEmbedderOptions {
            base_url: "http://localhost:8080/v1/".to_string(),
            model: "sentence-transformers/multi-qa-mpnet-base-dot-v1".to_string(),
            dimension: 768,
            api_key: None,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn test_endpoint_normalized() {
        let embedder = HttpEmbedder::new(options()).unwrap();
        assert_eq!(embedder.endpoint(), "http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.dimension(), 768);
    }

    #[test]
    fn test_missing_model_rejected() {
        let mut opts = options();
        opts.model = " ".to_string();
        assert!(matches!(HttpEmbedder::new(opts), Err(EmbeddingError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut opts = options();
        opts.retry.max_attempts = 0;
        assert!(HttpEmbedder::new(opts).is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff_base: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(9), Duration::from_millis(3200));
    }

    #[test]
    fn test_response_sorted_by_index() {
        let raw = r#"{"data": [
            {"embedding": [0.0, 1.0], "index": 1},
            {"embedding": [1.0, 0.0], "index": 0}
        ]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|entry| entry.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn test_empty_batch_skips_network() {
        let embedder = HttpEmbedder::new(options()).unwrap();
        assert!(embedder.embed_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_server_error_retried_then_succeeds() {
        let (url, requests) = serve(vec![(503, r#"{"error": "loading"}"#), (200, OK_BODY)]);
        let embedder = embedder_for(url, 3);

        let vectors = embedder.embed_batch(&["a", "b"]).unwrap();
        assert_eq!(vectors, vec![vec![3.0, 4.0], vec![0.0, 2.0]]);
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rate_limit_retried_up_to_max_attempts() {
        let (url, requests) = serve(vec![(429, r#"{"error": "slow down"}"#)]);
        let embedder = embedder_for(url, 3);

        let err = embedder.embed_batch(&["a"]).unwrap_err();
        assert!(matches!(err, EmbeddingError::Backend(_)));
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_client_error_not_retried() {
        let (url, requests) = serve(vec![(400, r#"{"error": "bad input"}"#), (200, OK_BODY)]);
        let embedder = embedder_for(url, 3);

        let err = embedder.embed_batch(&["a"]).unwrap_err();
        assert!(matches!(err, EmbeddingError::Backend(ref msg) if msg.contains("bad input")));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unparseable_response_not_retried() {
        let (url, requests) = serve(vec![(200, "not json"), (200, OK_BODY)]);
        let embedder = embedder_for(url, 3);

        let err = embedder.embed_batch(&["a"]).unwrap_err();
        assert!(matches!(err, EmbeddingError::Validation(_)));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }
}
