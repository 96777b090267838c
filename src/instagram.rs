//! Instagram Publishing Module
//!
//! Publishes a hosted image with its caption through the Instagram Graph API:
//! create a media container, then publish it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use crate::config;

pub const DEFAULT_GRAPH_API_URL: &str = "https://graph.facebook.com/v18.0";

pub const MAX_RETRIES: u32 = 3;
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(1000);

pub const MAX_HASHTAGS: usize = 30;
pub const MAX_CAPTION_CHARS: usize = 2200;

pub const DEFAULT_HASHTAGS: [&str; 5] = ["productivity", "quicktips", "fixin5mins", "lifehack", "selfimprovement"];

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `image_url` with `caption`, returning the Instagram post id.
    async fn publish(&self, image_url: &str, caption: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct InstagramCredentials {
    pub access_token: String,
    pub account_id: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GraphErrorResponse {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

pub struct GraphApiPublisher {
    credentials: InstagramCredentials,
    graph_api_url: String,
    http_client: reqwest::Client,
}

impl GraphApiPublisher {
    pub fn new(credentials: InstagramCredentials, graph_api_url: impl Into<String>) -> Result<Self> {
        Ok(Self::with_http_client(credentials, graph_api_url, config::http_client()?))
    }

    pub fn with_http_client(
        credentials: InstagramCredentials,
        graph_api_url: impl Into<String>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            credentials,
            graph_api_url: graph_api_url.into(),
            http_client,
        }
    }

    async fn post_for_id(&self, edge: &str, params: Vec<(&'static str, String)>) -> Result<String> {
        let url = format!(
            "{}/{}/{}",
            self.graph_api_url.trim_end_matches('/'),
            self.credentials.account_id,
            edge
        );

        let mut form: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        form.push(("access_token", &self.credentials.access_token));

        let response = self
            .http_client
            .post(&url)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("Failed to reach Graph API /{}", edge))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read Graph API /{} response", edge))?;

        if !status.is_success() {
            let message = serde_json::from_str::<GraphErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            anyhow::bail!("Graph API /{} failed (status {}): {}", edge, status, message);
        }

        let parsed: IdResponse =
            serde_json::from_str(&body).with_context(|| format!("Unexpected Graph API /{} response: {}", edge, body))?;
        Ok(parsed.id)
    }
}

#[async_trait]
impl Publisher for GraphApiPublisher {
    async fn publish(&self, image_url: &str, caption: &str) -> Result<String> {
        log::info!("Creating Instagram media container");
        let container_id = retry_with_backoff("Create media container", MAX_RETRIES, BASE_RETRY_DELAY, is_network_error, || {
            self.post_for_id(
                "media",
                vec![("image_url", image_url.to_string()), ("caption", caption.to_string())],
            )
        })
        .await?;
        log::debug!("Media container created: {}", container_id);

        let post_id = retry_with_backoff("Publish media", MAX_RETRIES, BASE_RETRY_DELAY, is_network_error, || {
            self.post_for_id("media_publish", vec![("creation_id", container_id.clone())])
        })
        .await?;

        log::info!("Published Instagram post {}", post_id);
        Ok(post_id)
    }
}

/// Run `request` up to `max_attempts` times, sleeping `base_delay * 2^n`
/// (with ±25% jitter) between attempts. Errors `is_retryable` rejects end
/// the loop at once.
pub async fn retry_with_backoff<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    base_delay: Duration,
    is_retryable: fn(&anyhow::Error) -> bool,
    mut request: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let factor = 2u32.saturating_pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0.75..1.25);
                let delay = (base_delay * factor).mul_f64(jitter);
                log::warn!(
                    "{} failed (attempt {}/{}): {:#}. Retrying in {:?}...",
                    operation,
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.context(format!("{} failed after {} attempt(s)", operation, attempt))),
        }
    }
}

/// Connection failures and timeouts; API-level rejections are not retried.
pub fn is_network_error(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(|e| e.is_connect() || e.is_timeout() || e.is_request())
}

/// Caption body followed by up to 30 hashtags, capped at 2200 characters.
/// The body is shortened first so the hashtags survive.
pub fn format_caption(caption: &str, hashtags: &[&str]) -> String {
    if hashtags.len() > MAX_HASHTAGS {
        log::warn!(
            "Instagram allows max {} hashtags. Truncating from {} to {}.",
            MAX_HASHTAGS,
            hashtags.len(),
            MAX_HASHTAGS
        );
    }

    let tags = hashtags
        .iter()
        .take(MAX_HASHTAGS)
        .map(|tag| format!("#{}", tag.trim_start_matches('#')))
        .collect::<Vec<_>>()
        .join(" ");
    let hashtag_text = if tags.is_empty() { String::new() } else { format!("\n\n{}", tags) };

    let full = format!("{}{}", caption, hashtag_text);
    if full.chars().count() <= MAX_CAPTION_CHARS {
        return full;
    }

    log::warn!("Caption exceeds Instagram's {} character limit. Truncating.", MAX_CAPTION_CHARS);
    let hashtag_len = hashtag_text.chars().count();
    if hashtag_len < MAX_CAPTION_CHARS {
        let body: String = caption.chars().take(MAX_CAPTION_CHARS - hashtag_len).collect();
        format!("{}{}", body, hashtag_text)
    } else {
        full.chars().take(MAX_CAPTION_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn caption_appends_normalized_hashtags() {
        let caption = format_caption("Hook\n\nAction\n\nReward", &["productivity", "#lifehack"]);
        assert_eq!(caption, "Hook\n\nAction\n\nReward\n\n#productivity #lifehack");
    }

    #[test]
    fn caption_without_hashtags_is_unchanged() {
        assert_eq!(format_caption("Just text", &[]), "Just text");
    }

    #[test]
    fn caption_keeps_at_most_thirty_hashtags() {
        let tags: Vec<String> = (0..40).map(|i| format!("tag{}", i)).collect();
        let refs: Vec<&str> = tags.iter().map(String::as_str).collect();

        let caption = format_caption("body", &refs);
        assert_eq!(caption.matches('#').count(), MAX_HASHTAGS);
        assert!(caption.ends_with("#tag29"));
    }

    #[test]
    fn long_caption_is_truncated_before_hashtags() {
        let body = "a".repeat(3000);
        let caption = format_caption(&body, &DEFAULT_HASHTAGS);

        assert_eq!(caption.chars().count(), MAX_CAPTION_CHARS);
        assert!(caption.ends_with("#selfimprovement"));
        assert!(caption.starts_with("aaa"));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", 3, Duration::from_millis(1), |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    return Err(anyhow::anyhow!("connection reset"));
                }
                Ok::<_, anyhow::Error>("post-1")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "post-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("test", 3, Duration::from_millis(1), |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(anyhow::anyhow!("still down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("test", 3, Duration::from_millis(1), is_network_error, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(anyhow::anyhow!("Invalid OAuth access token")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stalled_graph_api_times_out_as_network_error() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = config::http_client_with_timeouts(Duration::from_millis(200), Duration::from_secs(1)).unwrap();
        let publisher = GraphApiPublisher::with_http_client(
            InstagramCredentials {
                access_token: "token".to_string(),
                account_id: "1784".to_string(),
            },
            format!("http://{}", addr),
            client,
        );

        let started = std::time::Instant::now();
        let err = publisher
            .post_for_id("media", vec![("caption", "hello".to_string())])
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(is_network_error(&err));
        assert!(err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(|e| e.is_timeout()));
        server.abort();
    }
}
