//! JSON POST with timeout and exponential-backoff retry.
//!
//! Shared by the remote embedding and chat-completion clients:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors (including timeouts) → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

/// Why a request ultimately failed.
#[derive(Debug)]
pub enum PostFailure {
    Status { status: u16, body: String },
    Transport(String),
}

pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

pub async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value, PostFailure> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(%url, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| PostFailure::Transport(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();
                let failure = PostFailure::Status {
                    status: status.as_u16(),
                    body: body_text,
                };
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(failure);
                    continue;
                }
                return Err(failure);
            }
            Err(e) => {
                last_err = Some(PostFailure::Transport(e.to_string()));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| PostFailure::Transport("request failed after retries".into())))
}
