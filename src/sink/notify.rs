//! Downstream notification for created executions.
//!
//! Supports webhook POST. Delivery is fire-and-forget: failures are logged
//! and never change the judged result.

use anyhow::Result;
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::Execution;

/// Where an execution event is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Webhook(String),
    Disabled,
}

impl Target {
    /// Parse a notification value.
    ///
    /// Supports:
    /// - `"webhook:<url>"` - POST to webhook
    /// - `"none"` or empty - disabled
    /// - Bare `http(s)://` URL - treated as webhook
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim) else {
            return Self::Disabled;
        };

        if let Some(url) = value.strip_prefix("webhook:") {
            if url.is_empty() {
                Self::Disabled
            } else {
                Self::Webhook(url.to_string())
            }
        } else if value.starts_with("http://") || value.starts_with("https://") {
            Self::Webhook(value.to_string())
        } else {
            if !value.is_empty() && value != "none" {
                warn!("Unknown notification target '{}', notifications disabled", value);
            }
            Self::Disabled
        }
    }
}

/// Sends execution notifications.
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    target: Target,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            client: reqwest::Client::new(),
        }
    }

    /// Announce a created execution.
    pub async fn notify(&self, execution: &Execution) {
        if let Target::Webhook(url) = &self.target {
            if let Err(e) = self.send_webhook(url, execution).await {
                warn!("Failed to send execution webhook: {}", e);
            }
        }
    }

    /// Send webhook POST request with exponential backoff retry.
    ///
    /// Retries up to 3 times with delays of 2s, 4s on transient failures.
    #[allow(tail_expr_drop_order)] // Drop order changes are harmless for HTTP responses
    async fn send_webhook(&self, url: &str, execution: &Execution) -> Result<()> {
        let payload = json!({
            "event": "execution.created",
            "execution": execution,
        });

        debug!("Sending webhook to {} for execution {}", url, execution.id);

        let max_attempts = 3;
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay_secs = 1u64 << attempt;
                debug!(
                    "Webhook retry attempt {} after {}s delay",
                    attempt + 1,
                    delay_secs
                );
                tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
            }

            match self.client.post(url).json(&payload).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        debug!("Webhook sent successfully");
                        return Ok(());
                    }

                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();

                    // Retry on 5xx server errors and 429 rate limit
                    if status.is_server_error() || status.as_u16() == 429 {
                        last_error = Some(format!("Webhook returned {status}: {body}"));
                        continue;
                    }

                    anyhow::bail!("Webhook returned error status {status}: {body}");
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }
        }

        anyhow::bail!(
            "Webhook failed after {max_attempts} attempts: {}",
            last_error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}
