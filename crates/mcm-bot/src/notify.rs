use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Longer messages are sent as a text attachment instead of inline.
const MAX_INLINE_CHARS: usize = 1000;
const ATTACHMENT_NAME: &str = "output.txt";

/// Where asynchronous outcomes (auto-deallocation, finished start/stop
/// requests) are reported. Delivery is best effort.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, message: &str);
}

/// Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        tracing::info!(text = message, "notification");
    }
}

#[derive(Serialize)]
struct WebhookBody {
    content: String,
}

/// Posts `{"content": ...}` to a chat webhook, or a multipart upload with
/// `payload_json` and one `files[0]` part when the text is too long.
pub struct WebhookNotifier {
    url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) {
        let text = message.trim();
        let request = self.http.post(&self.url);
        let request = if text.chars().count() > MAX_INLINE_CHARS {
            request.multipart(attachment(text))
        } else {
            request.json(&WebhookBody {
                content: format_message(text),
            })
        };

        let result = request
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(_) => tracing::debug!("notification delivered"),
            Err(e) => tracing::warn!(error = %e, text = message, "failed to deliver notification"),
        }
    }
}

pub fn build_notifier(webhook_url: Option<String>) -> Arc<dyn Notifier> {
    match webhook_url {
        Some(url) => {
            tracing::info!("notifications go to webhook");
            Arc::new(WebhookNotifier::new(url))
        }
        None => {
            tracing::info!("no webhook configured, notifications are logged only");
            Arc::new(LogNotifier)
        }
    }
}

/// Fence the message as a code block.
fn format_message(message: &str) -> String {
    let trimmed = message.trim();
    let text = if trimmed.is_empty() { "ok" } else { trimmed };
    format!("```\n{text}\n```")
}

/// The first line stays inline, the full text goes in `output.txt`.
fn attachment(text: &str) -> reqwest::multipart::Form {
    let headline: String = text
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect();
    let payload = serde_json::json!({
        "content": format!("{} (full output in {ATTACHMENT_NAME})", format_message(&headline)),
    });
    let file = reqwest::multipart::Part::text(text.to_string()).file_name(ATTACHMENT_NAME);

    reqwest::multipart::Form::new()
        .text("payload_json", payload.to_string())
        .part("files[0]", file)
}
