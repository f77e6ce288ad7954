//! HTTP client for ntfy
//!
//! Publishes with ntfy's JSON API (`POST <server>/` with the topic in the
//! body), which carries UTF-8 titles that plain headers cannot.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::format::truncate;

use super::{Notification, NotificationAction, Notifier};

/// Request body for `POST /`
#[derive(Serialize)]
struct PublishRequest<'a> {
    topic: &'a str,
    title: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "no_tags")]
    tags: &'a [String],
    priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    click: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    actions: Vec<PublishAction<'a>>,
}

fn no_tags(tags: &&[String]) -> bool {
    tags.is_empty()
}

#[derive(Serialize)]
struct PublishAction<'a> {
    action: &'static str,
    label: &'a str,
    url: &'a str,
}

impl<'a> From<&'a NotificationAction> for PublishAction<'a> {
    fn from(action: &'a NotificationAction) -> Self {
        Self {
            action: "view",
            label: &action.label,
            url: &action.url,
        }
    }
}

/// Async ntfy publisher
pub struct NtfyClient {
    http_client: reqwest::Client,
    base_url: String,
    topic: String,
}

impl NtfyClient {
    pub fn new(server_url: &str, topic: &str, timeout_secs: u64) -> Result<Self> {
        let base_url = server_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("notify.url is required".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            topic: topic.to_string(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one notification
    pub async fn publish(&self, notification: &Notification) -> Result<()> {
        let url = format!("{}/", self.base_url);

        let request_body = PublishRequest {
            topic: &self.topic,
            title: &notification.title,
            message: &notification.body,
            tags: &notification.tags,
            priority: notification.priority.clamp(1, 5),
            click: notification.click.as_deref(),
            actions: notification.actions.iter().map(PublishAction::from).collect(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| Error::Notify(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Notify(format!(
                "ntfy error ({}): {}",
                status,
                truncate(error_text.trim(), 300)
            )))
        }
    }
}

/// Synchronous wrapper for [`NtfyClient`]
///
/// Owns a single-threaded runtime so the blocking monitor loop can publish.
pub struct NtfyNotifier {
    inner: NtfyClient,
    runtime: tokio::runtime::Runtime,
}

impl NtfyNotifier {
    pub fn new(server_url: &str, topic: &str, timeout_secs: u64) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Notify(format!("failed to create runtime: {}", e)))?;

        Ok(Self {
            inner: NtfyClient::new(server_url, topic, timeout_secs)?,
            runtime,
        })
    }
}

impl Notifier for NtfyNotifier {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        self.runtime.block_on(self.inner.publish(notification))
    }

    fn name(&self) -> &'static str {
        "ntfy"
    }
}
