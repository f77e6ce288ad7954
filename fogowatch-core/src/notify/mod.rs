//! Notifications
//!
//! [`render`] turns detector events into [`Notification`]s; a [`Notifier`]
//! delivers them. Delivery failures are reported to the caller, which logs
//! them and moves on: they never abort a cycle.

mod ntfy;
pub mod render;

pub use ntfy::{NtfyClient, NtfyNotifier};
pub use render::{Renderer, ResourceThresholds};

use std::io::Write;

use serde::Serialize;

use crate::config::NotifyConfig;
use crate::error::{Error, Result};
use crate::format::area_label;

/// Link button attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub label: String,
    pub url: String,
}

/// A rendered message, ready for any transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// ntfy tags (emoji short codes), without duplicates
    pub tags: Vec<String>,
    /// 1 (min) to 5 (max)
    pub priority: u8,
    /// URL opened when the notification is tapped
    pub click: Option<String>,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Append `tag` unless already present.
    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if !tag.is_empty() && !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Raise priority to at least `priority`.
    pub fn raise_priority(&mut self, priority: u8) {
        self.priority = self.priority.max(priority.min(5));
    }

    /// Message sent by `--test-notification`.
    pub fn test_message<S: AsRef<str>>(areas: &[S]) -> Self {
        Self {
            title: "fogowatch: teste".to_string(),
            body: format!(
                "Notificações ativas. A monitorizar {} concelho(s): {}.",
                areas.len(),
                area_label(areas)
            ),
            tags: vec!["white_check_mark".to_string()],
            priority: 3,
            ..Default::default()
        }
    }
}

/// Delivers notifications.
pub trait Notifier {
    fn send(&mut self, notification: &Notification) -> Result<()>;

    /// Transport name, for logs
    fn name(&self) -> &'static str;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        (**self).send(notification)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Prints notifications instead of sending them.
pub struct DryRunNotifier {
    out: Box<dyn Write + Send>,
}

impl DryRunNotifier {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }
}

impl Notifier for DryRunNotifier {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        writeln!(
            self.out,
            "[dry-run ntfy] {} (p{}; {})",
            notification.title,
            notification.priority,
            notification.tags.join(",")
        )?;
        writeln!(self.out, "{}", notification.body)?;
        if let Some(click) = &notification.click {
            writeln!(self.out, "-> {}", click)?;
        }
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

/// Build the transport described by configuration.
pub fn from_config(config: &NotifyConfig) -> Result<Box<dyn Notifier>> {
    if config.dry_run {
        return Ok(Box::new(DryRunNotifier::stdout()));
    }
    let topic = config
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Config("notify.topic is required".to_string()))?;
    Ok(Box::new(NtfyNotifier::new(&config.url, topic, config.timeout_secs)?))
}
