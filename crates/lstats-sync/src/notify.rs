//! Operator alerts for sweep-level failures. Delivery is best effort: a
//! failed alert is logged and never propagates into the ingest loop.

use std::sync::Arc;

use async_trait::async_trait;
use lstats_storage::HttpFetcher;
use serde_json::{json, Value};
use tracing::{error, info, warn};

pub const NOTIFIARR_EVENT: &str = "LeagueStats";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Discord embed color.
    pub fn color(self) -> &'static str {
        match self {
            Severity::Info => "0000FF",
            Severity::Warning => "FFA500",
            Severity::Error => "FF0000",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

impl Notification {
    pub fn server_error(body: impl Into<String>) -> Self {
        Self {
            title: "Server Error".to_string(),
            body: body.into(),
            severity: Severity::Error,
        }
    }
}

#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Used when no alerting channel is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl FailureNotifier for LogNotifier {
    async fn notify(&self, notification: &Notification) {
        match notification.severity {
            Severity::Error => error!(title = %notification.title, "{}", notification.body),
            Severity::Warning => warn!(title = %notification.title, "{}", notification.body),
            Severity::Info => info!(title = %notification.title, "{}", notification.body),
        }
    }
}

/// Discord passthrough via Notifiarr.
pub struct NotifiarrNotifier {
    http: Arc<HttpFetcher>,
    api_key: String,
    channel_id: u64,
    base_url: String,
    dry_run: bool,
}

impl NotifiarrNotifier {
    pub fn new(http: Arc<HttpFetcher>, api_key: impl Into<String>, channel_id: u64) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            channel_id,
            base_url: "https://notifiarr.com".to_string(),
            dry_run: false,
        }
    }

    /// Logs the payload instead of sending it.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn url(&self) -> String {
        format!(
            "{}/api/v1/notification/passthrough/{}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        )
    }

    pub fn payload(&self, notification: &Notification) -> Value {
        json!({
            "notification": {
                "update": false,
                "name": NOTIFIARR_EVENT,
                "event": 0,
            },
            "discord": {
                "color": notification.severity.color(),
                "ping": {"pingUser": 0, "pingRole": 0},
                "images": {"thumbnail": "", "image": ""},
                "text": {
                    "title": notification.title,
                    "icon": "",
                    "content": "",
                    "description": notification.body,
                    "fields": [],
                    "footer": "",
                },
                "ids": {"channel": self.channel_id},
            },
        })
    }
}

#[async_trait]
impl FailureNotifier for NotifiarrNotifier {
    async fn notify(&self, notification: &Notification) {
        let payload = self.payload(notification);
        if self.dry_run {
            info!(%payload, "notifiarr dry run");
            return;
        }
        match self.http.post_json("notifiarr", &self.url(), &payload).await {
            Ok(response) => info!(status = %response.status, title = %notification.title, "alert delivered"),
            Err(err) => warn!(error = %err, title = %notification.title, "alert delivery failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lstats_storage::HttpClientConfig;

    fn notifier() -> NotifiarrNotifier {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        NotifiarrNotifier::new(http, "key-123", 735_481_457_153_277_994)
    }

    #[test]
    fn payload_carries_the_discord_embed() {
        let payload = notifier().payload(&Notification::server_error("store unavailable"));
        assert_eq!(payload["notification"]["name"], json!("LeagueStats"));
        assert_eq!(payload["notification"]["update"], json!(false));
        assert_eq!(payload["discord"]["color"], json!("FF0000"));
        assert_eq!(payload["discord"]["text"]["title"], json!("Server Error"));
        assert_eq!(payload["discord"]["text"]["description"], json!("store unavailable"));
        assert_eq!(payload["discord"]["ids"]["channel"], json!(735_481_457_153_277_994_u64));
    }

    #[test]
    fn url_embeds_the_api_key() {
        assert_eq!(
            notifier().url(),
            "https://notifiarr.com/api/v1/notification/passthrough/key-123"
        );
        assert_eq!(
            notifier().with_base_url("http://127.0.0.1:1/").url(),
            "http://127.0.0.1:1/api/v1/notification/passthrough/key-123"
        );
    }

    #[tokio::test]
    async fn dry_run_sends_nothing() {
        let notifier = notifier().with_base_url("http://127.0.0.1:9").dry_run(true);
        notifier.notify(&Notification::server_error("boom")).await;
    }

    #[test]
    fn severities_map_to_colors() {
        assert_eq!(Severity::Warning.color(), "FFA500");
        assert_eq!(Severity::Info.color(), "0000FF");
    }
}
