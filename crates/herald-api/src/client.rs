//! REST client for the notification origin server.
//!
//! | Operation | Request |
//! |---|---|
//! | bulk fetch | `GET {base}/api/notifications/{userId}` |
//! | acknowledge | `PUT {base}/api/notifications/{id}/read` |
//! | publish | `POST {base}/api/notifications/{userId}` (body = message text) |
//! | unread count | `GET {base}/api/notifications/{userId}/count` |

use std::time::Duration;

use async_trait::async_trait;
use herald_core::{Notification, NotificationId, RequestOperation, UserId};
use herald_settings::HeraldSettings;
use metrics::counter;
use tracing::{debug, instrument};

use crate::errors::{Result, invalid_body, request_failed, unexpected_status};

/// The origin server's notification endpoints.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// All notifications for `user`, newest first.
    async fn fetch_notifications(&self, user: &UserId) -> Result<Vec<Notification>>;

    /// Acknowledge one notification. Any 2xx is success.
    async fn mark_read(&self, id: &NotificationId) -> Result<()>;

    /// Create a notification for `user` and publish it to the user's topic.
    async fn create_notification(&self, user: &UserId, message: &str) -> Result<Notification>;

    /// Server-side unread counter for `user`.
    async fn unread_count(&self, user: &UserId) -> Result<u64>;
}

/// Connection parameters for [`ReqwestNotificationApi`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiConfig {
    /// Scheme and authority of the origin server, without `/api`.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// `User-Agent` header.
    pub user_agent: String,
}

impl ApiConfig {
    /// Config with a 30 s timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("herald/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Config for the active environment's API.
    pub fn from_settings(settings: &HeraldSettings) -> herald_settings::Result<Self> {
        Ok(Self {
            base_url: settings.profile()?.api_base_url.clone(),
            request_timeout: settings.api.request_timeout(),
            user_agent: settings.api.user_agent.clone(),
        })
    }
}

/// [`NotificationApi`] over `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestNotificationApi {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestNotificationApi {
    /// Build a client from `config`.
    pub fn new(config: &ApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();
        Self::with_client(client, &config.base_url)
    }

    /// Use an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = format!("{}/api/notifications", self.base_url);
        for segment in segments {
            url.push('/');
            push_segment(&mut url, segment);
        }
        url
    }

    /// Send a request, returning the body of a 2xx response.
    async fn execute(&self, operation: RequestOperation, request: reqwest::RequestBuilder) -> Result<String> {
        counter!("herald_api_requests_total", "operation" => operation.to_string()).increment(1);
        let response = request.send().await.map_err(|e| {
            counter!("herald_api_failures_total", "operation" => operation.to_string()).increment(1);
            request_failed(operation, &e)
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| request_failed(operation, &e))?;
        debug!(%operation, status = status.as_u16(), bytes = body.len(), "response received");

        if status.is_success() {
            Ok(body)
        } else {
            counter!("herald_api_failures_total", "operation" => operation.to_string()).increment(1);
            Err(unexpected_status(operation, status.as_u16(), &body))
        }
    }
}

#[async_trait]
impl NotificationApi for ReqwestNotificationApi {
    #[instrument(skip_all, fields(user = %user))]
    async fn fetch_notifications(&self, user: &UserId) -> Result<Vec<Notification>> {
        let op = RequestOperation::Fetch;
        let body = self.execute(op, self.client.get(self.url(&[user.as_str()]))).await?;
        Notification::list_from_json(&body).map_err(|e| invalid_body(op, e))
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn mark_read(&self, id: &NotificationId) -> Result<()> {
        let op = RequestOperation::Acknowledge;
        let _ = self.execute(op, self.client.put(self.url(&[id.as_str(), "read"]))).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(user = %user))]
    async fn create_notification(&self, user: &UserId, message: &str) -> Result<Notification> {
        let op = RequestOperation::Publish;
        let request = self
            .client
            .post(self.url(&[user.as_str()]))
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(message.to_string());
        let body = self.execute(op, request).await?;
        Notification::from_json(&body).map_err(|e| invalid_body(op, e))
    }

    #[instrument(skip_all, fields(user = %user))]
    async fn unread_count(&self, user: &UserId) -> Result<u64> {
        let op = RequestOperation::Count;
        let body = self.execute(op, self.client.get(self.url(&[user.as_str(), "count"]))).await?;
        body.trim()
            .parse()
            .map_err(|e| invalid_body(op, format!("{e} in `{}`", body.trim())))
    }
}

/// Append a percent-encoded path segment.
fn push_segment(out: &mut String, segment: &str) {
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> ReqwestNotificationApi {
        ReqwestNotificationApi::with_client(reqwest::Client::new(), base)
    }

    #[test]
    fn urls_follow_rest_layout() {
        let api = api("http://localhost:8080/");
        assert_eq!(api.url(&["42"]), "http://localhost:8080/api/notifications/42");
        assert_eq!(
            api.url(&["7", "read"]),
            "http://localhost:8080/api/notifications/7/read"
        );
        assert_eq!(
            api.url(&["42", "count"]),
            "http://localhost:8080/api/notifications/42/count"
        );
    }

    #[test]
    fn path_segments_are_encoded() {
        let api = api("http://h");
        assert_eq!(api.url(&["a b/c"]), "http://h/api/notifications/a%20b%2Fc");
        assert_eq!(api.url(&["user_1.x~"]), "http://h/api/notifications/user_1.x~");
    }

    #[test]
    fn config_from_settings_uses_active_profile() {
        let mut settings = HeraldSettings::default();
        settings.environment = herald_settings::Environment::Production;
        let config = ApiConfig::from_settings(&settings).unwrap();
        assert_eq!(config.base_url, "http://backend:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builds_with_default_config() {
        let api = ReqwestNotificationApi::new(&ApiConfig::new("http://localhost:8080"));
        assert_eq!(api.base_url, "http://localhost:8080");
    }
}
