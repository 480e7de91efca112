//! Notification delivery for alert state changes

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::state::{AlertState, NotificationKind};

/// A rendered notification for one rule's state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertNotification {
    pub rule: String,
    pub kind: NotificationKind,
    pub from: AlertState,
    pub to: AlertState,
    pub value: Option<f64>,
    pub message: String,
    pub tags: Vec<String>,
    /// Unix millis
    pub timestamp: i64,
}

/// Notification target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotifyTarget {
    /// Log to tracing
    Log,
    /// HTTP webhook
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Sends notifications to every configured target
pub struct Notifier {
    client: reqwest::Client,
    targets: Vec<NotifyTarget>,
}

impl Notifier {
    pub fn new(targets: Vec<NotifyTarget>) -> Self {
        Self {
            client: reqwest::Client::new(),
            targets,
        }
    }

    pub fn targets(&self) -> &[NotifyTarget] {
        &self.targets
    }

    /// Send a notification to all targets, collecting failures
    pub async fn notify(&self, notification: &AlertNotification) -> Result<(), NotifierError> {
        let mut errors = Vec::new();

        for target in &self.targets {
            if let Err(e) = self.notify_target(target, notification).await {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifierError::Multiple(errors))
        }
    }

    async fn notify_target(
        &self,
        target: &NotifyTarget,
        notification: &AlertNotification,
    ) -> Result<(), NotifierError> {
        match target {
            NotifyTarget::Log => {
                match notification.kind {
                    NotificationKind::Alert => tracing::error!(
                        rule = %notification.rule,
                        from = %notification.from,
                        to = %notification.to,
                        value = ?notification.value,
                        "{}",
                        notification.message
                    ),
                    NotificationKind::Warn | NotificationKind::NoData => tracing::warn!(
                        rule = %notification.rule,
                        from = %notification.from,
                        to = %notification.to,
                        value = ?notification.value,
                        "{}",
                        notification.message
                    ),
                    NotificationKind::Recovery => tracing::info!(
                        rule = %notification.rule,
                        from = %notification.from,
                        to = %notification.to,
                        value = ?notification.value,
                        "{}",
                        notification.message
                    ),
                }
                Ok(())
            }
            NotifyTarget::Webhook { url, headers } => {
                self.send_webhook(url, headers, notification).await
            }
        }
    }

    async fn send_webhook(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        notification: &AlertNotification,
    ) -> Result<(), NotifierError> {
        let mut request = self.client.post(url).json(notification);

        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifierError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(rule = %notification.rule, url = %url, "Webhook notification sent");
        Ok(())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(vec![NotifyTarget::Log])
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<NotifierError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn notification() -> AlertNotification {
        AlertNotification {
            rule: "LLM_Error_Detected".to_string(),
            kind: NotificationKind::Alert,
            from: AlertState::Ok,
            to: AlertState::Alert,
            value: Some(1.0),
            message: "errors detected".to_string(),
            tags: vec!["team:llm".to_string()],
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_log_notification() {
        let notifier = Notifier::default();
        assert!(notifier.notify(&notification()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_notification() {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier = Notifier::new(vec![NotifyTarget::Webhook {
            url: format!("http://{}/hook", addr),
            headers: HashMap::new(),
        }]);
        notifier.notify(&notification()).await.unwrap();

        let received = received.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["rule"], "LLM_Error_Detected");
        assert_eq!(received[0]["kind"], "alert");
        assert_eq!(received[0]["to"], "ALERT");
    }

    #[tokio::test]
    async fn test_webhook_failure_is_reported() {
        let notifier = Notifier::new(vec![
            NotifyTarget::Log,
            NotifyTarget::Webhook {
                url: "http://127.0.0.1:1/unreachable".to_string(),
                headers: HashMap::new(),
            },
        ]);
        let err = notifier.notify(&notification()).await.unwrap_err();
        match err {
            NotifierError::Multiple(errors) => assert_eq!(errors.len(), 1),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
