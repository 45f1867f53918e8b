use crate::config::WebhookConfig;
use crate::domain::payout::Payout;
use crate::domain::ports::BatchNotifier;
use crate::error::NotifyError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

pub const BATCH_COMPLETED_EVENT: &str = "BATCH_COMPLETED";

#[derive(Debug, Serialize)]
pub struct BatchCompletedPayload<'a> {
    pub event: &'static str,
    pub batch_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub data: BatchCompletedData<'a>,
}

#[derive(Debug, Serialize)]
pub struct BatchCompletedData<'a> {
    pub total_count: usize,
    pub payouts: &'a [Payout],
}

impl<'a> BatchCompletedPayload<'a> {
    pub fn new(batch_id: &'a str, payouts: &'a [Payout]) -> Self {
        Self {
            event: BATCH_COMPLETED_EVENT,
            batch_id,
            timestamp: Utc::now(),
            data: BatchCompletedData {
                total_count: payouts.len(),
                payouts,
            },
        }
    }
}

/// Posts the final batch state to the client system's webhook as JSON.
///
/// With no URL configured, delivery is skipped with a warning.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            url: config.url.clone().filter(|u| !u.trim().is_empty()),
            client,
        })
    }
}

#[async_trait]
impl BatchNotifier for WebhookNotifier {
    async fn notify_batch_completion(
        &self,
        batch_id: &str,
        payouts: &[Payout],
    ) -> Result<(), NotifyError> {
        let Some(url) = self.url.as_deref() else {
            warn!(batch_id, "skipping client notification: webhook URL is not set");
            return Ok(());
        };

        let body = serde_json::to_vec(&BatchCompletedPayload::new(batch_id, payouts))?;
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Event-Type", BATCH_COMPLETED_EVENT)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        info!(batch_id, %url, "client system notified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::MinorUnits;
    use crate::domain::payout::PayoutRequest;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one request, answers with `status` and returns the raw request.
    async fn one_shot_server(status: u16) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hooks/batch", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!("HTTP/1.1 {} X\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (url, handle)
    }

    fn payouts() -> Vec<Payout> {
        vec![Payout::from_request(
            "batch-7",
            "REF",
            PayoutRequest {
                amount: MinorUnits::new(250).unwrap(),
                ..Default::default()
            },
        )]
    }

    fn notifier(url: Option<String>) -> WebhookNotifier {
        WebhookNotifier::new(&WebhookConfig {
            url,
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_posts_batch_payload() {
        let (url, server) = one_shot_server(200).await;
        notifier(Some(url))
            .notify_batch_completion("batch-7", &payouts())
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hooks/batch"));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["event"], "BATCH_COMPLETED");
        assert_eq!(json["batch_id"], "batch-7");
        assert_eq!(json["data"]["total_count"], 1);
        assert_eq!(json["data"]["payouts"][0]["amount"], 250);
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let (url, _server) = one_shot_server(503).await;
        let result = notifier(Some(url))
            .notify_batch_completion("batch-7", &payouts())
            .await;
        assert!(matches!(result, Err(NotifyError::Status(503))));
    }

    #[tokio::test]
    async fn test_missing_url_is_skipped() {
        assert!(
            notifier(None)
                .notify_batch_completion("batch-7", &payouts())
                .await
                .is_ok()
        );
    }
}
