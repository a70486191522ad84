//! SMS delivery abstractions.
//!
//! OTP codes, temporary agent PINs, and verification outcomes go out through
//! an `SmsSender`. Delivery is best-effort everywhere: a gateway failure is
//! logged and never fails the primary operation. The default sender for local
//! dev logs instead of sending.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

// Gateway calls must finish well inside any request deadline.
const SMS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct SmsMessage {
    pub to_phone: String,
    pub body: String,
}

impl SmsMessage {
    #[must_use]
    pub fn new(to_phone: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to_phone: to_phone.into(),
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Deliver a message or return an error for the caller to log.
    async fn send(&self, message: &SmsMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of dispatching it.
#[derive(Clone, Debug)]
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, message: &SmsMessage) -> Result<()> {
        info!(
            to_phone = %message.to_phone,
            body = %message.body,
            "sms gateway send stub"
        );
        Ok(())
    }
}

/// HTTP gateway sender with its own bounded timeout.
pub struct HttpSmsSender {
    client: reqwest::Client,
    endpoint: String,
    sender_id: String,
    api_key: String,
}

impl HttpSmsSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: String, sender_id: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SMS_TIMEOUT)
            .build()
            .context("failed to build sms http client")?;
        Ok(Self {
            client,
            endpoint,
            sender_id,
            api_key,
        })
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send(&self, message: &SmsMessage) -> Result<()> {
        let payload = json!({
            "to": message.to_phone,
            "message": message.body,
            "sender_id": self.sender_id,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("sms gateway request failed")?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("sms gateway returned {}", response.status()))
        }
    }
}

/// Fire-and-forget dispatch for notification messages.
pub async fn send_best_effort(sender: &dyn SmsSender, message: SmsMessage) {
    if let Err(err) = sender.send(&message).await {
        warn!(to_phone = %message.to_phone, "best-effort sms failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct RecordingSmsSender {
        pub sent: Mutex<Vec<SmsMessage>>,
    }

    #[async_trait]
    impl SmsSender for RecordingSmsSender {
        async fn send(&self, message: &SmsMessage) -> Result<()> {
            self.sent.lock().expect("poisoned").push(message.clone());
            Ok(())
        }
    }

    struct FailingSmsSender;

    #[async_trait]
    impl SmsSender for FailingSmsSender {
        async fn send(&self, _message: &SmsMessage) -> Result<()> {
            Err(anyhow!("gateway down"))
        }
    }

    #[tokio::test]
    async fn log_sender_always_succeeds() -> Result<()> {
        LogSmsSender
            .send(&SmsMessage::new("9876543210", "hello"))
            .await
    }

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        send_best_effort(&FailingSmsSender, SmsMessage::new("9876543210", "hello")).await;
    }

    #[tokio::test]
    async fn recording_sender_captures_messages() -> Result<()> {
        let sender = RecordingSmsSender {
            sent: Mutex::new(Vec::new()),
        };
        sender.send(&SmsMessage::new("9876543210", "code 123456")).await?;
        let sent = sender.sent.lock().expect("poisoned");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_phone, "9876543210");
        Ok(())
    }
}
