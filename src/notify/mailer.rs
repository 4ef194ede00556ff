//! Outbound mail
//!
//! Delivery goes through a trait so the scheduler and tests don't care
//! how mail leaves the system. The production implementation posts JSON
//! to an HTTP relay; with no relay configured, mail is logged and dropped.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{PlatformError, Result};

/// One outbound message
#[derive(Debug, Clone, Serialize)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivery seam
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<()>;
}

/// Posts messages as JSON to an HTTP mail relay
pub struct RelayMailer {
    client: reqwest::Client,
    relay_url: String,
    from: String,
}

impl RelayMailer {
    pub fn new(relay_url: String, from: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PlatformError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            relay_url,
            from,
        })
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    async fn send(&self, mail: Mail) -> Result<()> {
        let payload = json!({
            "from": self.from,
            "to": mail.to,
            "subject": mail.subject,
            "body": mail.body,
        });

        let response = self
            .client
            .post(&self.relay_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PlatformError::Internal(format!("mail relay unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(PlatformError::Internal(format!(
                "mail relay returned {}",
                response.status()
            )));
        }

        info!(to = %mail.to, subject = %mail.subject, "Notification sent");
        Ok(())
    }
}

/// Drops mail with a log line. Used when no relay is configured.
pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send(&self, mail: Mail) -> Result<()> {
        debug!(to = %mail.to, subject = %mail.subject, "Mail relay not configured, dropping");
        Ok(())
    }
}

/// Captures sent mail for assertions
#[cfg(test)]
pub struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<Mail>>,
}

#[cfg(test)]
impl RecordingMailer {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: Mail) -> Result<()> {
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_mailer_captures_sends() {
        let mailer = RecordingMailer::new();
        tokio_test::block_on(mailer.send(Mail {
            to: "producer@example.com".into(),
            subject: "Milestone due soon".into(),
            body: "body".into(),
        }))
        .unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "producer@example.com");
    }

    #[test]
    fn test_null_mailer_accepts_everything() {
        let result = tokio_test::block_on(NullMailer.send(Mail {
            to: "anyone@example.com".into(),
            subject: "s".into(),
            body: "b".into(),
        }));
        assert!(result.is_ok());
    }
}
