//! NATS transport for the notify endpoint
//!
//! The daemon serves `notify` as a request/reply endpoint on a queue group,
//! so exactly one instance answers each request. Payloads are JSON on both
//! sides; a malformed request gets an error envelope back instead of
//! silence. [`AuditClient`] is the caller side used by tools and other
//! services.

use std::future::Future;
use std::time::Duration;

use async_nats::{Client, Message};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::BusConfig;
use crate::error::{Error, Result};
use crate::journal::{AdditionalData, JournalReader};
use crate::manager::Manager;
use crate::sync::StoreControl;

/// Request payload of the notify endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub transaction_id: u64,
}

/// Reply payload of the notify endpoint
///
/// `error` is set only when the request itself was unusable; a degraded
/// store is not an error and shows up as shorter `additional_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyReply {
    pub additional_data: AdditionalData,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connect to the bus, retrying the initial connection with exponential
/// backoff
///
/// `name` labels the connection in server monitoring. Once connected, the
/// client keeps reconnecting on its own up to `max_reconnects`.
pub async fn connect(name: &str, config: &BusConfig) -> Result<Client> {
    let base_delay = config.retry_delay();
    let mut attempt = 0;

    loop {
        match try_connect(name, config).await {
            Ok(client) => {
                if attempt > 0 {
                    tracing::info!(
                        attempts = attempt + 1,
                        url = %config.url,
                        "Bus connection established after retries"
                    );
                } else {
                    tracing::info!(url = %config.url, "Bus connection established");
                }
                return Ok(client);
            }
            Err(err) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(attempts = attempt, "Giving up on bus connection: {}", err);
                    return Err(err);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    "Bus connection failed, retrying: {}",
                    err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_connect(name: &str, config: &BusConfig) -> Result<Client> {
    async_nats::ConnectOptions::new()
        .name(name)
        .max_reconnects(Some(config.max_reconnects))
        .connect(&config.url)
        .await
        .map_err(|err| {
            Error::nats(format!(
                "Failed to connect to NATS at '{}': {}",
                config.url, err
            ))
        })
}

/// Serve the notify endpoint until the subscription closes or `shutdown`
/// resolves
///
/// Requests are handled sequentially; the durability barrier serializes
/// them anyway, and ordering within the queue group stays predictable.
pub async fn serve<S, R>(
    client: Client,
    manager: Manager<S, R>,
    config: &BusConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<()>
where
    S: StoreControl,
    R: JournalReader,
{
    let mut requests = client
        .queue_subscribe(config.subject.clone(), config.queue_group.clone())
        .await
        .map_err(|err| {
            Error::nats(format!(
                "Failed to subscribe to '{}': {}",
                config.subject, err
            ))
        })?;

    tracing::info!(
        subject = %config.subject,
        queue_group = %config.queue_group,
        "Audit notify endpoint listening"
    );

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, stopping audit endpoint");
                break;
            }
            message = requests.next() => {
                match message {
                    Some(message) => respond(&client, &manager, message).await,
                    None => {
                        tracing::warn!("Audit subscription closed by the server");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn respond<S, R>(client: &Client, manager: &Manager<S, R>, message: Message)
where
    S: StoreControl,
    R: JournalReader,
{
    let reply = build_reply(manager, &message.payload).await;

    // requests published without a reply subject are fire-and-forget
    let Some(reply_subject) = message.reply else {
        return;
    };

    match serde_json::to_vec(&reply) {
        Ok(bytes) => {
            if let Err(err) = client.publish(reply_subject, bytes.into()).await {
                tracing::error!("Failed to publish audit reply: {}", err);
            }
        }
        Err(err) => {
            tracing::error!("Failed to encode audit reply: {}", err);
        }
    }
}

/// Decode one request payload and run it through the manager
async fn build_reply<S, R>(manager: &Manager<S, R>, payload: &[u8]) -> NotifyReply
where
    S: StoreControl,
    R: JournalReader,
{
    match serde_json::from_slice::<NotifyRequest>(payload) {
        Ok(request) => NotifyReply {
            additional_data: manager.notify(request.transaction_id).await,
            error: None,
        },
        Err(err) => {
            tracing::warn!("Malformed audit notify request: {}", err);
            NotifyReply {
                additional_data: AdditionalData::new(),
                error: Some(format!("malformed request: {}", err)),
            }
        }
    }
}

/// Caller side of the notify endpoint
pub struct AuditClient {
    client: Client,
    subject: String,
    timeout: Duration,
}

impl AuditClient {
    pub fn new(client: Client, config: &BusConfig) -> Self {
        Self {
            client,
            subject: config.subject.clone(),
            timeout: config.request_timeout(),
        }
    }

    /// Send a notification and wait for the correlated fields
    pub async fn notify(&self, transaction_id: u64) -> Result<AdditionalData> {
        let payload = serde_json::to_vec(&NotifyRequest { transaction_id })?;

        let response = tokio::time::timeout(
            self.timeout,
            self.client.request(self.subject.clone(), payload.into()),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "no audit reply within {}s",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|err| Error::nats(format!("Audit request failed: {}", err)))?;

        let reply: NotifyReply = serde_json::from_slice(&response.payload)?;
        if let Some(error) = reply.error {
            return Err(Error::nats(format!("Audit service rejected request: {}", error)));
        }
        Ok(reply.additional_data)
    }

    /// Send a notification without waiting for the result
    ///
    /// The daemon still scans and feeds its sink; only the reply is skipped.
    pub async fn notify_noreply(&self, transaction_id: u64) -> Result<()> {
        let payload = serde_json::to_vec(&NotifyRequest { transaction_id })?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|err| {
                Error::nats(format!("Failed to publish to '{}': {}", self.subject, err))
            })?;
        // publish only buffers; flush before reporting success
        self.client
            .flush()
            .await
            .map_err(|err| Error::nats(format!("Failed to flush bus connection: {}", err)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScanConfig, SyncConfig};
    use crate::journal::{JournalCursor, JournalEntry, JournalScanner};
    use crate::sync::{ChangeWatch, SyncCoordinator, SyncMark};
    use async_trait::async_trait;

    struct SyncedControl;

    #[async_trait]
    impl StoreControl for SyncedControl {
        fn now(&self) -> SyncMark {
            1
        }

        async fn sync_mark(&self) -> Option<SyncMark> {
            Some(1)
        }

        async fn request_flush(&self) -> Result<()> {
            Ok(())
        }

        async fn watch(&self) -> Result<Box<dyn ChangeWatch>> {
            Err(Error::journal("watch not expected in this test"))
        }
    }

    struct FixedReader(Vec<JournalEntry>);

    #[async_trait]
    impl JournalReader for FixedReader {
        async fn open_backward(&self) -> Result<Box<dyn JournalCursor>> {
            Ok(Box::new(FixedCursor(self.0.clone())))
        }
    }

    struct FixedCursor(Vec<JournalEntry>);

    #[async_trait]
    impl JournalCursor for FixedCursor {
        async fn next_entry(&mut self) -> Result<Option<JournalEntry>> {
            Ok(self.0.pop())
        }
    }

    fn manager(entries: Vec<JournalEntry>) -> Manager<SyncedControl, FixedReader> {
        Manager::new(
            SyncCoordinator::new(SyncedControl, SyncConfig::default()),
            JournalScanner::new(FixedReader(entries), ScanConfig::default()),
        )
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&NotifyRequest { transaction_id: 42 }).unwrap();
        assert_eq!(json, r#"{"transaction_id":42}"#);

        let parsed: NotifyRequest = serde_json::from_str(r#"{"transaction_id":7}"#).unwrap();
        assert_eq!(parsed.transaction_id, 7);
    }

    #[test]
    fn test_reply_omits_absent_error() {
        let reply = NotifyReply {
            additional_data: vec!["MESSAGE=end".to_string()],
            error: None,
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"additional_data":["MESSAGE=end"]}"#);
    }

    #[test]
    fn test_reply_round_trips_error() {
        let reply = NotifyReply {
            additional_data: AdditionalData::new(),
            error: Some("malformed request: missing field".to_string()),
        };
        let json = serde_json::to_string(&reply).unwrap();
        let parsed: NotifyReply = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("malformed request: missing field"));
    }

    #[tokio::test]
    async fn test_build_reply_for_valid_request() {
        let manager = manager(vec![JournalEntry::default()
            .with("TRANSACTION_ID", "42")
            .with("MESSAGE", "end")]);
        let reply = build_reply(&manager, br#"{"transaction_id":42}"#).await;
        assert_eq!(reply.additional_data, vec!["MESSAGE=end"]);
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn test_build_reply_for_malformed_request() {
        let manager = manager(Vec::new());
        let reply = build_reply(&manager, b"not json").await;
        assert!(reply.additional_data.is_empty());
        assert!(reply.error.is_some());
    }

    #[tokio::test]
    async fn test_build_reply_for_wrong_shape() {
        let manager = manager(Vec::new());
        let reply = build_reply(&manager, br#"{"id":42}"#).await;
        assert!(reply.error.is_some());
    }
}
