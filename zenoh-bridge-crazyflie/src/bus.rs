//! Bus adapter seam and its Zenoh implementation.
//!
//! The core publishes telemetry and receives commands only through
//! [`BusAdapter`]. Both methods are synchronous and never wait on the network:
//! they are called from the telemetry callback and from startup code.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use zenoh::Wait;
use zenoh::sample::SampleKind;

use flybridge_common::{
    BridgeStatus, BusMessage, CommandEnvelope, Format, KeyExprBuilder, TelemetryEnvelope,
    decode_auto, encode,
};

use crate::error::BusError;

/// Invoked by the bus transport for every decoded command.
///
/// Receives the envelope and the key expression it arrived on.
pub type CommandHandler = Arc<dyn Fn(CommandEnvelope, &str) + Send + Sync>;

/// Keeps a command subscription alive. Dropping it unsubscribes.
pub struct CommandSubscription {
    _guard: Box<dyn Any + Send>,
}

impl CommandSubscription {
    /// Wrap whatever keeps the subscription alive.
    pub fn new(guard: impl Any + Send) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for CommandSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSubscription").finish_non_exhaustive()
    }
}

/// Publish/subscribe transport seen by the bridge core.
pub trait BusAdapter: Send + Sync {
    /// Hand one telemetry message to the bus. Must not block.
    fn publish(&self, message: BusMessage, timestamp: i64, channel: u16) -> Result<(), BusError>;

    /// Start delivering commands addressed to `channel` to `handler`.
    fn subscribe_commands(
        &self,
        channel: u16,
        handler: CommandHandler,
    ) -> Result<CommandSubscription, BusError>;
}

/// Default number of encoded messages waiting for Zenoh.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Outgoing {
    key: String,
    payload: Vec<u8>,
}

/// Bounded hand-off between `publish` and the publisher task.
///
/// Never waits: a full queue drops the message.
struct PublishQueue {
    tx: Mutex<Option<mpsc::Sender<Outgoing>>>,
    dropped: AtomicU64,
}

impl PublishQueue {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx: Mutex::new(Some(tx)),
            dropped: AtomicU64::new(0),
        };
        (queue, rx)
    }

    fn push(&self, outgoing: Outgoing) -> Result<(), BusError> {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(BusError::Closed)?;

        tx.try_send(outgoing).map_err(|e| match e {
            TrySendError::Full(outgoing) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                BusError::QueueFull { key: outgoing.key }
            }
            TrySendError::Closed(_) => BusError::Closed,
        })
    }

    /// Refuse further messages; queued ones are still delivered.
    fn close(&self) {
        self.tx.lock().take();
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// [`BusAdapter`] over a Zenoh session.
///
/// Encoded messages are queued on a bounded channel and written by a
/// dedicated publisher task, so [`publish`](BusAdapter::publish) returns
/// immediately. When Zenoh falls behind and the queue is full, new messages
/// are dropped with [`BusError::QueueFull`].
pub struct ZenohBus {
    session: Arc<zenoh::Session>,
    keys: KeyExprBuilder,
    format: Format,
    queue: PublishQueue,
    publisher: Mutex<Option<JoinHandle<()>>>,
    published: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl ZenohBus {
    /// Create the adapter with a queue of [`DEFAULT_QUEUE_CAPACITY`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(session: Arc<zenoh::Session>, keys: KeyExprBuilder, format: Format) -> Self {
        Self::with_queue_capacity(session, keys, format, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create the adapter and spawn its publisher task.
    pub fn with_queue_capacity(
        session: Arc<zenoh::Session>,
        keys: KeyExprBuilder,
        format: Format,
        capacity: usize,
    ) -> Self {
        let (queue, rx) = PublishQueue::new(capacity);
        let published = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let publisher = tokio::spawn(run_publisher(
            Arc::clone(&session),
            format,
            rx,
            Arc::clone(&published),
            Arc::clone(&failed),
        ));

        Self {
            session,
            keys,
            format,
            queue,
            publisher: Mutex::new(Some(publisher)),
            published,
            failed,
        }
    }

    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    /// Messages written to Zenoh so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Messages Zenoh refused.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Messages dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Publish the bridge status on `<prefix>/@/status` (always JSON).
    pub async fn publish_status(&self, status: &BridgeStatus) -> Result<(), BusError> {
        let key = self.keys.status();
        let payload = serde_json::to_vec(status).map_err(flybridge_common::Error::from)?;

        self.session
            .put(&key, payload)
            .encoding(Format::Json.encoding())
            .await
            .map_err(|e| BusError::Publish {
                key,
                message: e.to_string(),
            })
    }

    /// Stop accepting messages and wait for queued ones to be written.
    pub async fn close(&self) {
        self.queue.close();

        let publisher = self.publisher.lock().take();
        if let Some(publisher) = publisher {
            if let Err(e) = publisher.await {
                warn!(error = %e, "Publisher task failed");
            }
        }

        debug!(
            published = self.published(),
            failed = self.failed(),
            dropped = self.dropped(),
            "Bus adapter closed"
        );
    }
}

impl BusAdapter for ZenohBus {
    fn publish(&self, message: BusMessage, timestamp: i64, channel: u16) -> Result<(), BusError> {
        let key = self.keys.telemetry(channel, &message);
        let envelope = TelemetryEnvelope {
            timestamp,
            channel,
            message,
        };
        let payload = encode(&envelope, self.format)?;

        self.queue.push(Outgoing { key, payload })
    }

    fn subscribe_commands(
        &self,
        channel: u16,
        handler: CommandHandler,
    ) -> Result<CommandSubscription, BusError> {
        let key = self.keys.commands(channel);

        let subscriber = self
            .session
            .declare_subscriber(&key)
            .callback(move |sample| {
                if sample.kind() == SampleKind::Delete {
                    trace!(key = %sample.key_expr(), "Ignoring delete sample");
                    return;
                }

                let payload = sample.payload().to_bytes();
                match decode_auto::<CommandEnvelope>(&payload) {
                    Ok(envelope) => handler(envelope, sample.key_expr().as_str()),
                    Err(e) => {
                        warn!(
                            key = %sample.key_expr(),
                            payload_len = payload.len(),
                            error = %e,
                            "Failed to decode command"
                        );
                    }
                }
            })
            .wait()
            .map_err(flybridge_common::Error::from)?;

        info!(key_expr = %key, "Subscribed to commands");
        Ok(CommandSubscription::new(subscriber))
    }
}

async fn run_publisher(
    session: Arc<zenoh::Session>,
    format: Format,
    mut rx: mpsc::Receiver<Outgoing>,
    published: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
) {
    while let Some(Outgoing { key, payload }) = rx.recv().await {
        match session
            .put(&key, payload)
            .encoding(format.encoding())
            .await
        {
            Ok(()) => {
                published.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Published");
            }
            Err(e) => {
                failed.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Failed to publish telemetry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_drops_guard() {
        struct Flag(Arc<AtomicU64>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let dropped = Arc::new(AtomicU64::new(0));
        let subscription = CommandSubscription::new(Flag(Arc::clone(&dropped)));
        assert_eq!(dropped.load(Ordering::Relaxed), 0);

        drop(subscription);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    fn outgoing(key: &str) -> Outgoing {
        Outgoing {
            key: key.to_string(),
            payload: vec![0xa0],
        }
    }

    #[test]
    fn test_full_queue_drops_instead_of_growing() {
        let (queue, mut rx) = PublishQueue::new(2);

        queue.push(outgoing("cf/0/frame")).unwrap();
        queue.push(outgoing("cf/0/state")).unwrap();
        let err = queue.push(outgoing("cf/0/frame")).unwrap_err();

        assert!(matches!(err, BusError::QueueFull { ref key } if key == "cf/0/frame"));
        assert_eq!(queue.dropped(), 1);

        // Room again once the publisher catches up.
        assert_eq!(rx.try_recv().unwrap().key, "cf/0/frame");
        queue.push(outgoing("cf/0/state")).unwrap();
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_closed_queue_refuses_but_keeps_queued() {
        let (queue, mut rx) = PublishQueue::new(4);
        queue.push(outgoing("cf/0/frame")).unwrap();

        queue.close();

        assert!(matches!(
            queue.push(outgoing("cf/0/state")),
            Err(BusError::Closed)
        ));
        assert_eq!(rx.try_recv().unwrap().key, "cf/0/frame");
        assert!(rx.try_recv().is_err());
    }
}
