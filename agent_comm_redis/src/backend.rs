use crate::Handle;
use agent_comm_core::{Backend, ChannelPattern, DeduplicationWindow, Inbox, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::RedisError;
use redis::aio::{ConnectionManager, PubSubStream};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::select;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `disconnect` waits for the listener task to exit before
/// abandoning it.
const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// The connection-scoped resources, present only while connected.
struct Connected {
    publisher: ConnectionManager,
    sink: redis::aio::PubSubSink,
    shutdown: Arc<Notify>,
    listener: JoinHandle<()>,
}

/// The Redis Pub/Sub backend.
///
/// Maintains one multiplexed connection for publishing and one pub/sub
/// connection, split into a command sink (for subscribe/unsubscribe calls)
/// and a message stream drained by a single long-running listener task.
///
/// Channel names and patterns are used verbatim as Redis channels. A pattern
/// that carries any of the glob meta-characters `*`, `?`, `[` becomes a
/// `PSUBSCRIBE`; anything else becomes an exact `SUBSCRIBE`. For pattern
/// deliveries the listener takes the message's own channel, not the
/// subscription pattern, and consults the de-duplication window before
/// handing the payload to the router core, so a message matching both a
/// pattern and an exact subscription surfaces once.
///
/// Redis Pub/Sub is fire-and-forget: nothing is persisted, and messages
/// published while no subscriber is connected are lost.
pub struct RedisBackend {
    name: Arc<str>,
    handle: Handle,
    dedup: Arc<DeduplicationWindow>,
    /// The patterns currently subscribed on the broker, for debouncing
    /// repeated raw calls.
    patterns: Mutex<HashSet<ChannelPattern>>,
    state: AsyncMutex<Option<Connected>>,
}

impl RedisBackend {
    /// Creates a new, unconnected backend for the given [`Handle`].
    pub fn new(handle: impl AsRef<Handle>) -> Self {
        let handle = handle.as_ref().clone();
        let name = Self::compose_name(&handle);

        Self {
            name,
            handle,
            dedup: Arc::new(DeduplicationWindow::new()),
            patterns: Mutex::new(HashSet::new()),
            state: AsyncMutex::new(None),
        }
    }

    /// Composes a globally unique, human-readable name for this backend.
    fn compose_name(handle: &Handle) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "redis:backend:{}:{}",
            handle.name(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Pings the server over the publishing connection.
    pub async fn health_check(&self) -> bool {
        let mut publisher = {
            let state = self.state.lock().await;

            match state.as_ref() {
                Some(connected) => connected.publisher.clone(),
                None => return false,
            }
        };

        let result: Result<(), RedisError> =
            redis::cmd("PING").query_async(&mut publisher).await;

        result.is_ok()
    }
}

impl RedisBackend {
    /// The long-running listener: drains the pub/sub stream until told to
    /// shut down or the stream ends.
    async fn listen(
        name: Arc<str>,
        mut stream: PubSubStream,
        inbox: Inbox,
        dedup: Arc<DeduplicationWindow>,
        shutdown: Arc<Notify>,
    ) {
        debug!(listener = name.as_ref(), "Redis listener started");

        loop {
            select! {
                biased;
                _ = shutdown.notified() => break,
                message = stream.next() => {
                    let Some(message) = message else {
                        debug!(listener = name.as_ref(), "Redis message stream ended");
                        break;
                    };

                    Self::receive(&name, &message, &inbox, &dedup).await;
                }
            }
        }

        debug!(listener = name.as_ref(), "Redis listener exited");
    }

    /// Funnels one incoming pub/sub message into the router core.
    async fn receive(name: &str, message: &redis::Msg, inbox: &Inbox, dedup: &DeduplicationWindow) {
        // For pattern deliveries this is the message's own channel, not the
        // subscription pattern that caught it
        let channel = message.get_channel_name().to_owned();
        let payload = message.get_payload_bytes();

        if !dedup.admit(&channel, payload) {
            debug!(
                listener = name,
                channel,
                "Skipping duplicate delivery from overlapping subscriptions",
            );
            return;
        }

        if let Err(error) = inbox.deliver(&channel, payload).await {
            error!(
                listener = name,
                channel,
                ?error,
                error_message = %error,
                "Error delivering an incoming Redis message",
            );
        }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn connect(&self, inbox: Inbox) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        if state.is_some() {
            return Ok(());
        }

        let client = redis::Client::open(self.handle.dsn().unsecure())
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        let mut publisher = client
            .get_connection_manager()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        // Probe the connection before declaring victory
        let ping: Result<(), RedisError> = redis::cmd("PING").query_async(&mut publisher).await;
        ping.map_err(|error| TransportError::Connect(error.to_string()))?;

        let pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (sink, stream) = pubsub.split();

        let shutdown = Arc::new(Notify::new());
        let listener = tokio::spawn(Self::listen(
            Arc::clone(&self.name),
            stream,
            inbox,
            Arc::clone(&self.dedup),
            Arc::clone(&shutdown),
        ));

        *state = Some(Connected {
            publisher,
            sink,
            shutdown,
            listener,
        });

        info!(
            name = self.name.as_ref(),
            identifier = self.handle.identifier(),
            "Connected to Redis",
        );

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        let Some(connected) = state.take() else {
            return Ok(());
        };

        // Ask the listener to wind down, give it a bounded moment, then
        // abandon it
        connected.shutdown.notify_one();

        let mut listener = connected.listener;
        if tokio::time::timeout(LISTENER_STOP_TIMEOUT, &mut listener)
            .await
            .is_err()
        {
            warn!(
                name = self.name.as_ref(),
                "Redis listener did not exit in time; abandoning it",
            );
            listener.abort();
        }

        // Dropping the sink and the publisher closes both connections
        drop(connected.sink);
        drop(connected.publisher);

        self.patterns.lock().clear();

        info!(
            name = self.name.as_ref(),
            identifier = self.handle.identifier(),
            "Disconnected from Redis",
        );

        Ok(())
    }

    async fn publish_raw(&self, channel: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let mut publisher = {
            let state = self.state.lock().await;

            match state.as_ref() {
                Some(connected) => connected.publisher.clone(),
                None => return Err(TransportError::NotConnected),
            }
        };

        let receivers: Result<i64, RedisError> = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(bytes)
            .query_async(&mut publisher)
            .await;

        let receivers = receivers.map_err(|error| TransportError::Publish {
            channel: channel.to_owned(),
            error: error.to_string(),
        })?;

        debug!(
            name = self.name.as_ref(),
            channel,
            receivers,
            "Published message to Redis channel",
        );

        Ok(())
    }

    async fn subscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError> {
        if self.patterns.lock().contains(pattern) {
            return Ok(());
        }

        let mut state = self.state.lock().await;

        let Some(connected) = state.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let result = if pattern.is_literal() {
            connected.sink.subscribe(pattern.as_str()).await
        } else {
            connected.sink.psubscribe(pattern.as_str()).await
        };

        result.map_err(|error| TransportError::Subscribe {
            pattern: pattern.as_str().to_owned(),
            error: error.to_string(),
        })?;

        self.patterns.lock().insert(pattern.clone());

        debug!(
            name = self.name.as_ref(),
            pattern = pattern.as_str(),
            literal = pattern.is_literal(),
            "Subscribed to Redis channel",
        );

        Ok(())
    }

    async fn unsubscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError> {
        if !self.patterns.lock().contains(pattern) {
            return Ok(());
        }

        let mut state = self.state.lock().await;

        let Some(connected) = state.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let result = if pattern.is_literal() {
            connected.sink.unsubscribe(pattern.as_str()).await
        } else {
            connected.sink.punsubscribe(pattern.as_str()).await
        };

        result.map_err(|error| TransportError::Unsubscribe {
            pattern: pattern.as_str().to_owned(),
            error: error.to_string(),
        })?;

        self.patterns.lock().remove(pattern);

        debug!(
            name = self.name.as_ref(),
            pattern = pattern.as_str(),
            "Unsubscribed from Redis channel",
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DsnChunks;

    fn handle() -> Handle {
        Handle::new(
            "test",
            DsnChunks {
                host: "localhost",
                port: 6379,
                db: 0,
                password: None::<&str>,
            },
        )
    }

    #[test]
    fn backend_names_are_unique() {
        // Given
        let first = RedisBackend::new(handle());
        let second = RedisBackend::new(handle());

        // Then
        assert_ne!(first.name.as_ref(), second.name.as_ref());
        assert!(first.name.starts_with("redis:backend:test:"));
    }

    #[tokio::test]
    async fn unconnected_backend_rejects_publish() {
        // Given
        let backend = RedisBackend::new(handle());

        // When
        let error = backend.publish_raw("T:request:s", b"{}").await.unwrap_err();

        // Then
        assert!(matches!(error, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn unconnected_backend_is_unhealthy() {
        // Given
        let backend = RedisBackend::new(handle());

        // Then
        assert!(!backend.health_check().await);
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_no_op() {
        // Given
        let backend = RedisBackend::new(handle());

        // Then
        assert!(backend.disconnect().await.is_ok());
    }
}
