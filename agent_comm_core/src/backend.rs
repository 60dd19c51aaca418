use crate::pattern::ChannelPattern;
use crate::router::Inbox;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// The primitive operations a broker backend provides to the router core.
///
/// The router owns exactly one backend and reduces all broker interaction to
/// these calls; everything above them (subscription bookkeeping, codec, type
/// recovery, dispatch) is backend-agnostic. A backend translates between the
/// abstract `MessageClass:direction:session_id` addressing and its native
/// one, and pushes incoming deliveries back into the core through the
/// [`Inbox`] received in [`connect`](Backend::connect) — after consulting
/// its own [`DeduplicationWindow`](crate::DeduplicationWindow).
///
/// Backends are expected to be quiet about duplicate state transitions
/// (subscribing to an already-active pattern, disconnecting while
/// disconnected) and loud, via [`TransportError`], about broker I/O
/// failures; the router surfaces those to the caller and never retries
/// transparently.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// A short backend name for logging (`redis`, `rabbitmq`, …).
    fn name(&self) -> &str;

    /// Connects to the broker and retains the given inbox for incoming
    /// deliveries.
    async fn connect(&self, inbox: Inbox) -> Result<(), TransportError>;

    /// Disconnects from the broker, preserving any durable broker-side
    /// state, so that a later [`connect`](Backend::connect) can resume where
    /// this one left off.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Disconnects from the broker and removes the broker-side state this
    /// backend created (queues, bindings). Defaults to a plain
    /// [`disconnect`](Backend::disconnect) for backends without durable
    /// state.
    async fn teardown(&self) -> Result<(), TransportError> {
        self.disconnect().await
    }

    /// Publishes the given payload on the given concrete channel.
    async fn publish_raw(&self, channel: &str, bytes: &[u8]) -> Result<(), TransportError>;

    /// Starts receiving messages for the given pattern. Must be a no-op for
    /// a pattern that is already active.
    async fn subscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError>;

    /// Stops receiving messages for the given pattern. Must be a no-op for a
    /// pattern that is not active.
    async fn unsubscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError>;
}

/// A shared backend is a backend.
///
/// Handing the router an `Arc` clone lets the application keep direct access
/// to adapter-specific extras (health checks, queue purging, the light
/// queue-preserving disconnect) on the other clone.
#[async_trait]
impl<B: Backend> Backend for Arc<B> {
    fn name(&self) -> &str {
        B::name(self)
    }

    async fn connect(&self, inbox: Inbox) -> Result<(), TransportError> {
        B::connect(self, inbox).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        B::disconnect(self).await
    }

    async fn teardown(&self) -> Result<(), TransportError> {
        B::teardown(self).await
    }

    async fn publish_raw(&self, channel: &str, bytes: &[u8]) -> Result<(), TransportError> {
        B::publish_raw(self, channel, bytes).await
    }

    async fn subscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError> {
        B::subscribe_raw(self, pattern).await
    }

    async fn unsubscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError> {
        B::unsubscribe_raw(self, pattern).await
    }
}

/// Represents a broker I/O failure, annotated with the operation that
/// suffered it.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connecting to the broker failed.
    #[error("failed to connect to the message broker: {0}")]
    Connect(String),

    /// Disconnecting from the broker failed.
    #[error("failed to disconnect from the message broker: {0}")]
    Disconnect(String),

    /// Publishing a payload failed.
    #[error("failed to publish to channel '{channel}': {error}")]
    Publish {
        /// The channel the payload was addressed to.
        channel: String,
        /// The underlying broker error.
        error: String,
    },

    /// Establishing a pattern subscription failed.
    #[error("failed to subscribe to pattern '{pattern}': {error}")]
    Subscribe {
        /// The pattern being subscribed.
        pattern: String,
        /// The underlying broker error.
        error: String,
    },

    /// Removing a pattern subscription failed.
    #[error("failed to unsubscribe from pattern '{pattern}': {error}")]
    Unsubscribe {
        /// The pattern being unsubscribed.
        pattern: String,
        /// The underlying broker error.
        error: String,
    },

    /// Any other broker operation failed.
    #[error("broker operation '{operation}' failed: {error}")]
    Operation {
        /// The operation that failed.
        operation: &'static str,
        /// The underlying broker error.
        error: String,
    },

    /// An operation was attempted on a backend that is not connected.
    #[error("the backend is not connected")]
    NotConnected,
}
