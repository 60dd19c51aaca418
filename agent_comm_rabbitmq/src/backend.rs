use crate::{Handle, naming};
use agent_comm_core::{Backend, ChannelPattern, DeduplicationWindow, Inbox, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions, QueueDeleteOptions, QueuePurgeOptions,
};
use lapin::types::FieldTable;
use lapin::{
    BasicProperties, Channel as LapinChannel, Connection, ConnectionProperties,
    Consumer as LapinConsumer, ExchangeKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The delivery mode that makes the broker persist a message to disk.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// The content type of every payload the router publishes.
const CONTENT_TYPE_JSON: &str = "application/json";

/// A live binding for one subscription pattern: its durable queue and the
/// consumer draining it.
struct Binding {
    queue: String,
    consumer_tag: String,
    worker: JoinHandle<()>,
}

/// The connection-scoped resources, present only while connected.
struct Connected {
    connection: Connection,
    channel: LapinChannel,
    inbox: Inbox,
    bindings: HashMap<ChannelPattern, Binding>,
}

/// The RabbitMQ topic-exchange backend.
///
/// On connect, declares one durable topic exchange (named on the
/// [`Handle`]) and sets the consumer prefetch. Every subscription pattern
/// gets one durable, non-auto-delete queue whose name is derived
/// deterministically from the pattern, bound with the AMQP-native form of
/// the pattern (`:` → `.`, `*` → `#`), and one manually-acknowledging
/// consumer task.
///
/// Each consumed message is translated back into the abstract channel form,
/// checked against the de-duplication window (several bound queues can
/// receive the same broker message) and, on admission, handed to the router
/// core. The message is acknowledged on success and negatively acknowledged
/// with requeue when the core reports a failure.
///
/// [`disconnect`](Backend::disconnect) cancels the consumers but preserves
/// the queues, so a later connect resumes consumption of anything that
/// accumulated in between; [`teardown`](Backend::teardown) also deletes the
/// queues (guarded by if-unused and if-empty).
pub struct RabbitMqBackend {
    name: Arc<str>,
    handle: Handle,
    dedup: Arc<DeduplicationWindow>,
    state: AsyncMutex<Option<Connected>>,
}

impl RabbitMqBackend {
    /// Creates a new, unconnected backend for the given [`Handle`].
    pub fn new(handle: impl AsRef<Handle>) -> Self {
        let handle = handle.as_ref().clone();
        let name = Self::compose_name(&handle);

        Self {
            name,
            handle,
            dedup: Arc::new(DeduplicationWindow::new()),
            state: AsyncMutex::new(None),
        }
    }

    /// Composes a globally unique, human-readable name for this backend.
    fn compose_name(handle: &Handle) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "rabbitmq:backend:{}:{}",
            handle.name(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Composes a globally unique consumer tag.
    fn compose_consumer_tag(queue: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        format!(
            "rabbitmq:consumer:{}:{}",
            queue,
            COUNTER.fetch_add(1, Ordering::Relaxed),
        )
    }

    /// Reports whether both the connection and the channel are open.
    pub async fn health_check(&self) -> bool {
        let state = self.state.lock().await;

        match state.as_ref() {
            Some(connected) => {
                connected.connection.status().connected()
                    && connected.channel.status().connected()
            }
            None => false,
        }
    }

    /// Purges all pending messages from the queue bound for the given
    /// pattern, returning the number of messages dropped.
    ///
    /// Purging a pattern without an active subscription purges nothing.
    pub async fn purge_queue(&self, pattern: &ChannelPattern) -> Result<u32, TransportError> {
        let state = self.state.lock().await;

        let Some(connected) = state.as_ref() else {
            return Err(TransportError::NotConnected);
        };

        let Some(binding) = connected.bindings.get(pattern) else {
            return Ok(0);
        };

        connected
            .channel
            .queue_purge(&binding.queue, QueuePurgeOptions::default())
            .await
            .map_err(|error| TransportError::Operation {
                operation: "purge",
                error: error.to_string(),
            })
    }
}

impl RabbitMqBackend {
    /// The long-running consumer loop for one bound queue.
    async fn consume(
        name: Arc<str>,
        mut consumer: LapinConsumer,
        inbox: Inbox,
        dedup: Arc<DeduplicationWindow>,
    ) {
        debug!(consumer = name.as_ref(), "RabbitMQ consumer started");

        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => Self::receive(&name, delivery, &inbox, &dedup).await,
                Err(error) => {
                    warn!(
                        consumer = name.as_ref(),
                        ?error,
                        error_message = %error,
                        "Received an error from a RabbitMQ consumer",
                    );
                }
            }
        }

        debug!(consumer = name.as_ref(), "RabbitMQ consumer exited");
    }

    /// Funnels one consumed message into the router core, acknowledging on
    /// success and negatively acknowledging with requeue on failure.
    async fn receive(
        name: &str,
        delivery: Delivery,
        inbox: &Inbox,
        dedup: &DeduplicationWindow,
    ) {
        let channel = naming::channel_name(delivery.routing_key.as_str());

        // A duplicate from another binding still has to be acknowledged, or
        // it would sit in the queue unacked forever
        if !dedup.admit(&channel, &delivery.data) {
            debug!(
                consumer = name,
                channel,
                "Skipping duplicate delivery from overlapping bindings",
            );
            Self::acknowledge(name, &delivery, &channel).await;
            return;
        }

        match inbox.deliver(&channel, &delivery.data).await {
            Ok(()) => Self::acknowledge(name, &delivery, &channel).await,
            Err(error) => {
                error!(
                    consumer = name,
                    channel,
                    ?error,
                    error_message = %error,
                    "Error delivering an incoming RabbitMQ message; requeueing",
                );

                let nack = delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    })
                    .await;

                if let Err(error) = nack {
                    warn!(
                        consumer = name,
                        channel,
                        ?error,
                        error_message = %error,
                        "Failed to negatively acknowledge a RabbitMQ message",
                    );
                }
            }
        }
    }

    /// Acknowledges one consumed message, complaining on failure.
    async fn acknowledge(name: &str, delivery: &Delivery, channel: &str) {
        if let Err(error) = delivery.acker.ack(BasicAckOptions::default()).await {
            warn!(
                consumer = name,
                channel,
                ?error,
                error_message = %error,
                "Failed to acknowledge a RabbitMQ message",
            );
        }
    }

    /// Cancels one consumer, complaining on failure.
    async fn cancel_consumer(&self, channel: &LapinChannel, binding: &Binding) {
        let result = channel
            .basic_cancel(&binding.consumer_tag, BasicCancelOptions::default())
            .await;

        if let Err(error) = result {
            warn!(
                name = self.name.as_ref(),
                queue = binding.queue.as_str(),
                ?error,
                error_message = %error,
                "Failed to cancel a RabbitMQ consumer",
            );
        }
    }

    /// Closes the channel and the connection, complaining on failure.
    async fn close(&self, connected: &Connected) {
        if let Err(error) = connected.channel.close(0, "closing").await {
            debug!(
                name = self.name.as_ref(),
                ?error,
                error_message = %error,
                "Error closing the RabbitMQ channel",
            );
        }

        if let Err(error) = connected.connection.close(0, "closing").await {
            debug!(
                name = self.name.as_ref(),
                ?error,
                error_message = %error,
                "Error closing the RabbitMQ connection",
            );
        }
    }
}

#[async_trait]
impl Backend for RabbitMqBackend {
    fn name(&self) -> &str {
        "rabbitmq"
    }

    async fn connect(&self, inbox: Inbox) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        if state.is_some() {
            return Ok(());
        }

        // Set up the connection properties to use the current Tokio context
        let connection_properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let connection = Connection::connect(self.handle.dsn().unsecure(), connection_properties)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        channel
            .basic_qos(
                self.handle.prefetch_count(),
                BasicQosOptions { global: false },
            )
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        channel
            .exchange_declare(
                self.handle.exchange(),
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        *state = Some(Connected {
            connection,
            channel,
            inbox,
            bindings: HashMap::new(),
        });

        info!(
            name = self.name.as_ref(),
            identifier = self.handle.identifier(),
            exchange = self.handle.exchange(),
            "Connected to RabbitMQ",
        );

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        let Some(connected) = state.take() else {
            return Ok(());
        };

        // Cancel the consumers but leave the queues behind, so their
        // contents survive until the next connect
        for binding in connected.bindings.values() {
            self.cancel_consumer(&connected.channel, binding).await;
            binding.worker.abort();
        }

        self.close(&connected).await;

        info!(
            name = self.name.as_ref(),
            identifier = self.handle.identifier(),
            "Disconnected from RabbitMQ (queues preserved)",
        );

        Ok(())
    }

    async fn teardown(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        let Some(connected) = state.take() else {
            return Ok(());
        };

        for (pattern, binding) in &connected.bindings {
            self.cancel_consumer(&connected.channel, binding).await;
            binding.worker.abort();

            let result = connected
                .channel
                .queue_delete(
                    &binding.queue,
                    QueueDeleteOptions {
                        if_unused: true,
                        if_empty: true,
                        ..QueueDeleteOptions::default()
                    },
                )
                .await;

            if let Err(error) = result {
                warn!(
                    name = self.name.as_ref(),
                    pattern = pattern.as_str(),
                    queue = binding.queue.as_str(),
                    ?error,
                    error_message = %error,
                    "Failed to delete a RabbitMQ queue",
                );
            }
        }

        self.close(&connected).await;

        info!(
            name = self.name.as_ref(),
            identifier = self.handle.identifier(),
            "Disconnected from RabbitMQ (queues deleted)",
        );

        Ok(())
    }

    async fn publish_raw(&self, channel: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let state = self.state.lock().await;

        let Some(connected) = state.as_ref() else {
            return Err(TransportError::NotConnected);
        };

        let routing_key = naming::routing_key(channel);

        let properties = BasicProperties::default()
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_content_type(CONTENT_TYPE_JSON.into());

        connected
            .channel
            .basic_publish(
                self.handle.exchange(),
                &routing_key,
                BasicPublishOptions::default(),
                bytes,
                properties,
            )
            .await
            .map_err(|error| TransportError::Publish {
                channel: channel.to_owned(),
                error: error.to_string(),
            })?;

        debug!(
            name = self.name.as_ref(),
            routing_key = routing_key.as_str(),
            "Published message to RabbitMQ",
        );

        Ok(())
    }

    async fn subscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        let Some(connected) = state.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        if connected.bindings.contains_key(pattern) {
            return Ok(());
        }

        let subscribe_error = |error: lapin::Error| TransportError::Subscribe {
            pattern: pattern.as_str().to_owned(),
            error: error.to_string(),
        };

        // A deterministic queue name lets a reconnecting router find the
        // same durable queue again
        let queue = naming::queue_name(pattern.as_str());

        connected
            .channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_error)?;

        let binding_key = naming::binding_key(pattern.as_str());

        connected
            .channel
            .queue_bind(
                &queue,
                self.handle.exchange(),
                &binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_error)?;

        let consumer_tag = Self::compose_consumer_tag(&queue);

        let consumer = connected
            .channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_error)?;

        let worker = tokio::spawn(Self::consume(
            Arc::clone(&self.name),
            consumer,
            connected.inbox.clone(),
            Arc::clone(&self.dedup),
        ));

        connected.bindings.insert(
            pattern.clone(),
            Binding {
                queue: queue.clone(),
                consumer_tag,
                worker,
            },
        );

        debug!(
            name = self.name.as_ref(),
            pattern = pattern.as_str(),
            binding_key = binding_key.as_str(),
            queue = queue.as_str(),
            "Subscribed to RabbitMQ pattern",
        );

        Ok(())
    }

    async fn unsubscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        let Some(connected) = state.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let Some(binding) = connected.bindings.remove(pattern) else {
            return Ok(());
        };

        let unsubscribe_error = |error: lapin::Error| TransportError::Unsubscribe {
            pattern: pattern.as_str().to_owned(),
            error: error.to_string(),
        };

        connected
            .channel
            .basic_cancel(&binding.consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(unsubscribe_error)?;

        binding.worker.abort();

        connected
            .channel
            .queue_delete(
                &binding.queue,
                QueueDeleteOptions {
                    if_unused: true,
                    if_empty: true,
                    ..QueueDeleteOptions::default()
                },
            )
            .await
            .map_err(unsubscribe_error)?;

        debug!(
            name = self.name.as_ref(),
            pattern = pattern.as_str(),
            queue = binding.queue.as_str(),
            "Unsubscribed from RabbitMQ pattern",
        );

        Ok(())
    }
}
