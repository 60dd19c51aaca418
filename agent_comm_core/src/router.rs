use crate::agent::AgentHandle;
use crate::backend::{Backend, TransportError};
use crate::channel::{Channel, InvalidChannelFormat};
use crate::codec::{self, CodecError};
use crate::message::AnyMessage;
use crate::pattern::ChannelPattern;
use crate::registry::TypeRegistry;
use crate::subscription::SubscriptionTable;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The state guarded by the router-wide mutex.
///
/// The subscription table and the running flag are only ever mutated while
/// this lock is held; the backend call gated by a table mutation runs under
/// the same critical section, so that the first subscriber of a pattern
/// triggers exactly one backend subscription and the last unsubscriber
/// exactly one backend unsubscription.
struct RouterState {
    running: bool,
    table: SubscriptionTable,
}

pub(crate) struct RouterInner {
    name: Arc<str>,
    backend: Box<dyn Backend>,
    state: AsyncMutex<RouterState>,
    /// Lock-free mirror of `state.running`, for cheap precondition checks.
    running: AtomicBool,
    /// Kinds decodable regardless of the current subscription topology.
    fallback: TypeRegistry,
}

/// The abstract router core.
///
/// Owns the subscription table, the wire codec and one broker [`Backend`],
/// and exposes the full pub/sub contract: [`start`](Router::start) /
/// [`stop`](Router::stop), [`publish`](Router::publish) /
/// [`broadcast`](Router::broadcast), [`subscribe`](Router::subscribe) /
/// [`unsubscribe`](Router::unsubscribe) /
/// [`auto_subscribe`](Router::auto_subscribe), and the
/// [`deliver_message`](Router::deliver_message) upcall through which the
/// backend surfaces incoming messages.
///
/// A router is cheap to clone; clones share all state. Lifecycle:
/// created cold, `running` after a successful [`start`](Router::start),
/// stopped (with the subscription table cleared) after
/// [`stop`](Router::stop), and restartable thereafter — though subscribers
/// must re-subscribe after a restart.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

/// The delivery sink a [`Backend`] pushes incoming messages into.
///
/// Holds the router weakly: a backend never keeps a dropped router alive,
/// and deliveries that race a router drop are reported as
/// [`RouterError::NotRunning`].
#[derive(Clone)]
pub struct Inbox {
    router: Weak<RouterInner>,
}

/// Represents the failure modes of router operations.
#[derive(Error, Debug)]
pub enum RouterError {
    /// An operation that requires a running router was invoked on a cold or
    /// stopped one.
    #[error("the router is not running (operation '{operation}'); call start() first")]
    NotRunning {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// An agent façade operation was invoked without a bound router.
    #[error("agent '{agent}' is not bound to a router")]
    UnboundAgent {
        /// The agent that attempted the operation.
        agent: String,
    },

    /// An agent attempted to send a message type outside its outgoing set.
    #[error("agent '{agent}' is not allowed to send messages of type '{type_name}'")]
    DisallowedOutgoingType {
        /// The agent that attempted the publication.
        agent: String,
        /// The declared name of the disallowed message type.
        type_name: &'static str,
    },

    /// A broadcast was attempted with a wildcard direction or session, which
    /// would produce a nonsensical channel on the wire.
    #[error(
        "broadcast requires a concrete direction and session, got direction '{direction}' \
         and session '{session_id}'"
    )]
    WildcardBroadcast {
        /// The direction argument as given.
        direction: String,
        /// The session argument as given.
        session_id: String,
    },

    /// A channel failed to parse.
    #[error(transparent)]
    Channel(#[from] InvalidChannelFormat),

    /// A message failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The backend reported a broker I/O failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Router {
    /// Creates a cold router over the given backend.
    pub fn new(backend: impl Backend) -> Self {
        Self::with_fallback(backend, TypeRegistry::new())
    }

    /// Creates a cold router over the given backend, with an explicit
    /// fallback registry of message kinds that must stay decodable even when
    /// no subscribed agent declares them.
    pub fn with_fallback(backend: impl Backend, fallback: TypeRegistry) -> Self {
        let name = Self::compose_name(&backend);

        Self {
            inner: Arc::new(RouterInner {
                name,
                backend: Box::new(backend),
                state: AsyncMutex::new(RouterState {
                    running: false,
                    table: SubscriptionTable::new(),
                }),
                running: AtomicBool::new(false),
                fallback,
            }),
        }
    }

    /// Composes a globally unique, human-readable name for this router.
    fn compose_name(backend: &impl Backend) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "router:{}:{}",
            backend.name(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }
}

impl Router {
    /// Reports the name of this router.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Reports whether this router is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

impl Router {
    /// Connects the backend and marks the router running.
    ///
    /// Idempotent: a second call while running is a no-op. A connection
    /// failure surfaces to the caller and leaves the router cold.
    pub async fn start(&self) -> Result<(), RouterError> {
        let mut state = self.inner.state.lock().await;

        if state.running {
            return Ok(());
        }

        let inbox = Inbox {
            router: Arc::downgrade(&self.inner),
        };
        self.inner.backend.connect(inbox).await?;

        state.running = true;
        self.inner.running.store(true, Ordering::Release);

        info!(router = self.name(), "Router started");

        Ok(())
    }

    /// Marks the router stopped, clears the subscription state and tears the
    /// backend down.
    ///
    /// Idempotent. Teardown errors are logged and swallowed; `stop` never
    /// fails.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().await;

            if !state.running {
                return;
            }

            state.running = false;
            self.inner.running.store(false, Ordering::Release);
            state.table.clear();
        }

        // Teardown happens outside the state lock: late deliveries racing
        // the shutdown are turned away by the cleared running flag
        if let Err(error) = self.inner.backend.teardown().await {
            warn!(
                router = self.name(),
                ?error,
                error_message = %error,
                "Error during backend teardown",
            );
        }

        info!(router = self.name(), "Router stopped");
    }

    /// Encodes the given message and publishes it on the given channel.
    ///
    /// Publication is blind to local subscribers: the subscription table is
    /// not consulted, and the call completes once the broker has accepted
    /// the payload.
    pub async fn publish(
        &self,
        message: impl Into<AnyMessage>,
        channel: &Channel,
    ) -> Result<(), RouterError> {
        self.ensure_running("publish")?;

        let message = message.into();
        let bytes = codec::encode(&message)?;

        self.inner
            .backend
            .publish_raw(&channel.to_string(), &bytes)
            .await?;

        debug!(
            router = self.name(),
            channel = %channel,
            message_class = message.type_name(),
            "Published message",
        );

        Ok(())
    }

    /// Publishes the given message on the channel derived from its own
    /// channel pattern and the given direction and session.
    ///
    /// Both arguments must be concrete: a wildcard in either position is a
    /// precondition violation, not a pattern publication.
    pub async fn broadcast(
        &self,
        message: impl Into<AnyMessage>,
        direction: &str,
        session_id: &str,
    ) -> Result<(), RouterError> {
        self.ensure_running("broadcast")?;

        if direction.contains('*') || session_id.contains('*') {
            return Err(RouterError::WildcardBroadcast {
                direction: direction.to_owned(),
                session_id: session_id.to_owned(),
            });
        }

        let message = message.into();
        let channel = Channel::parse(message.channel_pattern(direction, session_id))?;

        self.publish(message, &channel).await
    }

    /// Subscribes the given agent to the given channel pattern.
    ///
    /// The first subscription of a new pattern issues exactly one backend
    /// subscription before returning; a backend failure rolls the table
    /// entry back.
    pub async fn subscribe(
        &self,
        agent: &AgentHandle,
        pattern: impl Into<ChannelPattern>,
    ) -> Result<(), RouterError> {
        let pattern = pattern.into();
        let mut state = self.inner.state.lock().await;

        if !state.running {
            return Err(RouterError::NotRunning {
                operation: "subscribe",
            });
        }

        if state.table.insert(agent, &pattern) {
            if let Err(error) = self.inner.backend.subscribe_raw(&pattern).await {
                state.table.remove(agent, Some(&pattern));
                return Err(error.into());
            }
        }

        info!(
            router = self.name(),
            agent = agent.name(),
            pattern = %pattern,
            "Agent subscribed",
        );

        Ok(())
    }

    /// Unsubscribes the given agent from the given pattern, or from all of
    /// its patterns when `pattern` is `None`.
    ///
    /// A pattern that loses its last subscriber is removed and triggers
    /// exactly one backend unsubscription.
    pub async fn unsubscribe(
        &self,
        agent: &AgentHandle,
        pattern: Option<&ChannelPattern>,
    ) -> Result<(), RouterError> {
        let mut state = self.inner.state.lock().await;

        if !state.running {
            return Err(RouterError::NotRunning {
                operation: "unsubscribe",
            });
        }

        let released = state.table.remove(agent, pattern);

        for pattern in &released {
            self.inner.backend.unsubscribe_raw(pattern).await?;
        }

        info!(
            router = self.name(),
            agent = agent.name(),
            pattern = pattern.map(ChannelPattern::as_str).unwrap_or("<all>"),
            "Agent unsubscribed",
        );

        Ok(())
    }

    /// Subscribes the given agent to the broadcast pattern of every message
    /// kind in its incoming set.
    ///
    /// Idempotent: re-invocation creates no duplicate backend
    /// subscriptions.
    pub async fn auto_subscribe(&self, agent: &AgentHandle) -> Result<(), RouterError> {
        let kinds: Vec<_> = agent.agent().incoming().to_vec();

        for kind in kinds {
            let pattern = ChannelPattern::new(kind.channel_pattern("*", "*"));
            self.subscribe(agent, pattern).await?;
        }

        Ok(())
    }
}

impl Router {
    /// Delivers an incoming payload to all eligible subscribed agents.
    ///
    /// Invoked by the backend, once per logical message (the backend's
    /// de-duplicator has already collapsed pattern-overlap duplicates).
    /// Decodes the payload against the currently reachable type registry,
    /// parses the channel into the delivery context, snapshots the
    /// subscription table, and dispatches to every agent whose patterns
    /// match and whose incoming set admits the message — each dispatch in
    /// its own task, so a suspended handler cannot starve its siblings.
    /// Handler failures are logged and isolated.
    ///
    /// Decode and parse failures surface to the backend, which decides the
    /// broker-side consequence (the AMQP adapter nacks, the P/S adapter
    /// logs and drops).
    pub async fn deliver_message(&self, channel: &str, bytes: &[u8]) -> Result<(), RouterError> {
        if !self.is_running() {
            debug!(
                router = self.name(),
                channel,
                "Dropped a delivery on a stopped router",
            );
            return Ok(());
        }

        // Snapshot the table and the reachable registry under the lock;
        // everything after this block runs outside it
        let (snapshot, registry) = {
            let state = self.inner.state.lock().await;

            let mut registry = state.table.registry();
            registry.extend(&self.inner.fallback);
            registry.extend(&TypeRegistry::global());

            (state.table.snapshot(), registry)
        };

        let message = codec::decode(bytes, &registry)?;
        let context = Channel::parse(channel)?;

        let mut notified: HashSet<AgentHandle> = HashSet::new();
        for (pattern, agents) in &snapshot {
            if pattern.matches(channel) {
                notified.extend(agents.iter().cloned());
            }
        }

        let dispatches: Vec<JoinHandle<()>> = notified
            .into_iter()
            .filter(|agent| agent.agent().validate_incoming(&message))
            .map(|agent| self.dispatch(agent, message.clone(), context.clone()))
            .collect();

        for dispatch in dispatches {
            if let Err(error) = dispatch.await {
                error!(
                    router = self.name(),
                    channel,
                    ?error,
                    "A handler dispatch task failed",
                );
            }
        }

        Ok(())
    }

    /// Spawns a single handler dispatch as an independent task.
    fn dispatch(&self, agent: AgentHandle, message: AnyMessage, context: Channel) -> JoinHandle<()> {
        let router = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let result = agent.agent().handle(message.clone(), context.clone()).await;

            match result {
                Ok(()) => debug!(
                    router = router.name.as_ref(),
                    agent = agent.name(),
                    channel = %context,
                    message_class = message.type_name(),
                    "Delivered message",
                ),
                Err(error) => error!(
                    router = router.name.as_ref(),
                    agent = agent.name(),
                    channel = %context,
                    message_class = message.type_name(),
                    error_message = %error,
                    "Error delivering message to agent",
                ),
            }
        })
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), RouterError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(RouterError::NotRunning { operation })
        }
    }
}

impl Inbox {
    /// Pushes one incoming delivery into the router core.
    ///
    /// Returns the `deliver_message` outcome, or
    /// [`RouterError::NotRunning`] when the router is gone.
    pub async fn deliver(&self, channel: &str, bytes: &[u8]) -> Result<(), RouterError> {
        match self.router.upgrade() {
            Some(inner) => Router { inner }.deliver_message(channel, bytes).await,
            None => Err(RouterError::NotRunning {
                operation: "deliver",
            }),
        }
    }
}

impl Debug for Router {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name())
            .field("backend", &self.inner.backend.name())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Debug for Inbox {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox").finish_non_exhaustive()
    }
}
