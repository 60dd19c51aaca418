use crate::channel::Channel;
use crate::message::AnyMessage;
use crate::pattern::ChannelPattern;
use crate::registry::MessageKind;
use crate::router::{Router, RouterError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The error type agent handlers may fail with.
///
/// Handler failures are caught and logged by the router; they never abort
/// sibling dispatches or subsequent deliveries.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The contract of an agent participating in message exchange.
///
/// An agent declares the message kinds it is able to
/// [receive](Agent::incoming) and allowed to [send](Agent::outgoing), and
/// processes deliveries in [`handle`](Agent::handle). The delivery context is
/// the parsed [`Channel`] the message arrived on.
///
/// Handlers for a single incoming message run concurrently across agents,
/// each in its own task; a handler must not assume the subscription topology
/// is stable across one of its own suspension points.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// The message kinds this agent is able to receive.
    fn incoming(&self) -> &[MessageKind];

    /// The message kinds this agent is allowed to send.
    fn outgoing(&self) -> &[MessageKind];

    /// Processes a single delivered message.
    async fn handle(&self, message: AnyMessage, context: Channel) -> Result<(), HandlerError>;

    /// A human-readable name for this agent, used in log events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Reports whether this agent declares the kind of the given message as
    /// incoming.
    fn validate_incoming(&self, message: &AnyMessage) -> bool {
        self.incoming().iter().any(|kind| kind.matches(message))
    }

    /// Reports whether this agent declares the kind of the given message as
    /// outgoing.
    fn validate_outgoing(&self, message: &AnyMessage) -> bool {
        self.outgoing().iter().any(|kind| kind.matches(message))
    }
}

/// The state shared by all clones of one [`AgentHandle`].
struct AgentCell {
    agent: Arc<dyn Agent>,
    router: Mutex<Option<Router>>,
    auto_subscribed: AtomicBool,
}

/// An identity-bearing, cheaply clonable handle around an [`Agent`].
///
/// The handle is what the router tracks in its subscription table: two
/// clones of the same handle are the same subscriber, two handles wrapping
/// the same agent value independently are not.
///
/// The handle also carries the agent façade: an optional bound [`Router`]
/// plus convenience wrappers that validate outgoing messages and translate
/// agent-initiated operations into router calls. An agent outlives any
/// router it is bound to and may be re-bound to another router at any time.
#[derive(Clone)]
pub struct AgentHandle {
    cell: Arc<AgentCell>,
}

impl AgentHandle {
    /// Wraps the given agent.
    pub fn new(agent: impl Agent) -> Self {
        Self::from_arc(Arc::new(agent))
    }

    /// Wraps the given shared agent.
    pub fn from_arc(agent: Arc<dyn Agent>) -> Self {
        Self {
            cell: Arc::new(AgentCell {
                agent,
                router: Mutex::new(None),
                auto_subscribed: AtomicBool::new(false),
            }),
        }
    }

    /// Borrows the wrapped agent.
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.cell.agent
    }

    /// Reports the name of the wrapped agent.
    pub fn name(&self) -> &str {
        self.cell.agent.name()
    }

    /// Reports whether this agent is currently auto-subscribed.
    pub fn is_auto_subscribed(&self) -> bool {
        self.cell.auto_subscribed.load(Ordering::Relaxed)
    }
}

impl AgentHandle {
    /// Binds this agent to the given router.
    ///
    /// Binding does not subscribe; call [`subscribe`](AgentHandle::subscribe)
    /// or [`subscribe_to`](AgentHandle::subscribe_to) afterwards.
    pub fn bind(&self, router: &Router) {
        *self.cell.router.lock() = Some(router.clone());
    }

    /// Unbinds this agent from its router, if any.
    ///
    /// Existing subscriptions on the router are left untouched.
    pub fn unbind(&self) {
        *self.cell.router.lock() = None;
    }

    /// Reports the currently bound router, if any.
    pub fn router(&self) -> Option<Router> {
        self.cell.router.lock().clone()
    }

    /// Reports the bound router, or fails with
    /// [`UnboundAgent`](RouterError::UnboundAgent).
    fn bound_router(&self) -> Result<Router, RouterError> {
        self.router().ok_or_else(|| RouterError::UnboundAgent {
            agent: self.name().to_owned(),
        })
    }
}

impl AgentHandle {
    /// Auto-subscribes this agent on the bound router: one
    /// `MessageClass:*:*` pattern per declared incoming kind.
    pub async fn subscribe(&self) -> Result<(), RouterError> {
        let router = self.bound_router()?;

        router.auto_subscribe(self).await?;
        self.cell.auto_subscribed.store(true, Ordering::Relaxed);

        Ok(())
    }

    /// Subscribes this agent to the given specific pattern on the bound
    /// router.
    pub async fn subscribe_to(
        &self,
        pattern: impl Into<ChannelPattern>,
    ) -> Result<(), RouterError> {
        let router = self.bound_router()?;

        router.subscribe(self, pattern).await
    }

    /// Unsubscribes this agent from all patterns on the bound router and
    /// clears the auto-subscribed flag.
    pub async fn unsubscribe(&self) -> Result<(), RouterError> {
        let router = self.bound_router()?;

        router.unsubscribe(self, None).await?;
        self.cell.auto_subscribed.store(false, Ordering::Relaxed);

        Ok(())
    }

    /// Unsubscribes this agent from the given specific pattern on the bound
    /// router.
    pub async fn unsubscribe_from(
        &self,
        pattern: impl Into<ChannelPattern>,
    ) -> Result<(), RouterError> {
        let router = self.bound_router()?;

        router.unsubscribe(self, Some(&pattern.into())).await
    }

    /// Publishes the given message on the given channel through the bound
    /// router.
    ///
    /// Fails with [`DisallowedOutgoingType`](RouterError::DisallowedOutgoingType)
    /// before touching the backend when the message kind is not in this
    /// agent's outgoing set.
    pub async fn publish(
        &self,
        message: impl Into<AnyMessage>,
        channel: &Channel,
    ) -> Result<(), RouterError> {
        let router = self.bound_router()?;
        let message = message.into();

        self.validate_outgoing(&message)?;

        router.publish(message, channel).await
    }

    /// Broadcasts the given message through the bound router, deriving the
    /// channel from the message's own channel pattern.
    ///
    /// Performs the same outgoing validation as
    /// [`publish`](AgentHandle::publish).
    pub async fn broadcast(
        &self,
        message: impl Into<AnyMessage>,
        direction: &str,
        session_id: &str,
    ) -> Result<(), RouterError> {
        let router = self.bound_router()?;
        let message = message.into();

        self.validate_outgoing(&message)?;

        router.broadcast(message, direction, session_id).await
    }

    fn validate_outgoing(&self, message: &AnyMessage) -> Result<(), RouterError> {
        if self.cell.agent.validate_outgoing(message) {
            Ok(())
        } else {
            Err(RouterError::DisallowedOutgoingType {
                agent: self.name().to_owned(),
                type_name: message.type_name(),
            })
        }
    }
}

/// Handle identity: two handles are equal iff they are clones of one
/// original.
impl PartialEq for AgentHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for AgentHandle {}

impl Hash for AgentHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Arc::as_ptr(&self.cell) as *const () as usize);
    }
}

impl Debug for AgentHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("agent", &self.name())
            .field("auto_subscribed", &self.is_auto_subscribed())
            .finish()
    }
}
