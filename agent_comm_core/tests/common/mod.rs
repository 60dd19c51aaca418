#![allow(dead_code)]

use agent_comm_core::{
    Agent, AnyMessage, Backend, Channel, ChannelPattern, DeduplicationWindow, HandlerError, Inbox,
    Message, MessageKind, TransportError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMessage {
    pub content: String,
}

impl Message for SampleMessage {
    fn type_name() -> &'static str {
        "SampleMessage"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub data: String,
}

impl Message for BroadcastMessage {
    fn type_name() -> &'static str {
        "BroadcastMessage"
    }
}

/// An in-memory backend that loops published payloads back through the
/// subscribed patterns, the way a broker fans a message out to every
/// matching subscription, with the adapter-side de-duplication window in
/// between. Records every raw call for assertions.
#[derive(Clone, Default)]
pub struct LoopbackBackend {
    shared: Arc<LoopbackState>,
}

#[derive(Default)]
pub struct LoopbackState {
    inbox: Mutex<Option<Inbox>>,
    dedup: DeduplicationWindow,
    active: Mutex<HashSet<String>>,
    pub connects: AtomicUsize,
    pub teardowns: AtomicUsize,
    pub subscribes: Mutex<Vec<String>>,
    pub unsubscribes: Mutex<Vec<String>>,
    pub publishes: Mutex<Vec<(String, Vec<u8>)>>,
    pub deliveries: AtomicUsize,
    pub delivery_errors: Mutex<Vec<String>>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LoopbackState {
        &self.shared
    }

    pub fn subscribe_count(&self, pattern: &str) -> usize {
        self.shared
            .subscribes
            .lock()
            .iter()
            .filter(|recorded| recorded.as_str() == pattern)
            .count()
    }

    pub fn unsubscribe_count(&self, pattern: &str) -> usize {
        self.shared
            .unsubscribes
            .lock()
            .iter()
            .filter(|recorded| recorded.as_str() == pattern)
            .count()
    }

    pub fn publish_count(&self) -> usize {
        self.shared.publishes.lock().len()
    }

    pub fn delivery_count(&self) -> usize {
        self.shared.deliveries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for LoopbackBackend {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn connect(&self, inbox: Inbox) -> Result<(), TransportError> {
        *self.shared.inbox.lock() = Some(inbox);
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *self.shared.inbox.lock() = None;
        self.shared.active.lock().clear();
        self.shared.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish_raw(&self, channel: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.shared
            .publishes
            .lock()
            .push((channel.to_owned(), bytes.to_vec()));

        let inbox = self.shared.inbox.lock().clone();
        let Some(inbox) = inbox else {
            return Err(TransportError::NotConnected);
        };

        // One candidate delivery per matching active pattern, collapsed by
        // the de-duplication window, exactly like a broker-side fan-out
        let matching: Vec<String> = self
            .shared
            .active
            .lock()
            .iter()
            .filter(|pattern| ChannelPattern::new(pattern.as_str()).matches(channel))
            .cloned()
            .collect();

        for _pattern in matching {
            if !self.shared.dedup.admit(channel, bytes) {
                continue;
            }

            self.shared.deliveries.fetch_add(1, Ordering::SeqCst);

            if let Err(error) = inbox.deliver(channel, bytes).await {
                self.shared.delivery_errors.lock().push(error.to_string());
            }
        }

        Ok(())
    }

    async fn subscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError> {
        self.shared.subscribes.lock().push(pattern.as_str().to_owned());
        self.shared.active.lock().insert(pattern.as_str().to_owned());
        Ok(())
    }

    async fn unsubscribe_raw(&self, pattern: &ChannelPattern) -> Result<(), TransportError> {
        self.shared
            .unsubscribes
            .lock()
            .push(pattern.as_str().to_owned());
        self.shared.active.lock().remove(pattern.as_str());
        Ok(())
    }
}

/// An agent that records everything it receives.
pub struct Probe {
    incoming: Vec<MessageKind>,
    outgoing: Vec<MessageKind>,
    received: Mutex<Vec<(AnyMessage, Channel)>>,
}

impl Probe {
    pub fn new(incoming: Vec<MessageKind>, outgoing: Vec<MessageKind>) -> Arc<Self> {
        Arc::new(Self {
            incoming,
            outgoing,
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn receiving<T: Message>() -> Arc<Self> {
        Self::new(vec![MessageKind::of::<T>()], Vec::new())
    }

    pub fn received(&self) -> Vec<(AnyMessage, Channel)> {
        self.received.lock().clone()
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }

    /// The `content` fields of all received [`SampleMessage`]s.
    pub fn contents(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|(message, _)| {
                message
                    .downcast_ref::<SampleMessage>()
                    .map(|sample| sample.content.clone())
            })
            .collect()
    }
}

#[async_trait]
impl Agent for Probe {
    fn incoming(&self) -> &[MessageKind] {
        &self.incoming
    }

    fn outgoing(&self) -> &[MessageKind] {
        &self.outgoing
    }

    async fn handle(&self, message: AnyMessage, context: Channel) -> Result<(), HandlerError> {
        self.received.lock().push((message, context));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Probe"
    }
}

/// An agent whose handler always fails, for error-isolation tests.
pub struct Grumpy {
    incoming: Vec<MessageKind>,
}

impl Grumpy {
    pub fn receiving<T: Message>() -> Arc<Self> {
        Arc::new(Self {
            incoming: vec![MessageKind::of::<T>()],
        })
    }
}

#[async_trait]
impl Agent for Grumpy {
    fn incoming(&self) -> &[MessageKind] {
        &self.incoming
    }

    fn outgoing(&self) -> &[MessageKind] {
        &[]
    }

    async fn handle(&self, _: AnyMessage, _: Channel) -> Result<(), HandlerError> {
        Err("handler failed on purpose".into())
    }

    fn name(&self) -> &'static str {
        "Grumpy"
    }
}
