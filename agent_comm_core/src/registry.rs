use crate::message::{AnyMessage, Message};
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// The global fallback registry, configured at application start-up.
static GLOBAL: OnceLock<RwLock<TypeRegistry>> = OnceLock::new();

/// A runtime descriptor of a message type.
///
/// Carries the declared type name, the Rust type identity, the class-side
/// channel-pattern composer and a monomorphised decode function, so that the
/// untyped router core can reason about message types without generics.
///
/// Agents declare their incoming and outgoing message sets as slices of
/// kinds, obtained via [`MessageKind::of`].
#[derive(Clone, Copy)]
pub struct MessageKind {
    name: &'static str,
    type_id: TypeId,
    pattern: fn(&str, &str) -> String,
    decode: fn(serde_json::Map<String, serde_json::Value>) -> Result<AnyMessage, serde_json::Error>,
}

impl MessageKind {
    /// The kind descriptor of message type `T`.
    pub fn of<T: Message>() -> Self {
        Self {
            name: T::type_name(),
            type_id: TypeId::of::<T>(),
            pattern: T::channel_pattern,
            decode: decode_into::<T>,
        }
    }

    /// Reports the declared type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Composes the channel pattern of this kind for the given direction and
    /// session arguments.
    pub fn channel_pattern(&self, direction: &str, session_id: &str) -> String {
        (self.pattern)(direction, session_id)
    }

    /// Reports whether the given erased message is of this kind.
    pub fn matches(&self, message: &AnyMessage) -> bool {
        self.type_id == message.type_id()
    }

    pub(crate) fn decode(
        &self,
        body: serde_json::Map<String, serde_json::Value>,
    ) -> Result<AnyMessage, serde_json::Error> {
        (self.decode)(body)
    }
}

/// Deserialises and validates a message body into a `T`, erasing the result.
fn decode_into<T: Message>(
    body: serde_json::Map<String, serde_json::Value>,
) -> Result<AnyMessage, serde_json::Error> {
    serde_json::from_value::<T>(serde_json::Value::Object(body)).map(AnyMessage::new)
}

impl PartialEq for MessageKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for MessageKind {}

impl Hash for MessageKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl Debug for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MessageKind").field(&self.name).finish()
    }
}

/// A mapping from declared type names to [`MessageKind`]s, used by the codec
/// to recover concrete message types at delivery time.
///
/// The router computes the effective registry on demand as the union of the
/// incoming kinds of all currently subscribed agents, the router's own
/// fallback kinds, and the [global](TypeRegistry::register_global) fallback
/// registry.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    kinds: HashMap<&'static str, MessageKind>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers message type `T`.
    pub fn register<T: Message>(&mut self) -> &mut Self {
        self.register_kind(MessageKind::of::<T>())
    }

    /// Registers the given kind descriptor.
    pub fn register_kind(&mut self, kind: MessageKind) -> &mut Self {
        self.kinds.insert(kind.name(), kind);
        self
    }

    /// Merges every kind of `other` into this registry.
    pub fn extend(&mut self, other: &TypeRegistry) -> &mut Self {
        for kind in other.kinds.values() {
            self.register_kind(*kind);
        }
        self
    }

    /// Reports whether a type with the given declared name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Retrieves the kind registered under the given declared name.
    pub fn get(&self, name: &str) -> Option<&MessageKind> {
        self.kinds.get(name)
    }

    /// Reports the declared names of all registered types, sorted.
    pub fn known_types(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.kinds.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Reports whether this registry is empty.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl TypeRegistry {
    /// Registers message type `T` in the global fallback registry.
    ///
    /// The global registry is consulted whenever a delivery names a type
    /// that no currently subscribed agent declares. Populate it at
    /// application start-up for message types that must be decodable
    /// regardless of the subscription topology.
    pub fn register_global<T: Message>() {
        Self::global_lock().write().register::<T>();
    }

    /// Snapshots the global fallback registry.
    pub fn global() -> TypeRegistry {
        Self::global_lock().read().clone()
    }

    fn global_lock() -> &'static RwLock<TypeRegistry> {
        GLOBAL.get_or_init(|| RwLock::new(TypeRegistry::new()))
    }
}
