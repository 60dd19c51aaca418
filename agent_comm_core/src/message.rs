use crate::codec::CodecError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// The contract of a typed message.
///
/// A message is an immutable, serialisable record with a declared
/// [`type_name`](Message::type_name) that is stable across processes: the
/// name travels on the wire (under the reserved [`TYPE_FIELD`](crate::TYPE_FIELD)
/// member) and is the only in-band mechanism for recovering the concrete
/// type on the receiving side.
///
/// ```rust
/// use agent_comm_core::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct SampleMessage {
///     content: String,
/// }
///
/// impl Message for SampleMessage {
///     fn type_name() -> &'static str {
///         "SampleMessage"
///     }
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The declared name of this message type.
    ///
    /// Conventionally the bare type name. Must be stable across processes
    /// and unique within an application.
    fn type_name() -> &'static str;

    /// Composes the channel (or channel pattern, when wildcard arguments are
    /// passed) for this message type:
    /// `<type_name>:<direction>:<session_id>`.
    fn channel_pattern(direction: &str, session_id: &str) -> String {
        format!("{}:{}:{}", Self::type_name(), direction, session_id)
    }
}

/// Object-safe surface of [`Message`], implemented for every message type.
pub(crate) trait ErasedMessage: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn channel_pattern(&self, direction: &str, session_id: &str) -> String;

    fn body(&self) -> Result<serde_json::Map<String, serde_json::Value>, CodecError>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Message> ErasedMessage for T {
    fn type_name(&self) -> &'static str {
        T::type_name()
    }

    fn channel_pattern(&self, direction: &str, session_id: &str) -> String {
        T::channel_pattern(direction, session_id)
    }

    fn body(&self) -> Result<serde_json::Map<String, serde_json::Value>, CodecError> {
        let value = serde_json::to_value(self).map_err(|error| CodecError::Serialization {
            type_name: T::type_name(),
            error: error.to_string(),
        })?;

        match value {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(CodecError::NonObjectBody {
                type_name: T::type_name(),
            }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased, cheaply clonable message value.
///
/// This is the form in which messages travel through the router core: the
/// concrete type is recovered on demand via [`downcast_ref`](AnyMessage::downcast_ref),
/// typically inside an agent handler.
#[derive(Clone)]
pub struct AnyMessage {
    inner: Arc<dyn ErasedMessage>,
    type_id: TypeId,
}

impl AnyMessage {
    /// Erases the given typed message.
    pub fn new<T: Message>(message: T) -> Self {
        Self {
            inner: Arc::new(message),
            type_id: TypeId::of::<T>(),
        }
    }

    /// Reports the declared type name of the carried message.
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }

    /// Reports whether the carried message is of type `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrows the carried message as `T`, or `None` if it is of a different
    /// type.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Composes the channel (or pattern) for the carried message type.
    pub fn channel_pattern(&self, direction: &str, session_id: &str) -> String {
        self.inner.channel_pattern(direction, session_id)
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub(crate) fn body(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, CodecError> {
        self.inner.body()
    }
}

impl<T: Message> From<T> for AnyMessage {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl Debug for AnyMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyMessage")
            .field("type_name", &self.type_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SampleMessage {
        content: String,
    }

    impl Message for SampleMessage {
        fn type_name() -> &'static str {
            "SampleMessage"
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OtherMessage {
        data: u32,
    }

    impl Message for OtherMessage {
        fn type_name() -> &'static str {
            "OtherMessage"
        }
    }

    #[test]
    fn default_channel_pattern_uses_type_name() {
        assert_eq!(
            "SampleMessage:request:session1",
            <SampleMessage as Message>::channel_pattern("request", "session1"),
        );
        assert_eq!(
            "SampleMessage:*:*",
            <SampleMessage as Message>::channel_pattern("*", "*")
        );
    }

    #[test]
    fn erased_message_downcasts() {
        // Given
        let message = AnyMessage::new(SampleMessage {
            content: "Hello".into(),
        });

        // Then
        assert_eq!("SampleMessage", message.type_name());
        assert!(message.is::<SampleMessage>());
        assert!(!message.is::<OtherMessage>());
        assert_eq!(
            "Hello",
            message.downcast_ref::<SampleMessage>().unwrap().content,
        );
        assert!(message.downcast_ref::<OtherMessage>().is_none());
    }

    #[test]
    fn body_reflects_fields() {
        // Given
        let message = AnyMessage::new(SampleMessage {
            content: "x".into(),
        });

        // When
        let body = message.body().unwrap();

        // Then
        assert_eq!(
            serde_json::Value::String("x".into()),
            body["content"],
        );
    }
}
