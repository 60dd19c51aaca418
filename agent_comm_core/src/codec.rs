use crate::message::AnyMessage;
use crate::registry::TypeRegistry;
use thiserror::Error;

/// The reserved payload member that carries the declared message type name.
pub const TYPE_FIELD: &str = "__type__";

/// The maximum number of payload bytes included in error diagnostics.
const PAYLOAD_PREVIEW_LIMIT: usize = 200;

/// Represents the failure modes of encoding and decoding typed messages.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The payload is not a JSON object.
    #[error("message payload is not a JSON object ({error}); payload was: {preview}")]
    MalformedPayload {
        /// The underlying parse error.
        error: String,
        /// A truncated preview of the offending payload.
        preview: String,
    },

    /// The payload carries no `__type__` member.
    #[error("message payload is missing the '__type__' member; payload was: {preview}")]
    MissingTypeField {
        /// A truncated preview of the offending payload.
        preview: String,
    },

    /// The named message type is not present in the registry.
    #[error(
        "message class '{type_name}' not found in registry; available classes: [{available}]; \
         did you forget to register an agent that handles this message type?"
    )]
    MessageClassNotRegistered {
        /// The unknown declared type name.
        type_name: String,
        /// The comma-separated declared names the registry does know.
        available: String,
    },

    /// The payload body does not satisfy the schema of the named type.
    #[error("failed to deserialize {type_name}: {error}; payload was: {preview}")]
    MessageValidationError {
        /// The declared type name the body was decoded against.
        type_name: String,
        /// The underlying validation error.
        error: String,
        /// A truncated preview of the offending payload.
        preview: String,
    },

    /// The message could not be serialised.
    #[error("failed to serialize {type_name}: {error}")]
    Serialization {
        /// The declared type name of the message.
        type_name: &'static str,
        /// The underlying serialisation error.
        error: String,
    },

    /// The message serialises to something other than a JSON object.
    #[error("message type {type_name} does not serialize to a JSON object")]
    NonObjectBody {
        /// The declared type name of the message.
        type_name: &'static str,
    },
}

/// Serialises the given message into a self-describing UTF-8 JSON payload:
/// the message body plus the reserved [`TYPE_FIELD`] member naming the
/// concrete type.
pub fn encode(message: &AnyMessage) -> Result<Vec<u8>, CodecError> {
    let mut body = message.body()?;
    body.insert(
        TYPE_FIELD.to_owned(),
        serde_json::Value::String(message.type_name().to_owned()),
    );

    serde_json::to_vec(&body).map_err(|error| CodecError::Serialization {
        type_name: message.type_name(),
        error: error.to_string(),
    })
}

/// Recovers a typed message from a self-describing payload.
///
/// Parses the JSON, extracts and removes the [`TYPE_FIELD`] member, looks the
/// named type up in the given registry and constructs a validated instance
/// from the remaining members.
pub fn decode(bytes: &[u8], registry: &TypeRegistry) -> Result<AnyMessage, CodecError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|error| CodecError::MalformedPayload {
            error: error.to_string(),
            preview: preview(bytes),
        })?;

    let serde_json::Value::Object(mut body) = value else {
        return Err(CodecError::MalformedPayload {
            error: "top-level value is not an object".to_owned(),
            preview: preview(bytes),
        });
    };

    let type_name = match body.remove(TYPE_FIELD) {
        Some(serde_json::Value::String(name)) => name,
        _ => {
            return Err(CodecError::MissingTypeField {
                preview: preview(bytes),
            });
        }
    };

    let kind = registry
        .get(&type_name)
        .ok_or_else(|| CodecError::MessageClassNotRegistered {
            available: registry.known_types().join(", "),
            type_name: type_name.clone(),
        })?;

    kind.decode(body)
        .map_err(|error| CodecError::MessageValidationError {
            type_name,
            error: error.to_string(),
            preview: preview(bytes),
        })
}

/// Renders a lossy, truncated preview of the given payload for diagnostics.
fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);

    if text.len() <= PAYLOAD_PREVIEW_LIMIT {
        return text.into_owned();
    }

    // Cut on a character boundary at or below the byte limit
    let mut cut = PAYLOAD_PREVIEW_LIMIT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}…", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SampleMessage {
        content: String,
    }

    impl Message for SampleMessage {
        fn type_name() -> &'static str {
            "SampleMessage"
        }
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register::<SampleMessage>();
        registry
    }

    #[test]
    fn round_trip() {
        // Given
        let original = SampleMessage {
            content: "Hello".into(),
        };

        // When
        let bytes = encode(&AnyMessage::new(original.clone())).unwrap();
        let decoded = decode(&bytes, &registry()).unwrap();

        // Then
        assert_eq!(&original, decoded.downcast_ref::<SampleMessage>().unwrap());
    }

    #[test]
    fn encoded_payload_carries_type_field() {
        // Given
        let bytes = encode(&AnyMessage::new(SampleMessage {
            content: "x".into(),
        }))
        .unwrap();

        // When
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        // Then
        assert_eq!("SampleMessage", value[TYPE_FIELD]);
        assert_eq!("x", value["content"]);
    }

    #[test]
    fn unknown_type_lists_available_classes() {
        // Given
        let bytes = br#"{"__type__":"UnknownMessage","content":"x"}"#;

        // When
        let error = decode(bytes, &registry()).unwrap_err();

        // Then
        match &error {
            CodecError::MessageClassNotRegistered {
                type_name,
                available,
            } => {
                assert_eq!("UnknownMessage", type_name);
                assert_eq!("SampleMessage", available);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(error.to_string().contains("SampleMessage"));
    }

    #[test]
    fn missing_type_field_is_rejected() {
        // Given
        let bytes = br#"{"content":"x"}"#;

        // When
        let error = decode(bytes, &registry()).unwrap_err();

        // Then
        assert!(matches!(error, CodecError::MissingTypeField { .. }));
    }

    #[test]
    fn invalid_body_reports_validation_error_with_preview() {
        // Given
        let bytes = br#"{"__type__":"SampleMessage","content":42}"#;

        // When
        let error = decode(bytes, &registry()).unwrap_err();

        // Then
        match &error {
            CodecError::MessageValidationError {
                type_name, preview, ..
            } => {
                assert_eq!("SampleMessage", type_name);
                assert!(preview.contains("content"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn gibberish_is_malformed() {
        // When
        let error = decode(b"not json at all", &registry()).unwrap_err();

        // Then
        assert!(matches!(error, CodecError::MalformedPayload { .. }));
    }

    #[test]
    fn preview_is_truncated() {
        // Given
        let long_payload = vec![b'a'; 500];

        // When
        let rendered = preview(&long_payload);

        // Then
        assert!(rendered.chars().count() <= 201);
        assert!(rendered.ends_with('…'));
    }
}
