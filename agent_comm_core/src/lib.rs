#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Exposes the canonical channel name and its grammar.
mod channel;
pub use self::channel::{Channel, InvalidChannelFormat};

/// Exposes the subscription-side channel pattern.
mod pattern;
pub use self::pattern::ChannelPattern;

/// Exposes a standalone pattern-to-pattern routing table.
mod routing;
pub use self::routing::RoutingTable;

/// Exposes the typed message contract and its erased runtime value.
mod message;
pub use self::message::{AnyMessage, Message};

/// Exposes the type registry used to recover concrete message types.
mod registry;
pub use self::registry::{MessageKind, TypeRegistry};

/// Exposes the wire codec for typed messages.
mod codec;
pub use self::codec::{CodecError, TYPE_FIELD, decode, encode};

/// Exposes the agent contract and the agent façade.
mod agent;
pub use self::agent::{Agent, AgentHandle, HandlerError};

/// Exposes the pattern-to-agents subscription table.
mod subscription;
pub use self::subscription::SubscriptionTable;

/// Exposes the sliding-window delivery de-duplicator.
mod dedup;
pub use self::dedup::{DEDUP_WINDOW, DeduplicationWindow};

/// Exposes the backend contract that broker adapters implement.
mod backend;
pub use self::backend::{Backend, TransportError};

/// Exposes the abstract router core.
mod router;
pub use self::router::{Inbox, Router, RouterError};

/// Exposes the opt-in JSON-line tracing bootstrap.
pub mod telemetry;
