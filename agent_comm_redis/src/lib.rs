#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Exposes a handle for defining a set of connection credentials.
mod handle;
pub use self::handle::{DsnChunks, Handle};

/// Exposes the Redis Pub/Sub backend.
mod backend;
pub use self::backend::RedisBackend;
