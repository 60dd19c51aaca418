//! Translation between abstract channel names and AMQP-native ones.
//!
//! Abstract channels separate segments with `:`; AMQP routing keys use `.`.
//! The abstract wildcard `*` means "any single segment or beyond", which
//! maps onto the AMQP multi-segment wildcard `#` (the AMQP-native `*` would
//! match exactly one word, which is narrower than the abstract contract).

/// The fixed prefix of every queue this backend declares.
const QUEUE_PREFIX: &str = "agent_communication";

/// Converts an abstract channel name into an AMQP routing key.
pub(crate) fn routing_key(channel: &str) -> String {
    channel.replace(':', ".")
}

/// Converts an AMQP routing key back into an abstract channel name.
pub(crate) fn channel_name(routing_key: &str) -> String {
    routing_key.replace('.', ":")
}

/// Converts an abstract subscription pattern into an AMQP binding key.
pub(crate) fn binding_key(pattern: &str) -> String {
    routing_key(pattern).replace('*', "#")
}

/// Derives the deterministic queue name for a subscription pattern:
/// a sanitised form of the pattern plus a short hash of the original
/// pattern.
///
/// Determinism is what lets a reconnecting router find its durable queue
/// again; the hash disambiguates patterns that sanitise to the same string.
pub(crate) fn queue_name(pattern: &str) -> String {
    let sanitized = pattern.replace(':', ".").replace('*', "star");

    format!("{}.{}.{:08x}", QUEUE_PREFIX, sanitized, pattern_hash(pattern))
}

/// A stable (fixed-seed), non-cryptographic 32-bit hash of the pattern.
fn pattern_hash(pattern: &str) -> u32 {
    const SEEDS: (u64, u64, u64, u64) = (
        0x6167656e_745f636f,
        0x6d6d756e_69636174,
        0x696f6e5f_71756575,
        0x655f6e61_6d655f76,
    );

    let state = ahash::RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3);

    state.hash_one(pattern) as u32
}
