use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

/// The sliding window over which identical `(channel, payload)` pairs are
/// suppressed.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// A sliding-window de-duplicator for incoming deliveries.
///
/// A single broker message can surface multiple times when it matches
/// several active subscription patterns — a pattern subscription plus an
/// exact one on the P/S side, or several bound queues on the AMQP side. Each
/// backend adapter consults its own window before handing a delivery to the
/// router core, so that `deliver_message` sees every logical message exactly
/// once.
///
/// Entries are keyed on the exact `(channel, payload bytes)` pair. Two
/// semantically equal payloads that serialise with different member order
/// count as distinct keys, and a payload legitimately re-sent within the
/// window is suppressed; both are accepted limitations of byte-level keying.
///
/// Expired entries are evicted opportunistically on every
/// [`admit`](DeduplicationWindow::admit) call.
#[derive(Debug)]
pub struct DeduplicationWindow {
    window: Duration,
    seen: Mutex<HashMap<(String, Vec<u8>), Instant>>,
}

impl DeduplicationWindow {
    /// Creates a window of the default [`DEDUP_WINDOW`] width.
    pub fn new() -> Self {
        Self::with_window(DEDUP_WINDOW)
    }

    /// Creates a window of the given width.
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Admits the given delivery iff its `(channel, payload)` key has not
    /// been admitted within the window; records the key on admission.
    pub fn admit(&self, channel: &str, payload: &[u8]) -> bool {
        self.admit_at(channel, payload, Instant::now())
    }

    fn admit_at(&self, channel: &str, payload: &[u8], now: Instant) -> bool {
        let key = (channel.to_owned(), payload.to_vec());
        let mut seen = self.seen.lock();

        // After eviction, every remaining entry is within the window
        seen.retain(|_, admitted| now.duration_since(*admitted) < self.window);

        match seen.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Reports the number of live entries.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Reports whether the window holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Default for DeduplicationWindow {
    fn default() -> Self {
        Self::new()
    }
}
