use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// The separator between the segments of a channel name.
pub(crate) const SEPARATOR: char = ':';

/// The conventional `direction` segment of a reply channel.
const DIRECTION_RESPONSE: &str = "response";

/// The single-segment wildcard recognised in patterns and rejected in
/// concrete channels.
pub(crate) const WILDCARD: &str = "*";

/// A canonical channel name: `MessageClass:direction:session_id`.
///
/// All three segments are non-empty and contain no `:`. A channel is always
/// concrete in the sense that it names exactly one addressable destination;
/// the wildcard-capable counterpart used on the subscribe side is
/// [`ChannelPattern`](crate::ChannelPattern).
///
/// A parsed channel doubles as the delivery context handed to agent handlers,
/// exposing the [`message_class`](Channel::message_class),
/// [`direction`](Channel::direction) and [`session_id`](Channel::session_id)
/// of the message being delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    message_class: Arc<str>,
    direction: Arc<str>,
    session_id: Arc<str>,
}

/// Indicates that a string does not split into exactly three non-empty
/// segments on `:`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("channel '{channel}' has invalid format; expected 'MessageClass:direction:session_id'")]
pub struct InvalidChannelFormat {
    channel: String,
}

impl Channel {
    /// Builds a channel from its three segments.
    ///
    /// Fails with [`InvalidChannelFormat`] if any segment is empty or
    /// contains a `:`.
    pub fn new(
        message_class: impl AsRef<str>,
        direction: impl AsRef<str>,
        session_id: impl AsRef<str>,
    ) -> Result<Self, InvalidChannelFormat> {
        let message_class = message_class.as_ref();
        let direction = direction.as_ref();
        let session_id = session_id.as_ref();

        // A segment that is empty or carries a separator would not survive a
        // round-trip through the textual form
        for segment in [message_class, direction, session_id] {
            if segment.is_empty() || segment.contains(SEPARATOR) {
                return Err(InvalidChannelFormat::new(format!(
                    "{}{}{}{}{}",
                    message_class, SEPARATOR, direction, SEPARATOR, session_id,
                )));
            }
        }

        Ok(Self {
            message_class: Arc::from(message_class),
            direction: Arc::from(direction),
            session_id: Arc::from(session_id),
        })
    }

    /// Parses a channel name of the form `MessageClass:direction:session_id`.
    pub fn parse(channel: impl AsRef<str>) -> Result<Self, InvalidChannelFormat> {
        let channel = channel.as_ref();
        let mut segments = channel.split(SEPARATOR);

        let (Some(message_class), Some(direction), Some(session_id), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(InvalidChannelFormat::new(channel));
        };

        Self::new(message_class, direction, session_id)
            .map_err(|_| InvalidChannelFormat::new(channel))
    }

    /// Reports whether the given string is a well-formed channel name.
    pub fn is_valid(channel: impl AsRef<str>) -> bool {
        Self::parse(channel).is_ok()
    }
}

impl Channel {
    /// Reports the message class segment.
    pub fn message_class(&self) -> &str {
        &self.message_class
    }

    /// Reports the direction segment.
    pub fn direction(&self) -> &str {
        &self.direction
    }

    /// Reports the session segment.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Extracts the session segment, or `None` when it is the `*` wildcard.
    pub fn session(&self) -> Option<&str> {
        if self.session_id.as_ref() == WILDCARD {
            None
        } else {
            Some(&self.session_id)
        }
    }

    /// Reports whether any segment is (or contains) the `*` wildcard.
    ///
    /// A channel produced for publication must never report `true` here.
    pub fn has_wildcard(&self) -> bool {
        [&self.message_class, &self.direction, &self.session_id]
            .iter()
            .any(|segment| segment.contains('*'))
    }

    /// Derives the reply channel: the same channel with the direction segment
    /// replaced by `response`.
    pub fn response(&self) -> Self {
        Self {
            message_class: Arc::clone(&self.message_class),
            direction: Arc::from(DIRECTION_RESPONSE),
            session_id: Arc::clone(&self.session_id),
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.message_class, SEPARATOR, self.direction, SEPARATOR, self.session_id,
        )
    }
}

impl FromStr for Channel {
    type Err = InvalidChannelFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl InvalidChannelFormat {
    pub(crate) fn new(channel: impl AsRef<str>) -> Self {
        Self {
            channel: channel.as_ref().to_owned(),
        }
    }

    /// Reports the offending input.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}
