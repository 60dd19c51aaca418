use crate::Channel;
use crate::channel::{SEPARATOR, WILDCARD};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// The multi-segment wildcard: matches any number of segments, including
/// none.
const DEEP_WILDCARD: &str = "**";

/// The meta-characters that make a pattern non-literal on backends with
/// glob-style native pattern subscriptions.
const META_CHARACTERS: [char; 3] = ['*', '?', '['];

/// A subscription-side channel pattern.
///
/// A pattern follows the same `MessageClass:direction:session_id` grammar as
/// a [`Channel`], except that any segment may be the wildcard `*` (matches
/// exactly one segment) or `**` (matches any number of segments). A pattern
/// without wildcards matches only the byte-equal channel.
///
/// Patterns are cheap to clone and are used as keys of the subscription
/// table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelPattern {
    raw: Arc<str>,
}

impl ChannelPattern {
    /// Wraps the given string as a channel pattern.
    pub fn new(pattern: impl AsRef<str>) -> Self {
        Self {
            raw: Arc::from(pattern.as_ref()),
        }
    }

    /// The pattern that matches every channel of the given message class:
    /// `MessageClass:*:*`.
    pub fn broadcast(message_class: impl AsRef<str>) -> Self {
        Self::new(format!(
            "{}{}{}{}{}",
            message_class.as_ref(),
            SEPARATOR,
            WILDCARD,
            SEPARATOR,
            WILDCARD,
        ))
    }

    /// The pattern that matches every channel of the given session:
    /// `*:*:session_id`.
    pub fn session(session_id: impl AsRef<str>) -> Self {
        Self::new(format!(
            "{}{}{}{}{}",
            WILDCARD,
            SEPARATOR,
            WILDCARD,
            SEPARATOR,
            session_id.as_ref(),
        ))
    }

    /// Reports the textual form of this pattern.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Reports whether this pattern is free of glob meta-characters
    /// (`*`, `?`, `[`), i.e. whether it can only match the byte-equal
    /// channel.
    ///
    /// Backends with native pattern subscriptions use this to choose between
    /// an exact and a pattern subscription.
    pub fn is_literal(&self) -> bool {
        !self.raw.contains(META_CHARACTERS)
    }

    /// Reports whether the given channel matches this pattern.
    ///
    /// `*` matches any single colon-delimited segment, `**` matches any
    /// number of segments. A literal pattern matches iff it is byte-equal to
    /// the channel; a channel with a different number of segments than the
    /// pattern never matches unless the pattern uses `**`.
    pub fn matches(&self, channel: impl AsRef<str>) -> bool {
        let channel = channel.as_ref();

        // Byte equality short-circuits both the literal case and the
        // degenerate case of a channel that happens to spell the pattern
        if self.raw.as_ref() == channel {
            return true;
        }

        if self.is_literal() {
            return false;
        }

        let pattern_segments: Vec<&str> = self.raw.split(SEPARATOR).collect();
        let channel_segments: Vec<&str> = channel.split(SEPARATOR).collect();

        Self::match_segments(&pattern_segments, &channel_segments)
    }

    /// Matches segment lists recursively, consuming one pattern segment per
    /// step; `**` may consume any number of channel segments.
    fn match_segments(pattern: &[&str], channel: &[&str]) -> bool {
        let Some((head, tail)) = pattern.split_first() else {
            return channel.is_empty();
        };

        match *head {
            DEEP_WILDCARD => {
                (0..=channel.len()).any(|skipped| Self::match_segments(tail, &channel[skipped..]))
            }
            WILDCARD => !channel.is_empty() && Self::match_segments(tail, &channel[1..]),
            literal => {
                channel.first() == Some(&literal) && Self::match_segments(tail, &channel[1..])
            }
        }
    }
}

impl Display for ChannelPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for ChannelPattern {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl From<&str> for ChannelPattern {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChannelPattern {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&Channel> for ChannelPattern {
    fn from(value: &Channel) -> Self {
        Self::new(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_only_byte_equal() {
        // Given
        let pattern = ChannelPattern::new("SampleMessage:request:session1");

        // Then
        assert!(pattern.matches("SampleMessage:request:session1"));
        assert!(!pattern.matches("SampleMessage:request:session2"));
        assert!(!pattern.matches("SampleMessage:response:session1"));
    }

    #[test]
    fn single_wildcard_matches_one_segment() {
        // Given
        let pattern = ChannelPattern::new("SampleMessage:*:*");

        // Then
        assert!(pattern.matches("SampleMessage:request:session1"));
        assert!(pattern.matches("SampleMessage:response:whatever"));
        assert!(!pattern.matches("OtherMessage:request:session1"));
    }

    #[test]
    fn wildcard_rejects_differing_segment_count() {
        // Given
        let pattern = ChannelPattern::new("*:*");

        // Then
        assert!(!pattern.matches("a:b:c"));
        assert!(pattern.matches("a:b"));
    }

    #[test]
    fn deep_wildcard_spans_segments() {
        // Given
        let pattern = ChannelPattern::new("SampleMessage:**");

        // Then
        assert!(pattern.matches("SampleMessage:request:session1"));
        assert!(pattern.matches("SampleMessage:anything"));
        assert!(!pattern.matches("OtherMessage:request:session1"));
    }

    #[test]
    fn full_wildcard_matches_any_channel() {
        // Given
        let pattern = ChannelPattern::new("*:*:*");

        // Then
        assert!(pattern.matches("T:request:s"));
        assert!(pattern.matches("Another:response:xyz"));
        assert!(!pattern.matches("two:segments"));
    }

    #[test]
    fn matches_is_consistent_with_channel_identity() {
        // Given
        let channel = Channel::new("T", "d", "s").unwrap();
        let exact = ChannelPattern::from(&channel);

        // Then
        assert!(exact.matches(channel.to_string()));
        assert!(ChannelPattern::new("*:*:*").matches(channel.to_string()));
    }

    #[test]
    fn literal_classification() {
        assert!(ChannelPattern::new("T:request:s").is_literal());
        assert!(!ChannelPattern::new("T:*:s").is_literal());
        assert!(!ChannelPattern::new("T:request:s[12]").is_literal());
        assert!(!ChannelPattern::new("T:re?uest:s").is_literal());
    }

    #[test]
    fn convenience_constructors() {
        assert_eq!("T:*:*", ChannelPattern::broadcast("T").as_str());
        assert_eq!("*:*:s7", ChannelPattern::session("s7").as_str());
    }
}
