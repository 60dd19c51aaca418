use crate::ChannelPattern;
use std::collections::HashMap;

/// A standalone pattern-to-pattern routing table.
///
/// Maps source channel patterns to lists of target patterns, for applications
/// that re-route or mirror traffic between channel families. This is a pure
/// data structure: it never touches a broker and is not consulted by the
/// [`Router`](crate::Router) itself.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: HashMap<ChannelPattern, Vec<ChannelPattern>>,
}

impl RoutingTable {
    /// Creates an empty routing table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a routing rule from the given source pattern to the given target
    /// patterns. Repeated calls for the same source accumulate targets.
    pub fn add_route<I, P>(&mut self, source: impl Into<ChannelPattern>, targets: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<ChannelPattern>,
    {
        self.routes
            .entry(source.into())
            .or_default()
            .extend(targets.into_iter().map(Into::into));
    }

    /// Collects the target patterns of every routing rule whose source
    /// pattern matches the given channel. Duplicate targets are reported
    /// once.
    pub fn routes_for(&self, channel: impl AsRef<str>) -> Vec<ChannelPattern> {
        let channel = channel.as_ref();
        let mut targets: Vec<ChannelPattern> = Vec::new();

        for (source, route_targets) in &self.routes {
            if source.matches(channel) {
                for target in route_targets {
                    if !targets.contains(target) {
                        targets.push(target.clone());
                    }
                }
            }
        }

        targets
    }

    /// Removes all routing rules.
    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Reports whether this table has no routing rules.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_union_over_matching_sources() {
        // Given
        let mut table = RoutingTable::new();
        table.add_route("T:*:*", ["Audit:request:*"]);
        table.add_route("T:request:*", ["Audit:request:*", "Mirror:request:*"]);

        // When
        let targets = table.routes_for("T:request:session1");

        // Then
        assert_eq!(2, targets.len());
        assert!(targets.contains(&ChannelPattern::new("Audit:request:*")));
        assert!(targets.contains(&ChannelPattern::new("Mirror:request:*")));
    }

    #[test]
    fn non_matching_channel_has_no_routes() {
        // Given
        let mut table = RoutingTable::new();
        table.add_route("T:request:*", ["Mirror:request:*"]);

        // Then
        assert!(table.routes_for("Other:request:s").is_empty());
    }

    #[test]
    fn clear_empties_the_table() {
        // Given
        let mut table = RoutingTable::new();
        table.add_route("T:*:*", ["Mirror:*:*"]);
        assert!(!table.is_empty());

        // When
        table.clear();

        // Then
        assert!(table.is_empty());
        assert!(table.routes_for("T:request:s").is_empty());
    }
}
