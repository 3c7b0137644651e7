//! Namespace allow-list for watched resources
//!
//! Gates every reconciliation before any work is dispatched. An empty list
//! watches the whole cluster.

use std::collections::BTreeSet;

#[derive(Clone, Debug, Default)]
pub struct WatchNamespaces {
    allowed: BTreeSet<String>,
}

impl WatchNamespaces {
    /// Parse a comma-separated namespace list; empty means all namespaces
    pub fn parse(raw: &str) -> Self {
        let allowed = raw
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect();
        Self { allowed }
    }

    /// Watch every namespace
    pub fn all() -> Self {
        Self::default()
    }

    pub fn watches_all(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn matches(&self, namespace: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_matches_everything() {
        let gate = WatchNamespaces::parse("");
        assert!(gate.watches_all());
        assert!(gate.matches("default"));
        assert!(gate.matches("queues"));
    }

    #[test]
    fn test_list_restricts_to_named_namespaces() {
        let gate = WatchNamespaces::parse("queues, messaging");
        assert!(!gate.watches_all());
        assert!(gate.matches("queues"));
        assert!(gate.matches("messaging"));
        assert!(!gate.matches("default"));
    }

    #[test]
    fn test_stray_commas_and_spaces_are_ignored() {
        let gate = WatchNamespaces::parse(" queues ,, ");
        assert!(gate.matches("queues"));
        assert!(!gate.matches(""));
    }
}
