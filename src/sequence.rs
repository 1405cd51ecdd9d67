//! Per-origin sequence tables.
//!
//! Each node keeps two tables mapping origin name to the last-seen
//! sequence id, one for set-class messages and one for broadcast-class.
//! The node's own counters are seeded at 1 and handed out monotonically;
//! remote entries only ever advance, so a duplicated or re-ordered copy of
//! a message is recognized and dropped by its origin id.

use std::collections::HashMap;

/// Set-class and broadcast-class sequence tables for one node.
#[derive(Debug)]
pub struct SequenceTables {
    set: HashMap<String, u64>,
    broadcast: HashMap<String, u64>,
}

impl SequenceTables {
    /// Create the tables with the local node's own counters seeded at 1.
    pub fn new(own_name: &str) -> Self {
        let mut set = HashMap::new();
        let mut broadcast = HashMap::new();
        set.insert(own_name.to_string(), 1);
        broadcast.insert(own_name.to_string(), 1);
        Self { set, broadcast }
    }

    /// Take the next set-class id for an originated message.
    pub fn next_set_id(&mut self, own_name: &str) -> u64 {
        let counter = self.set.entry(own_name.to_string()).or_insert(1);
        let id = *counter;
        *counter += 1;
        id
    }

    /// Take the next broadcast-class id for an originated message.
    pub fn next_broadcast_id(&mut self, own_name: &str) -> u64 {
        let counter = self.broadcast.entry(own_name.to_string()).or_insert(1);
        let id = *counter;
        *counter += 1;
        id
    }

    /// Record an observed set-class id. Returns true if the id is strictly
    /// greater than the last one seen from this origin (and advances the
    /// entry); false means the message is stale and must be dropped.
    pub fn observe_set(&mut self, origin: &str, id: u64) -> bool {
        Self::observe(&mut self.set, origin, id)
    }

    /// Record an observed broadcast-class id; same contract as
    /// [`observe_set`](Self::observe_set).
    pub fn observe_broadcast(&mut self, origin: &str, id: u64) -> bool {
        Self::observe(&mut self.broadcast, origin, id)
    }

    /// Drop both entries for a node that left the mesh.
    pub fn remove(&mut self, name: &str) {
        self.set.remove(name);
        self.broadcast.remove(name);
    }

    fn observe(table: &mut HashMap<String, u64>, origin: &str, id: u64) -> bool {
        let last = table.get(origin).copied().unwrap_or(0);
        if id > last {
            table.insert(origin.to_string(), id);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_counters_start_at_one() {
        let mut seq = SequenceTables::new("alpha");
        assert_eq!(seq.next_set_id("alpha"), 1);
        assert_eq!(seq.next_set_id("alpha"), 2);
        assert_eq!(seq.next_broadcast_id("alpha"), 1);
    }

    #[test]
    fn test_observe_advances_on_strictly_greater() {
        let mut seq = SequenceTables::new("alpha");
        assert!(seq.observe_set("beta", 1));
        assert!(seq.observe_set("beta", 3));
        assert!(!seq.observe_set("beta", 3));
        assert!(!seq.observe_set("beta", 2));
        assert!(seq.observe_set("beta", 4));
    }

    #[test]
    fn test_set_and_broadcast_tables_are_independent() {
        let mut seq = SequenceTables::new("alpha");
        assert!(seq.observe_set("beta", 5));
        assert!(seq.observe_broadcast("beta", 1));
        assert!(seq.observe_broadcast("beta", 5));
    }

    #[test]
    fn test_own_originated_copies_are_stale() {
        // A flooded copy of our own message comes back with the id we
        // handed out, which is below the advanced counter.
        let mut seq = SequenceTables::new("alpha");
        let id = seq.next_broadcast_id("alpha");
        assert!(!seq.observe_broadcast("alpha", id));
    }

    #[test]
    fn test_remove_resets_origin() {
        let mut seq = SequenceTables::new("alpha");
        assert!(seq.observe_set("beta", 7));
        seq.remove("beta");
        assert!(seq.observe_set("beta", 1));
    }
}
