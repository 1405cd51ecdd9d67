//! Topology engine: the adjacency map and its reconciliation operations.
//!
//! The mesh is an adjacency map from node name to a sorted, duplicate-free
//! list of neighbor names. `union` merges a fragment additively;
//! `remove_edges` deletes the edges a fragment names (the protocol calls
//! this operation "intersection", but it is edge removal, not a set
//! intersection). Routes are derived by breadth-first search from the local
//! node and cached until the next mesh mutation.

use std::collections::{BTreeMap, HashMap, VecDeque};

/// Per-node view of the cluster graph: name -> sorted unique neighbor list.
pub type MeshMap = BTreeMap<String, Vec<String>>;

/// Adjacency map plus the one-hop route table derived from it.
#[derive(Debug, Default)]
pub struct Topology {
    /// Known topology. Every list is sorted and duplicate-free; a node
    /// with no neighbors has no row at all.
    mesh: MeshMap,
    /// Destination -> next-hop cache. Cleared on every mesh mutation,
    /// rebuilt lazily by the next route lookup.
    routes: HashMap<String, String>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an adjacency fragment into the mesh.
    ///
    /// Each listed neighbor set is appended to the matching row, then the
    /// row is sorted and deduplicated. Applying the same fragment twice is
    /// a no-op the second time.
    pub fn union(&mut self, fragment: &MeshMap) {
        for (name, neighbors) in fragment {
            let row = self.mesh.entry(name.clone()).or_default();
            row.extend(neighbors.iter().cloned());
            row.sort();
            row.dedup();
        }
        self.routes.clear();
        tracing::debug!(mesh = ?self.mesh, "mesh after union");
    }

    /// Remove the edges named by the fragment.
    ///
    /// For each `(name, neighbors)` entry, every listed neighbor is removed
    /// from `name`'s row. Rows left empty are deleted entirely; the names
    /// of deleted rows are returned so the caller can drop their sequence
    /// entries as well.
    pub fn remove_edges(&mut self, fragment: &MeshMap) -> Vec<String> {
        let mut removed = Vec::new();
        for (name, neighbors) in fragment {
            if let Some(row) = self.mesh.get_mut(name) {
                row.retain(|existing| !neighbors.contains(existing));
                if row.is_empty() {
                    self.mesh.remove(name);
                    removed.push(name.clone());
                }
            }
        }
        self.routes.clear();
        tracing::debug!(mesh = ?self.mesh, "mesh after intersection");
        removed
    }

    /// Neighbors of `name`, or an empty slice if it has no row.
    pub fn neighbors(&self, name: &str) -> &[String] {
        self.mesh.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Next hop from `root` toward `dest`, if `dest` is reachable.
    ///
    /// The route table is rebuilt by BFS on first use after a mesh change.
    /// Neighbors are visited in sorted order, so ties between equal-length
    /// paths break deterministically.
    pub fn next_hop(&mut self, root: &str, dest: &str) -> Option<String> {
        if self.routes.is_empty() {
            self.rebuild_routes(root);
        }
        self.routes.get(dest).cloned()
    }

    /// A copy of the mesh. Modifying the copy does not affect the mesh.
    pub fn snapshot(&self) -> MeshMap {
        self.mesh.clone()
    }

    /// Whether the mesh has a row for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.mesh.contains_key(name)
    }

    fn rebuild_routes(&mut self, root: &str) {
        let mut routes: HashMap<String, String> = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(root.to_string());

        // BFS from root; each destination inherits the first hop of the
        // path it was discovered through.
        while let Some(current) = queue.pop_front() {
            for neighbor in self.neighbors(&current) {
                if neighbor == root || routes.contains_key(neighbor) {
                    continue;
                }
                let hop = if current == root {
                    neighbor.clone()
                } else {
                    routes[&current].clone()
                };
                routes.insert(neighbor.clone(), hop);
                queue.push_back(neighbor.clone());
            }
        }

        self.routes = routes;
    }
}

/// Build the two-row fragment describing the single edge `a <-> b`.
pub fn edge_fragment(a: &str, b: &str) -> MeshMap {
    let mut fragment = MeshMap::new();
    fragment.insert(a.to_string(), vec![b.to_string()]);
    fragment.insert(b.to_string(), vec![a.to_string()]);
    fragment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(entries: &[(&str, &[&str])]) -> MeshMap {
        entries
            .iter()
            .map(|(name, neighbors)| {
                (
                    name.to_string(),
                    neighbors.iter().map(|n| n.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_union_sorts_and_dedups() {
        let mut topo = Topology::new();
        topo.union(&mesh(&[("a", &["c", "b"])]));
        topo.union(&mesh(&[("a", &["b", "d"])]));

        assert_eq!(topo.neighbors("a").to_vec(), ["b", "c", "d"]);
    }

    #[test]
    fn test_union_is_idempotent() {
        let fragment = mesh(&[("a", &["b"]), ("b", &["a", "c"]), ("c", &["b"])]);

        let mut topo = Topology::new();
        topo.union(&fragment);
        let once = topo.snapshot();
        topo.union(&fragment);

        assert_eq!(topo.snapshot(), once);
    }

    #[test]
    fn test_remove_edges_removes_what_it_names() {
        let mut topo = Topology::new();
        topo.union(&mesh(&[("a", &["b", "c"]), ("b", &["a"]), ("c", &["a"])]));

        let removed = topo.remove_edges(&mesh(&[("a", &["b"]), ("b", &["a"])]));

        assert_eq!(topo.neighbors("a").to_vec(), ["c"]);
        assert!(!topo.contains("b"));
        assert_eq!(removed, vec!["b".to_string()]);
    }

    #[test]
    fn test_remove_edges_deletes_empty_rows() {
        let mut topo = Topology::new();
        topo.union(&edge_fragment("a", "b"));

        let removed = topo.remove_edges(&edge_fragment("a", "b"));

        assert!(topo.snapshot().is_empty());
        assert_eq!(removed.len(), 2);
    }

    #[test]
    fn test_remove_edges_ignores_absent_rows() {
        let mut topo = Topology::new();
        topo.union(&edge_fragment("a", "b"));

        let removed = topo.remove_edges(&mesh(&[("z", &["a"])]));
        assert!(removed.is_empty());
        assert_eq!(topo.neighbors("a").to_vec(), ["b"]);
    }

    #[test]
    fn test_next_hop_direct_neighbor() {
        let mut topo = Topology::new();
        topo.union(&edge_fragment("a", "b"));

        assert_eq!(topo.next_hop("a", "b"), Some("b".to_string()));
    }

    #[test]
    fn test_next_hop_two_hops() {
        let mut topo = Topology::new();
        topo.union(&mesh(&[
            ("a", &["b"]),
            ("b", &["a", "c"]),
            ("c", &["b"]),
        ]));

        assert_eq!(topo.next_hop("a", "c"), Some("b".to_string()));
    }

    #[test]
    fn test_next_hop_unreachable() {
        let mut topo = Topology::new();
        topo.union(&edge_fragment("a", "b"));

        assert_eq!(topo.next_hop("a", "z"), None);
    }

    #[test]
    fn test_next_hop_prefers_shortest_path() {
        // d is two hops away via b but three via c/e; BFS must pick the
        // two-hop path's first neighbor.
        let mut topo = Topology::new();
        topo.union(&mesh(&[
            ("a", &["b", "c"]),
            ("b", &["a", "d"]),
            ("c", &["a", "e"]),
            ("e", &["c", "d"]),
            ("d", &["b", "e"]),
        ]));

        assert_eq!(topo.next_hop("a", "d"), Some("b".to_string()));
    }

    #[test]
    fn test_routes_invalidated_by_mutation() {
        let mut topo = Topology::new();
        topo.union(&mesh(&[("a", &["b"]), ("b", &["a", "c"]), ("c", &["b"])]));
        assert_eq!(topo.next_hop("a", "c"), Some("b".to_string()));

        topo.remove_edges(&mesh(&[("b", &["c"]), ("c", &["b"])]));
        assert_eq!(topo.next_hop("a", "c"), None);
    }

    #[test]
    fn test_edge_fragment_shape() {
        let fragment = edge_fragment("x", "y");
        assert_eq!(fragment["x"], vec!["y".to_string()]);
        assert_eq!(fragment["y"], vec!["x".to_string()]);
    }
}
