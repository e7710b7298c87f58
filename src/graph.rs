//! Directed multigraph over dense integer node ids, with logical node
//! deletion so that backtracking only has to undo a flag rather than
//! rebuild adjacency (`original_source/src/Graph.h`, spec section 4.1 and
//! design note in spec section 9).

use std::collections::{BTreeSet, VecDeque};

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct Graph {
    present: Vec<bool>,
    outgoing: Vec<BTreeSet<NodeId>>,
    incoming: Vec<BTreeSet<NodeId>>,
}

impl Graph {
    pub fn new(num_nodes: usize) -> Self {
        Graph {
            present: vec![true; num_nodes],
            outgoing: vec![BTreeSet::new(); num_nodes],
            incoming: vec![BTreeSet::new(); num_nodes],
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.present.len()
    }

    pub fn is_present(&self, n: NodeId) -> bool {
        self.present[n]
    }

    /// Idempotent: adding an edge that already exists is a no-op. Returns
    /// whether the edge was newly added.
    pub fn add_edge(&mut self, src: NodeId, dst: NodeId) -> bool {
        let added = self.outgoing[src].insert(dst);
        self.incoming[dst].insert(src);
        added
    }

    pub fn del_edge(&mut self, src: NodeId, dst: NodeId) {
        self.outgoing[src].remove(&dst);
        self.incoming[dst].remove(&src);
    }

    pub fn has_edge(&self, src: NodeId, dst: NodeId) -> bool {
        self.outgoing[src].contains(&dst)
    }

    /// Logical delete: the node's edges stay recorded, but subsequent
    /// `incoming`/`outgoing`/`roots` queries filter it out. Returns the
    /// previous `present` state.
    pub fn del_node(&mut self, n: NodeId) -> bool {
        let was_present = self.present[n];
        self.present[n] = false;
        was_present
    }

    pub fn undel_node(&mut self, n: NodeId) {
        self.present[n] = true;
    }

    /// Present predecessors of `n`.
    pub fn incoming(&self, n: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.incoming[n].iter().copied().filter(|&p| self.present[p])
    }

    /// Present successors of `n`.
    pub fn outgoing(&self, n: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing[n].iter().copied().filter(|&s| self.present[s])
    }

    /// All raw predecessors of `n`, ignoring `present` (used by the search
    /// engines to see through logically-deleted nodes when tallying who
    /// still refers to a value, e.g. `readsFromInv`).
    pub fn raw_incoming(&self, n: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.incoming[n].iter().copied()
    }

    /// Present nodes with no present predecessors.
    pub fn roots(&self) -> Vec<NodeId> {
        (0..self.present.len())
            .filter(|&n| self.present[n] && self.incoming(n).next().is_none())
            .collect()
    }

    /// Kahn's algorithm over present nodes. `None` iff a cycle exists among
    /// present nodes. Never mutates `self` (so there is nothing to restore
    /// afterwards, satisfying spec section 4.1's "must restore present after
    /// use" by construction).
    pub fn top_sort(&self) -> Option<Vec<NodeId>> {
        self.kahn(false)
    }

    /// Topological sort of the graph with all edges reversed, without
    /// actually mutating adjacency.
    pub fn rev_top_sort(&self) -> Option<Vec<NodeId>> {
        self.kahn(true)
    }

    fn kahn(&self, reversed: bool) -> Option<Vec<NodeId>> {
        let n = self.present.len();
        let preds_of = |node: NodeId| -> Box<dyn Iterator<Item = NodeId> + '_> {
            if reversed {
                Box::new(self.outgoing(node))
            } else {
                Box::new(self.incoming(node))
            }
        };
        let succs_of = |node: NodeId| -> Box<dyn Iterator<Item = NodeId> + '_> {
            if reversed {
                Box::new(self.incoming(node))
            } else {
                Box::new(self.outgoing(node))
            }
        };

        let mut indeg = vec![0usize; n];
        for node in 0..n {
            if self.present[node] {
                indeg[node] = preds_of(node).count();
            }
        }

        let mut queue: VecDeque<NodeId> = (0..n)
            .filter(|&node| self.present[node] && indeg[node] == 0)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for succ in succs_of(node) {
                indeg[succ] -= 1;
                if indeg[succ] == 0 {
                    queue.push_back(succ);
                }
            }
        }

        let present_count = (0..n).filter(|&node| self.present[node]).count();
        if order.len() == present_count {
            Some(order)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_add_edge() {
        let mut g = Graph::new(3);
        assert!(g.add_edge(0, 1));
        assert!(!g.add_edge(0, 1));
        assert!(g.has_edge(0, 1));
    }

    #[test]
    fn logical_delete_restores() {
        let mut g = Graph::new(2);
        g.add_edge(0, 1);
        g.del_node(0);
        assert!(g.incoming(1).next().is_none());
        g.undel_node(0);
        assert_eq!(g.incoming(1).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn top_sort_linear_chain() {
        let mut g = Graph::new(3);
        g.add_edge(0, 1);
        g.add_edge(1, 2);
        let order = g.top_sort().unwrap();
        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(1) < pos(2));
    }

    #[test]
    fn top_sort_detects_cycle() {
        let mut g = Graph::new(2);
        g.add_edge(0, 1);
        g.add_edge(1, 0);
        assert!(g.top_sort().is_none());
    }

    #[test]
    fn rev_top_sort_is_reverse_order() {
        let mut g = Graph::new(3);
        g.add_edge(0, 1);
        g.add_edge(1, 2);
        let order = g.rev_top_sort().unwrap();
        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(2) < pos(1));
        assert!(pos(1) < pos(0));
    }

    #[test]
    fn roots_ignore_deleted_predecessors() {
        let mut g = Graph::new(2);
        g.add_edge(0, 1);
        assert_eq!(g.roots(), vec![0]);
        g.del_node(0);
        assert_eq!(g.roots(), vec![1]);
    }
}
