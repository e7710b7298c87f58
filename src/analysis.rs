//! SC/TSO/PSO/WMO engine: builds an instruction-level happens-before
//! graph, maintains the `nextLoad`/`nextStore` reachability summary, infers
//! implied edges, and runs a backtracking linearization search
//! (`original_source/src/Analysis.h`, spec section 4.5).

use std::mem;

use tracing::debug;

use crate::edges;
use crate::graph::{Graph, NodeId};
use crate::instr::{Addr, Instr, InstrId, Op, ThreadId};
use crate::journal::{Journal, Undo};
use crate::model::ModelTag;
use crate::trace::Trace;

#[derive(Debug)]
enum Entry {
    DelNode(NodeId),
    AddEdge(NodeId, NodeId),
    NextLoad { node: NodeId, key: usize, old: NodeId },
    NextStore { node: NodeId, key: usize, old: NodeId },
    LastStore { key: usize, old: Option<InstrId> },
}

impl Undo for Entry {
    type Target = Engine;

    fn undo(self, target: &mut Engine) {
        match self {
            Entry::DelNode(n) => {
                target.graph.undel_node(n);
                target.count -= 1;
            }
            Entry::AddEdge(src, dst) => target.graph.del_edge(src, dst),
            Entry::NextLoad { node, key, old } => target.next_load[node][key] = old,
            Entry::NextStore { node, key, old } => target.next_store[node][key] = old,
            Entry::LastStore { key, old } => target.last_store[key] = old,
        }
    }
}

struct Engine {
    graph: Graph,
    /// `[node][tid * num_addrs + addr]`, sentinel = `total_nodes`.
    next_load: Vec<Vec<NodeId>>,
    next_store: Vec<Vec<NodeId>>,
    /// `[tid * num_addrs + addr]`, the most recently consumed store to that
    /// (thread, address) pair.
    last_store: Vec<Option<InstrId>>,
    count: usize,
    dim: usize,
    sentinel: NodeId,
    journal: Journal<Entry>,
}

fn instr_at(trace: &Trace, node: NodeId) -> Instr {
    if node < trace.num_instrs {
        trace.instrs[node]
    } else {
        trace.finals[node - trace.num_instrs]
    }
}

impl Engine {
    fn new(trace: &Trace, model: ModelTag) -> Engine {
        let n = trace.total_nodes();
        let dim = trace.num_threads * trace.num_addrs.max(1);
        let mut graph = Graph::new(n);
        for e in edges::for_model(model, trace) {
            graph.add_edge(e.src, e.dst);
        }
        Engine {
            graph,
            next_load: vec![vec![n; dim]; n],
            next_store: vec![vec![n; dim]; n],
            last_store: vec![None; dim],
            count: 0,
            dim,
            sentinel: n,
            journal: Journal::new(),
        }
    }

}

fn idx(num_addrs: usize, tid: ThreadId, addr: Addr) -> usize {
    tid as usize * num_addrs.max(1) + addr as usize
}

impl Engine {
    /// Seeds `next_load`/`next_store` from scratch via a backward sweep over
    /// a reverse-topological order. Returns `false` on a cycle.
    fn compute_next(&mut self, trace: &Trace) -> bool {
        let order = match self.graph.rev_top_sort() {
            Some(o) => o,
            None => return false,
        };
        for n in order {
            for p in self.graph.incoming(n).collect::<Vec<_>>() {
                self.propagate_instr(trace, n, p);
                self.propagate_next(n, p);
            }
        }
        true
    }

    fn propagate_instr(&mut self, trace: &Trace, n: NodeId, p: NodeId) -> bool {
        let ins = instr_at(trace, n);
        let mut changed = false;
        let key = idx(trace.num_addrs, ins.tid, ins.addr);
        if ins.is_load() && n < self.next_load[p][key] {
            self.journal.record(Entry::NextLoad { node: p, key, old: self.next_load[p][key] });
            self.next_load[p][key] = n;
            changed = true;
        }
        if ins.is_store() && n < self.next_store[p][key] {
            self.journal.record(Entry::NextStore { node: p, key, old: self.next_store[p][key] });
            self.next_store[p][key] = n;
            changed = true;
        }
        changed
    }

    fn propagate_next(&mut self, n: NodeId, p: NodeId) -> bool {
        let mut changed = false;
        for key in 0..self.dim {
            let nl = self.next_load[n][key];
            if nl < self.next_load[p][key] {
                let old = self.next_load[p][key];
                self.journal.record(Entry::NextLoad { node: p, key, old });
                self.next_load[p][key] = nl;
                changed = true;
            }
            let ns = self.next_store[n][key];
            if ns < self.next_store[p][key] {
                let old = self.next_store[p][key];
                self.journal.record(Entry::NextStore { node: p, key, old });
                self.next_store[p][key] = ns;
                changed = true;
            }
        }
        changed
    }

    fn exists_path(&self, trace: &Trace, src: NodeId, dst_store: InstrId) -> bool {
        let ins = instr_at(trace, dst_store);
        let key = idx(trace.num_addrs, ins.tid, ins.addr);
        self.next_store[src][key] <= dst_store
    }

    /// Only meaningful for ST/RMW `src`. Appends any edges that must hold
    /// given the current summary but aren't yet present.
    fn infer_from(&self, trace: &Trace, src: InstrId, out: &mut Vec<(NodeId, NodeId)>) {
        let ins = trace.instrs[src];
        if !ins.is_store() {
            return;
        }
        for t in 0..trace.num_threads as ThreadId {
            let key = idx(trace.num_addrs, t, ins.addr);
            let store = self.next_store[src][key];
            if store < self.sentinel {
                for &load in trace.reads_from_inv[src].iter() {
                    if load != store && !self.exists_path(trace, load, store) {
                        out.push((load, store));
                    }
                }
            }

            let near_load = self.next_load[src][key];
            if near_load < self.sentinel {
                let mut cur = Some(near_load);
                while let Some(c) = cur {
                    if trace.reads_from[c] == Some(src) {
                        cur = trace.next_local_load[c];
                    } else {
                        break;
                    }
                }
                if let Some(c) = cur {
                    if let Some(s) = trace.reads_from[c] {
                        if s != src && !self.exists_path(trace, src, s) {
                            out.push((src, s));
                        }
                    }
                }
            }
        }
    }

    /// Adds `src -> dst`, draining any edges `addEdgeHelper`'s propagation
    /// discovers along the way. `false` means a cycle was found.
    fn add_edge(&mut self, trace: &Trace, src: NodeId, dst: NodeId) -> bool {
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((src, dst));
        while let Some((s, d)) = queue.pop_front() {
            let mut inferred = Vec::new();
            if !self.add_edge_helper(trace, s, d, &mut inferred) {
                return false;
            }
            queue.extend(inferred);
        }
        true
    }

    fn add_edge_helper(
        &mut self,
        trace: &Trace,
        src: NodeId,
        dst: NodeId,
        inferred: &mut Vec<(NodeId, NodeId)>,
    ) -> bool {
        if self.graph.has_edge(src, dst) {
            return true;
        }
        self.journal.record(Entry::AddEdge(src, dst));
        self.graph.add_edge(src, dst);

        self.propagate_instr(trace, dst, src);
        self.propagate_next(dst, src);

        let mut worklist = std::collections::VecDeque::new();
        worklist.push_back(src);
        while let Some(n) = worklist.pop_front() {
            if instr_at_is_store(trace, n) {
                self.infer_from(trace, n, inferred);
            }
            if n == dst {
                return false;
            }
            for p in self.graph.incoming(n).collect::<Vec<_>>() {
                let c1 = self.propagate_instr(trace, n, p);
                let c2 = self.propagate_next(n, p);
                if c1 || c2 {
                    worklist.push_back(p);
                }
            }
        }
        true
    }

    fn infer_edges(&mut self, trace: &Trace) -> bool {
        let mut inferred = Vec::new();
        for uid in 0..trace.num_instrs {
            self.infer_from(trace, uid, &mut inferred);
        }
        for (s, d) in inferred {
            if !self.add_edge(trace, s, d) {
                return false;
            }
        }
        true
    }

    fn delete_node(&mut self, node: NodeId) {
        self.journal.record(Entry::DelNode(node));
        self.graph.del_node(node);
        self.count += 1;
    }

    /// Deletes any root that is LD/SYNC, or ST/RMW with no loads reading
    /// from it, repeating until no such root remains.
    fn consume(&mut self, trace: &Trace) {
        loop {
            let roots = self.graph.roots();
            let mut pick = None;
            for r in roots {
                let ins = instr_at(trace, r);
                let eligible = match ins.op {
                    Op::Ld | Op::Sync => true,
                    Op::St | Op::Rmw => r < trace.num_instrs && trace.reads_from_inv[r].is_empty(),
                    _ => false,
                };
                if eligible {
                    pick = Some(r);
                    break;
                }
            }
            match pick {
                Some(r) => self.delete_node(r),
                None => break,
            }
        }
    }

    /// Advances the coherence bookkeeping after placing store `st`: other
    /// threads' next not-yet-scheduled store to the same address must come
    /// after every currently-live load that reads `st`'s value, since that
    /// value stops being visible once the next write lands.
    fn perform_store(&mut self, trace: &Trace, st: InstrId) -> bool {
        let ins = trace.instrs[st];
        let self_key = idx(trace.num_addrs, ins.tid, ins.addr);
        let old = self.last_store[self_key];
        self.journal.record(Entry::LastStore { key: self_key, old });
        self.last_store[self_key] = Some(st);

        for t in 0..trace.num_threads as ThreadId {
            if t == ins.tid {
                continue;
            }
            let key = idx(trace.num_addrs, t, ins.addr);
            let last = self.last_store[key];
            let candidate = match last {
                None => trace.first_store[ins.addr as usize][t as usize],
                Some(l) => trace.next_local_store[l],
            };
            let Some(candidate) = candidate else { continue };
            for &load in trace.reads_from_inv[st].iter() {
                if load != candidate && self.graph.is_present(load) {
                    if !self.add_edge(trace, load, candidate) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

fn instr_at_is_store(trace: &Trace, node: NodeId) -> bool {
    instr_at(trace, node).is_store()
}

/// Admits `trace` under `model` (one of SC/TSO/PSO/WMO).
pub fn check(trace: &Trace, model: ModelTag) -> bool {
    debug!(%model, num_instrs = trace.num_instrs, "analysis: building happens-before graph");
    let mut eng = Engine::new(trace, model);

    if !eng.compute_next(trace) {
        debug!("analysis: computeNext found a cycle");
        return false;
    }
    if !eng.infer_edges(trace) {
        debug!("analysis: inferEdges found a cycle");
        return false;
    }

    eng.consume(trace);
    let mut stack: Vec<Option<NodeId>> = eng.graph.roots().into_iter().map(Some).collect();

    loop {
        if eng.count == trace.total_nodes() {
            debug!(%model, "analysis: search accepted the trace");
            return true;
        }
        match stack.pop() {
            None => {
                debug!(%model, "analysis: search exhausted, trace rejected");
                return false;
            }
            Some(None) => {
                let mut journal = mem::take(&mut eng.journal);
                journal.backtrack(&mut eng);
                eng.journal = journal;
            }
            Some(Some(node)) => {
                eng.journal.checkpoint();
                eng.delete_node(node);

                let mut ok = true;
                if instr_at(trace, node).is_store() {
                    ok = eng.perform_store(trace, node);
                }

                if !ok {
                    let mut journal = mem::take(&mut eng.journal);
                    journal.backtrack(&mut eng);
                    eng.journal = journal;
                    continue;
                }

                eng.consume(trace);
                stack.push(None);
                for r in eng.graph.roots() {
                    stack.push(Some(r));
                }
            }
        }
    }
}
