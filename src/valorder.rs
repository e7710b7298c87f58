//! POW engine: per-address value-order graphs, an instruction operation-order
//! graph, RMW atomicity, and a backtracking sync-total-order search
//! (`original_source/src/ValOrder.h`, spec section 4.6).

use std::collections::{HashMap, VecDeque};
use std::mem;

use tracing::debug;

use crate::edges;
use crate::graph::{Graph, NodeId};
use crate::instr::{Addr, Data, InstrId, Op, ThreadId};
use crate::journal::{Journal, Undo};
use crate::trace::Trace;

#[derive(Debug)]
enum Entry {
    DelNode(NodeId),
    AddEdgeVal { addr: usize, from: Data, to: Data },
    AddEdgeOp(NodeId, NodeId),
    NextVal { addr: usize, data: Data, t: usize, old: Data },
}

impl Undo for Entry {
    type Target = Engine;

    fn undo(self, target: &mut Engine) {
        match self {
            Entry::DelNode(n) => {
                target.op_order.undel_node(n);
                target.local_op_order.undel_node(n);
                target.count -= 1;
            }
            Entry::AddEdgeVal { addr, from, to } => {
                target.val_orders[addr].del_edge(from as usize, to as usize);
            }
            Entry::AddEdgeOp(src, dst) => {
                target.op_order.del_edge(src, dst);
                target.local_op_order.del_edge(src, dst);
            }
            Entry::NextVal { addr, data, t, old } => target.next[addr][data as usize][t] = old,
        }
    }
}

struct Engine {
    val_orders: Vec<Graph>,
    /// `[addr][data][tid]`, sentinel = `num_data[addr]`.
    next: Vec<Vec<Vec<Data>>>,
    atomic_r_to_w: Vec<Vec<Option<Data>>>,
    atomic_w_to_r: Vec<Vec<Option<Data>>>,
    storers: Vec<Vec<Option<ThreadId>>>,
    op_order: Graph,
    local_op_order: Graph,
    prev_seen: Vec<Vec<Option<Data>>>,
    next_seen: Vec<Vec<Option<Data>>>,
    count: usize,
    journal: Journal<Entry>,
}

impl Engine {
    fn new(trace: &Trace) -> Engine {
        let val_orders = (0..trace.num_addrs).map(|a| Graph::new(trace.num_data[a].max(1))).collect();
        let next = (0..trace.num_addrs)
            .map(|a| vec![vec![trace.num_data[a] as Data; trace.num_threads]; trace.num_data[a].max(1)])
            .collect();
        let atomic_r_to_w = (0..trace.num_addrs).map(|a| vec![None; trace.num_data[a].max(1)]).collect();
        let atomic_w_to_r = (0..trace.num_addrs).map(|a| vec![None; trace.num_data[a].max(1)]).collect();
        let mut storers: Vec<Vec<Option<ThreadId>>> =
            (0..trace.num_addrs).map(|a| vec![None; trace.num_data[a].max(1)]).collect();
        for ins in &trace.instrs {
            if ins.is_store() {
                storers[ins.addr as usize][ins.write_val as usize] = Some(ins.tid);
            }
        }

        Engine {
            val_orders,
            next,
            atomic_r_to_w,
            atomic_w_to_r,
            storers,
            op_order: Graph::new(trace.num_instrs),
            local_op_order: Graph::new(trace.num_instrs),
            prev_seen: trace.compute_prev_seen(),
            next_seen: trace.compute_next_seen(),
            count: 0,
            journal: Journal::new(),
        }
    }

    fn exists_path(&self, a: usize, src: Data, dst: Data) -> bool {
        if dst == 0 {
            return src == 0;
        }
        match self.storers[a][dst as usize] {
            Some(t) => self.next[a][src as usize][t as usize] <= dst,
            None => src == dst,
        }
    }

    fn propagate_data(&mut self, a: usize, n: Data, p: Data) -> bool {
        let mut changed = false;
        if let Some(t) = self.storers[a][n as usize] {
            let key = t as usize;
            if n < self.next[a][p as usize][key] {
                let old = self.next[a][p as usize][key];
                self.journal.record(Entry::NextVal { addr: a, data: p, t: key, old });
                self.next[a][p as usize][key] = n;
                changed = true;
            }
        }
        changed
    }

    fn propagate_next_val(&mut self, a: usize, n: Data, p: Data) -> bool {
        let mut changed = false;
        for t in 0..self.next[a][0].len() {
            let nv = self.next[a][n as usize][t];
            if nv < self.next[a][p as usize][t] {
                let old = self.next[a][p as usize][t];
                self.journal.record(Entry::NextVal { addr: a, data: p, t, old });
                self.next[a][p as usize][t] = nv;
                changed = true;
            }
        }
        changed
    }

    fn compute_next(&mut self, trace: &Trace) -> bool {
        for a in 0..trace.num_addrs {
            let order = match self.val_orders[a].rev_top_sort() {
                Some(o) => o,
                None => return false,
            };
            for n in order {
                let n = n as Data;
                for p in self.val_orders[a].incoming(n as usize).collect::<Vec<_>>() {
                    let p = p as Data;
                    self.propagate_data(a, n, p);
                    self.propagate_next_val(a, n, p);
                }
            }
        }
        true
    }

    /// Collapses chains of back-to-back atomic RMWs so that the rewrite
    /// step in `add_edge_fast`/`add_edge` always lands on the far end of an
    /// atomic chain in one hop.
    ///
    /// `w_roots` are the roots of the W->R chain (write values never
    /// themselves read atomically again); `r_roots` are the roots of the
    /// R->W chain (read values never themselves produced by an atomic
    /// write within this chain). The first loop walks backward from each
    /// `w_roots` entry to populate `new_r_to_w`; the second loop walks
    /// forward from each `r_roots` entry, using that root's own read value
    /// as the base, to populate `new_w_to_r`.
    fn compute_atomic_closures(&mut self, trace: &Trace) {
        for a in 0..trace.num_addrs {
            let d = trace.num_data[a].max(1);
            let mut new_r_to_w: Vec<Option<Data>> = vec![None; d];
            let mut new_w_to_r: Vec<Option<Data>> = vec![None; d];

            let w_roots: Vec<Data> = (0..d as Data)
                .filter(|&w| {
                    self.atomic_w_to_r[a][w as usize].is_some()
                        && self.atomic_r_to_w[a][w as usize].is_none()
                })
                .collect();
            let r_roots: Vec<Data> = (0..d as Data)
                .filter(|&r| {
                    self.atomic_r_to_w[a][r as usize].is_some()
                        && self.atomic_w_to_r[a][r as usize].is_none()
                })
                .collect();

            for &w in &w_roots {
                let mut cur = w;
                while let Some(r) = self.atomic_w_to_r[a][cur as usize] {
                    new_r_to_w[r as usize] = Some(w);
                    cur = r;
                }
            }
            for &r in &r_roots {
                let base = r;
                let mut cur = r;
                while let Some(w) = self.atomic_r_to_w[a][cur as usize] {
                    new_w_to_r[w as usize] = Some(base);
                    cur = w;
                }
            }

            self.atomic_r_to_w[a] = new_r_to_w;
            self.atomic_w_to_r[a] = new_w_to_r;
        }
    }

    /// Unjournaled: used only while building the permanent fact base, never
    /// during the backtracking search.
    fn add_edge_fast(&mut self, trace: &Trace, a: usize, from: Data, to: Data) {
        if from == to || self.exists_path(a, from, to) {
            return;
        }
        let from = self.atomic_r_to_w[a][from as usize].unwrap_or(from);
        let to = self.atomic_w_to_r[a][to as usize].unwrap_or(to);
        if from == to {
            return;
        }
        if trace.final_vals[a] == Some(from) {
            self.val_orders[a].add_edge(from as usize, from as usize);
            return;
        }
        self.val_orders[a].add_edge(from as usize, to as usize);
    }

    /// Backtrackable: journals the edge and rescans via the `next` summary,
    /// failing if the propagation reaches back to `to`.
    fn add_edge(&mut self, trace: &Trace, a: usize, from: Data, to: Data) -> bool {
        if from == to || self.exists_path(a, from, to) {
            return true;
        }
        if self.exists_path(a, to, from) {
            return false;
        }
        let from = self.atomic_r_to_w[a][from as usize].unwrap_or(from);
        let to = self.atomic_w_to_r[a][to as usize].unwrap_or(to);
        if from == to {
            return true;
        }
        if trace.final_vals[a] == Some(from) {
            return false;
        }

        self.journal.record(Entry::AddEdgeVal { addr: a, from, to });
        self.val_orders[a].add_edge(from as usize, to as usize);

        self.propagate_data(a, to, from);
        self.propagate_next_val(a, to, from);

        let mut worklist = VecDeque::new();
        worklist.push_back(from);
        while let Some(n) = worklist.pop_front() {
            if n == to {
                return false;
            }
            for p in self.val_orders[a].incoming(n as usize).collect::<Vec<_>>() {
                let p = p as Data;
                let c1 = self.propagate_data(a, n, p);
                let c2 = self.propagate_next_val(a, n, p);
                if c1 || c2 {
                    worklist.push_back(p);
                }
            }
        }
        true
    }

    fn add_atomic_edges(&mut self, trace: &Trace) -> bool {
        let prev_seen = trace.compute_prev_seen();
        for ins in &trace.instrs {
            if ins.op != Op::Rmw {
                continue;
            }
            let a = ins.addr as usize;
            let (r, w) = (ins.read_val, ins.write_val);
            if self.atomic_r_to_w[a][r as usize].is_some() {
                return false;
            }
            if trace.final_vals[a] == Some(r) {
                return false;
            }
            self.atomic_r_to_w[a][r as usize] = Some(w);
            self.atomic_w_to_r[a][w as usize] = Some(r);

            if let Some(p) = prev_seen[ins.uid][a] {
                if p != r {
                    self.add_edge_fast(trace, a, p, r);
                }
            }
            self.add_edge_fast(trace, a, r, w);
        }
        if !self.compute_next(trace) {
            return false;
        }
        self.compute_atomic_closures(trace);
        true
    }

    fn add_local_edges(&mut self, trace: &Trace) {
        for thread in &trace.threads {
            let mut prev: HashMap<Addr, Data> = HashMap::new();
            for &uid in thread {
                let ins = trace.instrs[uid];
                if !ins.has_addr() {
                    continue;
                }
                let a = ins.addr as usize;
                if ins.is_load() {
                    if let Some(&p) = prev.get(&ins.addr) {
                        self.add_edge_fast(trace, a, p, ins.read_val);
                    }
                    prev.insert(ins.addr, ins.read_val);
                }
                if ins.is_store() {
                    if let Some(&p) = prev.get(&ins.addr) {
                        self.add_edge_fast(trace, a, p, ins.write_val);
                    }
                    prev.insert(ins.addr, ins.write_val);
                }
            }
        }
        for e in edges::local_dep_edges(trace).into_iter().chain(edges::local_wmo_edges(trace)) {
            self.op_order.add_edge(e.src, e.dst);
            self.local_op_order.add_edge(e.src, e.dst);
        }
    }

    fn add_comm_edges(&mut self, trace: &Trace) -> bool {
        for uid in 0..trace.num_instrs {
            if trace.instrs[uid].is_load() {
                if let Some(s) = trace.reads_from[uid] {
                    self.op_order.add_edge(s, uid);
                }
            }
        }
        self.add_sync_edges(trace)
    }

    fn add_sync_edges(&mut self, trace: &Trace) -> bool {
        let order = match self.op_order.top_sort() {
            Some(o) => o,
            None => return false,
        };
        let t_count = trace.num_threads;
        let mut prev_syncs: Vec<Vec<Option<InstrId>>> = vec![vec![None; t_count]; trace.num_instrs];

        for &n in &order {
            for p in self.op_order.incoming(n).collect::<Vec<_>>() {
                for t in 0..t_count {
                    if let Some(pv) = prev_syncs[p][t] {
                        if prev_syncs[n][t].map_or(true, |nv| pv > nv) {
                            prev_syncs[n][t] = Some(pv);
                        }
                    }
                }
            }
            if trace.instrs[n].op == Op::Sync {
                prev_syncs[n][trace.instrs[n].tid as usize] = Some(n);
            }
        }

        for &n in &order {
            let ins = trace.instrs[n];
            if ins.op == Op::Sync {
                for t in 0..t_count {
                    if let Some(prev) = prev_syncs[n][t] {
                        self.add_edges_fast(trace, prev, n);
                    }
                }
            }
            if ins.is_load() {
                if let Some(next) = trace.begin_after(n) {
                    for t in 0..t_count {
                        if let Some(prev) = prev_syncs[n][t] {
                            self.add_edges_fast(trace, prev, next);
                        }
                    }
                }
            }
        }
        true
    }

    fn add_edges_fast(&mut self, trace: &Trace, u: InstrId, v: InstrId) {
        for a in 0..trace.num_addrs {
            let from = self.prev_seen[u][a].unwrap_or(0);
            let to = self.next_seen[v][a].unwrap_or(0);
            self.add_edge_fast(trace, a, from, to);
        }
    }

    fn add_edges(&mut self, trace: &Trace, u: InstrId, v: InstrId) -> bool {
        for a in 0..trace.num_addrs {
            let from = self.prev_seen[u][a].unwrap_or(0);
            let to = self.next_seen[v][a].unwrap_or(0);
            if !self.add_edge(trace, a, from, to) {
                return false;
            }
        }
        true
    }

    fn edges_exist(&self, trace: &Trace, u: InstrId, v: InstrId) -> bool {
        for a in 0..trace.num_addrs {
            let from = self.prev_seen[u][a].unwrap_or(0);
            let to = self.next_seen[v][a].unwrap_or(0);
            if !self.exists_path(a, from, to) {
                return false;
            }
        }
        true
    }

    fn use_sync_times(&mut self, trace: &Trace) {
        let syncs: Vec<InstrId> =
            (0..trace.num_instrs).filter(|&u| trace.instrs[u].op == Op::Sync).collect();
        for &s1 in &syncs {
            for &s2 in &syncs {
                if s1 == s2 || trace.instrs[s1].tid == trace.instrs[s2].tid {
                    continue;
                }
                if let (Some(e1), Some(b2)) = (trace.instrs[s1].end_time, trace.instrs[s2].begin_time) {
                    if e1 < b2 {
                        self.journal.record(Entry::AddEdgeOp(s1, s2));
                        self.op_order.add_edge(s1, s2);
                        self.local_op_order.add_edge(s1, s2);
                    }
                }
            }
        }
    }

    fn delete_node(&mut self, n: NodeId) {
        self.journal.record(Entry::DelNode(n));
        self.op_order.del_node(n);
        self.local_op_order.del_node(n);
        self.count += 1;
    }

    /// Deletes any root that is LD/ST/RMW/NOP, repeatedly.
    fn consume(&mut self, trace: &Trace) {
        loop {
            let pick = self
                .op_order
                .roots()
                .into_iter()
                .find(|&r| matches!(trace.instrs[r].op, Op::Ld | Op::St | Op::Rmw | Op::Nop));
            match pick {
                Some(r) => self.delete_node(r),
                None => break,
            }
        }
    }

    /// Deletes a SYNC root only when every other thread's local-order
    /// frontier already has the value-order edges this sync would impose.
    fn consume_syncs(&mut self, trace: &Trace) {
        loop {
            let pick = self
                .op_order
                .roots()
                .into_iter()
                .find(|&r| trace.instrs[r].op == Op::Sync && self.sync_satisfied(trace, r));
            match pick {
                Some(r) => self.delete_node(r),
                None => break,
            }
        }
    }

    fn sync_satisfied(&self, trace: &Trace, n: InstrId) -> bool {
        let tid_n = trace.instrs[n].tid;
        for dst in self.local_op_order.roots() {
            if trace.instrs[dst].tid == tid_n {
                continue;
            }
            let ok = match trace.instrs[dst].op {
                Op::Sync => self.edges_exist(trace, n, dst),
                Op::Ld | Op::Rmw => {
                    let a = trace
                        .begin_after(dst)
                        .map_or(true, |nx| self.edges_exist(trace, n, nx));
                    let b = trace.next_sync[dst].map_or(true, |nx| self.edges_exist(trace, n, nx));
                    a && b
                }
                _ => true,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn attempt_sync(&mut self, trace: &Trace, n: InstrId) -> bool {
        let tid_n = trace.instrs[n].tid;
        for dst in self.local_op_order.roots() {
            if trace.instrs[dst].tid == tid_n {
                continue;
            }
            match trace.instrs[dst].op {
                Op::Sync => {
                    if !self.add_edges(trace, n, dst) {
                        return false;
                    }
                }
                Op::Ld | Op::Rmw => {
                    if let Some(nx) = trace.begin_after(dst) {
                        if !self.add_edges(trace, n, nx) {
                            return false;
                        }
                    }
                    if let Some(nx) = trace.next_sync[dst] {
                        if !self.add_edges(trace, n, nx) {
                            return false;
                        }
                    }
                }
                _ => {}
            }
        }
        true
    }
}

/// Admits `trace` under POW, optionally assuming a global clock domain.
pub fn check(trace: &Trace, global_clock: bool) -> bool {
    debug!(num_instrs = trace.num_instrs, global_clock, "valorder: building value-order graphs");
    let mut eng = Engine::new(trace);

    if !eng.add_atomic_edges(trace) {
        debug!("valorder: addAtomicEdges rejected the trace");
        return false;
    }
    eng.add_local_edges(trace);
    if !eng.add_comm_edges(trace) {
        debug!("valorder: addCommEdges found a cycle");
        return false;
    }
    if global_clock {
        eng.use_sync_times(trace);
    }

    eng.consume(trace);
    eng.consume_syncs(trace);

    let mut stack: Vec<Option<NodeId>> = eng
        .op_order
        .roots()
        .into_iter()
        .filter(|&r| trace.instrs[r].op == Op::Sync)
        .map(Some)
        .collect();

    loop {
        if eng.count == trace.num_instrs {
            debug!("valorder: search accepted the trace");
            return true;
        }
        match stack.pop() {
            None => {
                debug!("valorder: search exhausted, trace rejected");
                return false;
            }
            Some(None) => {
                let mut journal = mem::take(&mut eng.journal);
                journal.backtrack(&mut eng);
                eng.journal = journal;
            }
            Some(Some(node)) => {
                eng.journal.checkpoint();
                if !eng.attempt_sync(trace, node) {
                    let mut journal = mem::take(&mut eng.journal);
                    journal.backtrack(&mut eng);
                    eng.journal = journal;
                    continue;
                }
                eng.delete_node(node);
                eng.consume(trace);
                eng.consume_syncs(trace);

                stack.push(None);
                for r in eng.op_order.roots() {
                    if trace.instrs[r].op == Op::Sync {
                        stack.push(Some(r));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::Instr;

    fn instr(uid: usize, tid: u32, op: Op, addr: u32, rv: u32, wv: u32) -> Instr {
        Instr {
            uid,
            tid,
            op,
            addr,
            read_val: rv,
            write_val: wv,
            begin_time: None,
            end_time: None,
            line: (uid + 1) as u32,
        }
    }

    #[test]
    fn store_buffering_admitted_under_pow() {
        let raw = vec![
            instr(0, 0, Op::St, 0, 0, 1),
            instr(1, 0, Op::Ld, 1, 0, 0),
            instr(2, 1, Op::St, 1, 0, 1),
            instr(3, 1, Op::Ld, 0, 0, 0),
        ];
        let t = Trace::new(raw).unwrap();
        assert!(check(&t, false));
    }

    #[test]
    fn coherence_violation_rejected_under_pow() {
        let raw = vec![
            instr(0, 0, Op::St, 0, 0, 1),
            instr(1, 0, Op::St, 0, 0, 2),
            instr(2, 1, Op::Ld, 0, 2, 0),
            instr(3, 1, Op::Ld, 0, 1, 0),
        ];
        let t = Trace::new(raw).unwrap();
        assert!(!check(&t, false));
    }

    #[test]
    fn duplicate_atomic_read_rejected() {
        // T0: {x==0; x:=1}; T1: {x==0; x:=2} -- both RMWs claim read value 0.
        let raw = vec![
            instr(0, 0, Op::Rmw, 0, 0, 1),
            instr(1, 1, Op::Rmw, 0, 0, 2),
        ];
        let t = Trace::new(raw).unwrap();
        assert!(!check(&t, false));
    }

    #[test]
    fn atomic_chain_closure_points_every_hop_at_the_root() {
        // T0: {x==0; x:=1}; T1: {x==1; x:=2} -- a 2-hop atomic RMW chain.
        // Every value along the chain must canonicalize back to the read
        // that started it (0), not just to its immediate predecessor.
        let raw = vec![
            instr(0, 0, Op::Rmw, 0, 0, 1),
            instr(1, 1, Op::Rmw, 0, 1, 2),
        ];
        let t = Trace::new(raw).unwrap();
        let mut eng = Engine::new(&t);
        assert!(eng.add_atomic_edges(&t));
        assert_eq!(eng.atomic_w_to_r[0][1], Some(0));
        assert_eq!(eng.atomic_w_to_r[0][2], Some(0));
    }

    #[test]
    fn message_passing_with_full_barriers_rejected_under_pow() {
        let raw = vec![
            instr(0, 0, Op::St, 0, 0, 1),
            instr(1, 0, Op::Sync, 0, 0, 0),
            instr(2, 0, Op::St, 1, 0, 1),
            instr(3, 1, Op::Ld, 1, 1, 0),
            instr(4, 1, Op::Sync, 0, 0, 0),
            instr(5, 1, Op::Ld, 0, 0, 0),
        ];
        let t = Trace::new(raw).unwrap();
        assert!(!check(&t, false));
    }
}
