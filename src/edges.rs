//! Pure functions that emit required happens-before edges per model
//! (`original_source/src/Edges.h`, spec section 4.4).

use std::collections::HashMap;

use crate::graph::NodeId;
use crate::instr::{Addr, Op};
use crate::model::ModelTag;
use crate::trace::Trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub src: NodeId,
    pub dst: NodeId,
}

pub fn edge(src: NodeId, dst: NodeId) -> Edge {
    Edge { src, dst }
}

/// The edge set required by `model`, per the table in spec section 4.4.
pub fn for_model(model: ModelTag, trace: &Trace) -> Vec<Edge> {
    let mut out = inter_edges(trace);
    out.extend(initial_value_edges(trace));
    out.extend(final_value_edges(trace));
    match model {
        ModelTag::Sc => out.extend(local_sc_edges(trace)),
        ModelTag::Tso => out.extend(local_tso_edges(trace)),
        ModelTag::Pso => out.extend(local_pso_edges(trace)),
        ModelTag::Wmo => {
            out.extend(local_wmo_edges(trace));
            out.extend(local_dep_edges(trace));
        }
        ModelTag::Pow => unreachable!("POW uses the ValOrder engine, not this table"),
    }
    out
}

/// Consecutive program-order edges between every pair of adjacent
/// instructions in a thread.
pub fn local_sc_edges(trace: &Trace) -> Vec<Edge> {
    let mut out = Vec::new();
    for thread in &trace.threads {
        for w in thread.windows(2) {
            out.push(edge(w[0], w[1]));
        }
    }
    out
}

pub fn local_tso_edges(trace: &Trace) -> Vec<Edge> {
    let mut out = Vec::new();
    for thread in &trace.threads {
        let mut prev_ld: Option<NodeId> = None;
        let mut prev_st: Option<NodeId> = None;
        let mut prev_sync: Option<NodeId> = None;

        for &uid in thread {
            let op = trace.instrs[uid].op;

            if matches!(op, Op::Ld | Op::Rmw) {
                if let Some(p) = prev_ld {
                    out.push(edge(p, uid));
                } else if let Some(p) = prev_sync {
                    out.push(edge(p, uid));
                }
            }
            if matches!(op, Op::St | Op::Rmw) {
                if let Some(p) = prev_st {
                    out.push(edge(p, uid));
                }
            }
            if op == Op::St {
                if let Some(p) = prev_ld {
                    if Some(p) != prev_st {
                        out.push(edge(p, uid));
                    }
                } else if prev_st.is_none() {
                    if let Some(p) = prev_sync {
                        out.push(edge(p, uid));
                    }
                }
            }
            if op == Op::Sync {
                if let Some(p) = prev_ld {
                    out.push(edge(p, uid));
                }
                if let Some(p) = prev_st {
                    if Some(p) != prev_ld {
                        out.push(edge(p, uid));
                    }
                } else if prev_ld.is_none() {
                    if let Some(p) = prev_sync {
                        out.push(edge(p, uid));
                    }
                }
            }

            match op {
                Op::Ld => prev_ld = Some(uid),
                Op::St => prev_st = Some(uid),
                Op::Rmw => {
                    prev_ld = Some(uid);
                    prev_st = Some(uid);
                }
                Op::Sync => {
                    prev_sync = Some(uid);
                    prev_ld = None;
                    prev_st = None;
                }
                _ => {}
            }
        }
    }
    out
}

/// Like `local_tso_edges`, but store-store ordering is tracked per address.
pub fn local_pso_edges(trace: &Trace) -> Vec<Edge> {
    let mut out = Vec::new();
    for thread in &trace.threads {
        let mut prev_ld: Option<NodeId> = None;
        let mut prev_st_by_addr: HashMap<Addr, NodeId> = HashMap::new();
        let mut prev_sync: Option<NodeId> = None;

        for &uid in thread {
            let ins = trace.instrs[uid];
            let op = ins.op;
            let prev_st = if ins.has_addr() {
                prev_st_by_addr.get(&ins.addr).copied()
            } else {
                None
            };

            if matches!(op, Op::Ld | Op::Rmw) {
                if let Some(p) = prev_ld {
                    out.push(edge(p, uid));
                } else if let Some(p) = prev_sync {
                    out.push(edge(p, uid));
                }
            }
            if matches!(op, Op::St | Op::Rmw) {
                if let Some(p) = prev_st {
                    out.push(edge(p, uid));
                }
            }
            if op == Op::St {
                if let Some(p) = prev_ld {
                    if Some(p) != prev_st {
                        out.push(edge(p, uid));
                    }
                } else if prev_st.is_none() {
                    if let Some(p) = prev_sync {
                        out.push(edge(p, uid));
                    }
                }
            }
            if op == Op::Sync {
                for &s in prev_st_by_addr.values() {
                    out.push(edge(s, uid));
                }
                if let Some(p) = prev_ld {
                    out.push(edge(p, uid));
                } else if prev_st_by_addr.is_empty() {
                    if let Some(p) = prev_sync {
                        out.push(edge(p, uid));
                    }
                }
            }

            match op {
                Op::Ld => prev_ld = Some(uid),
                Op::St => {
                    prev_st_by_addr.insert(ins.addr, uid);
                }
                Op::Rmw => {
                    prev_ld = Some(uid);
                    prev_st_by_addr.insert(ins.addr, uid);
                }
                Op::Sync => {
                    prev_sync = Some(uid);
                    prev_ld = None;
                    prev_st_by_addr.clear();
                }
                _ => {}
            }
        }
    }
    out
}

/// Like `local_pso_edges`, but load-load ordering is also tracked per
/// address; SYNC couples to every address's prior load/store.
pub fn local_wmo_edges(trace: &Trace) -> Vec<Edge> {
    let mut out = Vec::new();
    for thread in &trace.threads {
        let mut prev_ld_by_addr: HashMap<Addr, NodeId> = HashMap::new();
        let mut prev_st_by_addr: HashMap<Addr, NodeId> = HashMap::new();
        let mut prev_sync: Option<NodeId> = None;

        for &uid in thread {
            let ins = trace.instrs[uid];
            let op = ins.op;
            let prev_ld = if ins.has_addr() {
                prev_ld_by_addr.get(&ins.addr).copied()
            } else {
                None
            };
            let prev_st = if ins.has_addr() {
                prev_st_by_addr.get(&ins.addr).copied()
            } else {
                None
            };

            if matches!(op, Op::Ld | Op::Rmw) {
                if let Some(p) = prev_ld {
                    out.push(edge(p, uid));
                } else if let Some(p) = prev_sync {
                    out.push(edge(p, uid));
                }
            }
            if matches!(op, Op::St | Op::Rmw) {
                if let Some(p) = prev_st {
                    out.push(edge(p, uid));
                }
            }
            if op == Op::St {
                if let Some(p) = prev_ld {
                    if Some(p) != prev_st {
                        out.push(edge(p, uid));
                    }
                } else if prev_st.is_none() {
                    if let Some(p) = prev_sync {
                        out.push(edge(p, uid));
                    }
                }
            }
            if op == Op::Sync {
                for &l in prev_ld_by_addr.values() {
                    out.push(edge(l, uid));
                }
                for &s in prev_st_by_addr.values() {
                    out.push(edge(s, uid));
                }
                if let Some(p) = prev_sync {
                    out.push(edge(p, uid));
                }
            }

            match op {
                Op::Ld => {
                    prev_ld_by_addr.insert(ins.addr, uid);
                }
                Op::St => {
                    prev_st_by_addr.insert(ins.addr, uid);
                }
                Op::Rmw => {
                    prev_ld_by_addr.insert(ins.addr, uid);
                    prev_st_by_addr.insert(ins.addr, uid);
                }
                Op::Sync => {
                    prev_sync = Some(uid);
                    prev_ld_by_addr.clear();
                    prev_st_by_addr.clear();
                }
                _ => {}
            }
        }
    }
    out
}

/// Timestamp-derived ordering, excluding SYNC instructions (spec section
/// 4.4). An op "finishes" once a later op's `begin_time` strictly exceeds
/// its own `end_time`; every finished op with `end_time` less than the new
/// op's `begin_time` gets an edge to it.
pub fn local_dep_edges(trace: &Trace) -> Vec<Edge> {
    let mut out = Vec::new();
    for thread in &trace.threads {
        let mut in_flight: Vec<NodeId> = Vec::new();
        let mut finished: Vec<NodeId> = Vec::new();

        for &uid in thread {
            let ins = trace.instrs[uid];
            if ins.op == Op::Sync {
                continue;
            }
            let Some(b) = ins.begin_time else { continue };

            let mut still_in_flight = Vec::new();
            for f in in_flight {
                match trace.instrs[f].end_time {
                    Some(fe) if b > fe => finished.push(f),
                    _ => still_in_flight.push(f),
                }
            }
            in_flight = still_in_flight;

            for &f in &finished {
                if let Some(fe) = trace.instrs[f].end_time {
                    if fe < b {
                        out.push(edge(f, uid));
                    }
                }
            }

            in_flight.push(uid);
        }
    }
    out
}

/// For each LD/RMW reading from a store on another thread: the store must
/// precede the load, and the load's thread-local predecessor store (if
/// any) must precede the producing store.
pub fn inter_edges(trace: &Trace) -> Vec<Edge> {
    let mut out = Vec::new();
    for ins in &trace.instrs {
        if !ins.is_load() {
            continue;
        }
        let Some(store) = trace.reads_from[ins.uid] else { continue };
        if trace.instrs[store].tid == ins.tid {
            continue;
        }
        out.push(edge(store, ins.uid));
        if let Some(local) = trace.prev_local_store[ins.uid] {
            out.push(edge(local, store));
        }
    }
    out
}

/// A load reading the reserved initial value (0) must precede every
/// thread's first store to that address.
pub fn initial_value_edges(trace: &Trace) -> Vec<Edge> {
    let mut out = Vec::new();
    for ins in &trace.instrs {
        if !ins.is_load() || ins.read_val != 0 {
            continue;
        }
        for t in 0..trace.num_threads {
            if let Some(store) = trace.first_store[ins.addr as usize][t] {
                out.push(edge(ins.uid, store));
            }
        }
    }
    out
}

/// Edge from the previous local store to a load, when their values differ.
/// Used as a fast local edge by the POW engine, not by the SC/TSO/PSO/WMO
/// table.
pub fn locally_consistent_edges(trace: &Trace) -> Vec<Edge> {
    let mut out = Vec::new();
    for ins in &trace.instrs {
        if !ins.is_load() {
            continue;
        }
        if let Some(store) = trace.prev_local_store[ins.uid] {
            if trace.instrs[store].write_val != ins.read_val {
                out.push(edge(store, ins.uid));
            }
        }
    }
    out
}

/// For each FINAL(a, v): if v is the reserved initial value and any store
/// to `a` exists, the constraint is unsatisfiable (a value of 0 can never
/// be written, so it can never be the *last* value either) -- force
/// failure with a self-loop. Otherwise every thread's final store to `a`
/// must precede the constraint.
pub fn final_value_edges(trace: &Trace) -> Vec<Edge> {
    let mut out = Vec::new();
    for f in &trace.finals {
        let addr = f.addr as usize;
        let any_store = trace.final_store[addr].iter().any(|s| s.is_some());
        if trace.final_vals[addr] == Some(0) {
            if any_store {
                out.push(edge(f.uid, f.uid));
            }
            continue;
        }
        for t in 0..trace.num_threads {
            if let Some(store) = trace.final_store[addr][t] {
                out.push(edge(store, f.uid));
            }
        }
    }
    out
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
    fn local_sc_edges_are_consecutive() {
        let raw = vec![
            instr(0, 0, Op::St, 0, 0, 1),
            instr(1, 0, Op::Ld, 0, 1, 0),
        ];
        let t = Trace::new(raw).unwrap();
        let edges = local_sc_edges(&t);
        assert_eq!(edges, vec![edge(0, 1)]);
    }

    #[test]
    fn inter_edge_for_cross_thread_read() {
        let raw = vec![
            instr(0, 0, Op::St, 0, 0, 1),
            instr(1, 1, Op::Ld, 0, 1, 0),
        ];
        let t = Trace::new(raw).unwrap();
        let edges = inter_edges(&t);
        assert!(edges.contains(&edge(0, 1)));
    }

    #[test]
    fn initial_value_edge_orders_load_before_first_store() {
        let raw = vec![
            instr(0, 0, Op::Ld, 0, 0, 0),
            instr(1, 1, Op::St, 0, 0, 5),
        ];
        let t = Trace::new(raw).unwrap();
        let edges = initial_value_edges(&t);
        assert!(edges.contains(&edge(0, 1)));
    }

    #[test]
    fn final_value_self_loop_when_zero_required_but_store_exists() {
        let raw = vec![
            instr(0, 0, Op::St, 0, 0, 1),
            instr(1, 0, Op::Final, 0, 0, 0),
        ];
        let t = Trace::new(raw).unwrap();
        let edges = final_value_edges(&t);
        assert!(edges.contains(&edge(1, 1)));
    }
}
