//! Canonicalizes a parsed instruction list into dense ids and the derived
//! tables the edge builders and engines need (spec section 3, section 4.3;
//! `original_source/src/Trace.h`).

use std::collections::HashMap;

use tracing::debug;

use crate::error::{AxeError, Result};
use crate::hashtab::IntHash;
use crate::instr::{Addr, Data, Instr, InstrId, Op, ThreadId, MAX_ADDRS, MAX_THREADS};
use crate::seq::Seq;

#[derive(Debug)]
pub struct Trace {
    pub num_instrs: usize,
    pub num_threads: usize,
    pub num_addrs: usize,
    pub num_data: Vec<usize>,
    pub num_syncs: usize,
    pub num_rmws: usize,

    /// Dense uid `0..num_instrs`; LD/ST/RMW/SYNC/NOP only.
    pub instrs: Vec<Instr>,
    /// FINAL constraints, each given a node id `num_instrs + index` so the
    /// SC/TSO/PSO/WMO engine can place them in the same happens-before
    /// graph as real instructions.
    pub finals: Vec<Instr>,

    pub final_vals: Vec<Option<Data>>,

    pub reads_from: Vec<Option<InstrId>>,
    pub reads_from_inv: Vec<Seq<InstrId>>,

    pub threads: Vec<Vec<InstrId>>,

    pub prev_local_store: Vec<Option<InstrId>>,
    pub next_local_store: Vec<Option<InstrId>>,
    pub next_local_load: Vec<Option<InstrId>>,

    /// `[addr][tid]`
    pub first_store: Vec<Vec<Option<InstrId>>>,
    /// `[addr][tid]`
    pub final_store: Vec<Vec<Option<InstrId>>>,

    pub prev_sync: Vec<Option<InstrId>>,
    pub next_sync: Vec<Option<InstrId>>,
    pub first_sync: Vec<Option<InstrId>>,

    pub next_begin: Vec<Option<InstrId>>,
}

impl Trace {
    /// Total node count for the instruction-level happens-before graph:
    /// real instructions plus one pseudo-node per FINAL constraint.
    pub fn total_nodes(&self) -> usize {
        self.num_instrs + self.finals.len()
    }

    pub fn new(raw: Vec<Instr>) -> Result<Trace> {
        for (i, ins) in raw.iter().enumerate() {
            if ins.uid != i {
                return Err(AxeError::trace(
                    ins.line,
                    format!("instruction id {} out of range", ins.uid),
                ));
            }
        }

        // Pass 1: separate FINAL items into a side list; count SYNCs/RMWs.
        let mut instrs: Vec<Instr> = Vec::new();
        let mut finals: Vec<Instr> = Vec::new();
        let mut num_syncs = 0usize;
        let mut num_rmws = 0usize;
        for ins in raw {
            match ins.op {
                Op::Final => finals.push(ins),
                Op::Sync => {
                    num_syncs += 1;
                    instrs.push(ins);
                }
                Op::Rmw => {
                    num_rmws += 1;
                    instrs.push(ins);
                }
                Op::End => {
                    return Err(AxeError::trace(
                        ins.line,
                        "unexpected END token inside a single trace",
                    ));
                }
                _ => instrs.push(ins),
            }
        }
        for (i, ins) in instrs.iter_mut().enumerate() {
            ins.uid = i;
        }
        let num_instrs = instrs.len();
        debug!(num_instrs, num_finals = finals.len(), num_syncs, num_rmws, "pass 1 done");

        // Pass 2: compact thread/address ranges.
        let mut thread_map: HashMap<ThreadId, ThreadId> = HashMap::new();
        let mut addr_map: HashMap<Addr, Addr> = HashMap::new();
        for ins in instrs.iter_mut().chain(finals.iter_mut()) {
            ins.tid = intern(&mut thread_map, ins.tid, MAX_THREADS, ins.line, "thread")?;
            if ins.has_addr() {
                ins.addr = intern(&mut addr_map, ins.addr, MAX_ADDRS, ins.line, "address")?;
            }
        }
        let num_threads = thread_map.len();
        let num_addrs = addr_map.len();
        for (i, f) in finals.iter_mut().enumerate() {
            f.uid = num_instrs + i;
        }

        // Pass 3: compact data ranges per address. Value 0 is always dense
        // index 0 (the reserved initial value); nonzero values are
        // assigned dense ids in order of first appearance via the
        // chained-bucket hash (spec section 4.3 pass 3).
        let mut data_maps: Vec<IntHash<Data>> = (0..num_addrs).map(|_| IntHash::new()).collect();
        let mut num_data = vec![1usize; num_addrs];

        for ins in instrs.iter_mut() {
            if ins.is_store() && ins.write_val == 0 {
                return Err(AxeError::trace(ins.line, "write of value 0 is forbidden"));
            }
            if ins.is_store() {
                ins.write_val = compact_value(
                    &mut data_maps[ins.addr as usize],
                    &mut num_data[ins.addr as usize],
                    ins.addr,
                    ins.write_val,
                );
            }
            if ins.is_load() {
                ins.read_val = compact_value(
                    &mut data_maps[ins.addr as usize],
                    &mut num_data[ins.addr as usize],
                    ins.addr,
                    ins.read_val,
                );
            }
        }
        for f in finals.iter_mut() {
            f.read_val = compact_value(
                &mut data_maps[f.addr as usize],
                &mut num_data[f.addr as usize],
                f.addr,
                f.read_val,
            );
        }
        debug!(num_threads, num_addrs, "pass 2/3 done");

        // Pass 4: reads-from, and final-value constraints.
        let mut producer: IntHash<InstrId> = IntHash::new();
        let mut reads_from: Vec<Option<InstrId>> = vec![None; num_instrs];
        let mut reads_from_inv: Vec<Seq<InstrId>> = vec![Seq::new(); num_instrs];

        for ins in &instrs {
            if ins.is_store() {
                let key = rf_key(ins.addr, ins.write_val, num_addrs);
                if producer.member(key) {
                    return Err(AxeError::trace(ins.line, "reads-from ambiguous: two stores write the same (address, value)"));
                }
                producer.insert(key, ins.uid);
            }
        }
        for ins in &instrs {
            if ins.is_load() {
                if ins.read_val == 0 {
                    reads_from[ins.uid] = None;
                } else {
                    let key = rf_key(ins.addr, ins.read_val, num_addrs);
                    match producer.lookup(key) {
                        Some(store) => {
                            reads_from[ins.uid] = Some(store);
                            reads_from_inv[store].push(ins.uid);
                        }
                        None => {
                            return Err(AxeError::trace(
                                ins.line,
                                "load reads a value with no matching store",
                            ));
                        }
                    }
                }
            }
        }

        let mut final_vals: Vec<Option<Data>> = vec![None; num_addrs];
        for f in &finals {
            let val = if f.read_val == 0 {
                Some(0)
            } else {
                let key = rf_key(f.addr, f.read_val, num_addrs);
                if producer.lookup(key).is_none() {
                    return Err(AxeError::trace(
                        f.line,
                        "final value constraint references a value with no matching store",
                    ));
                }
                Some(f.read_val)
            };
            match final_vals[f.addr as usize] {
                None => final_vals[f.addr as usize] = val,
                Some(existing) if Some(existing) == val => {}
                Some(_) => {
                    return Err(AxeError::trace(
                        f.line,
                        "contradictory final-value constraints on the same address",
                    ))
                }
            }
        }

        // Pass 5: split into per-thread ordered id lists.
        let mut threads: Vec<Vec<InstrId>> = vec![Vec::new(); num_threads];
        for ins in &instrs {
            threads[ins.tid as usize].push(ins.uid);
        }

        // Pass 6: sanity-check timestamps.
        for thread in &threads {
            let mut prev_begin: Option<i64> = None;
            for &uid in thread {
                let ins = &instrs[uid];
                if ins.is_store() && ins.end_time.is_some() {
                    return Err(AxeError::trace(ins.line, "a store may not carry an end time"));
                }
                if let (Some(b), Some(e)) = (ins.begin_time, ins.end_time) {
                    if e <= b {
                        return Err(AxeError::trace(ins.line, "end time must exceed begin time"));
                    }
                }
                if let Some(b) = ins.begin_time {
                    if let Some(pb) = prev_begin {
                        if b <= pb {
                            return Err(AxeError::trace(
                                ins.line,
                                "begin time must strictly increase within a thread",
                            ));
                        }
                    }
                    prev_begin = Some(b);
                }
            }
        }

        // Pass 7: derived tables.
        let mut prev_local_store = vec![None; num_instrs];
        let mut next_local_store = vec![None; num_instrs];
        let mut next_local_load = vec![None; num_instrs];
        let mut first_store: Vec<Vec<Option<InstrId>>> = vec![vec![None; num_threads]; num_addrs];
        let mut final_store: Vec<Vec<Option<InstrId>>> = vec![vec![None; num_threads]; num_addrs];
        let mut prev_sync = vec![None; num_instrs];
        let mut next_sync = vec![None; num_instrs];
        let mut first_sync: Vec<Option<InstrId>> = vec![None; num_threads];
        let mut next_begin = vec![None; num_instrs];

        for (tid, thread) in threads.iter().enumerate() {
            let mut last_store_by_addr: HashMap<Addr, InstrId> = HashMap::new();
            let mut last_load_by_addr: HashMap<Addr, InstrId> = HashMap::new();
            let mut last_sync: Option<InstrId> = None;

            for &uid in thread {
                let ins = instrs[uid];

                if ins.has_addr() {
                    if let Some(&prev) = last_store_by_addr.get(&ins.addr) {
                        prev_local_store[uid] = Some(prev);
                    }
                }
                if ins.is_store() {
                    first_store[ins.addr as usize][tid].get_or_insert(uid);
                    final_store[ins.addr as usize][tid] = Some(uid);
                    last_store_by_addr.insert(ins.addr, uid);
                }
                if ins.is_load() {
                    last_load_by_addr.insert(ins.addr, uid);
                }

                prev_sync[uid] = last_sync;
                if ins.op == Op::Sync {
                    if first_sync[tid].is_none() {
                        first_sync[tid] = Some(uid);
                    }
                    last_sync = Some(uid);
                }
            }

            // Backward sweep for next_local_store / next_local_load / next_sync / next_begin.
            let mut next_store_by_addr: HashMap<Addr, InstrId> = HashMap::new();
            let mut next_load_by_addr: HashMap<Addr, InstrId> = HashMap::new();
            let mut next_sync_uid: Option<InstrId> = None;
            let mut next_begin_uid: Option<InstrId> = None;

            for &uid in thread.iter().rev() {
                let ins = instrs[uid];

                if ins.has_addr() {
                    if let Some(&nxt) = next_load_by_addr.get(&ins.addr) {
                        next_local_load[uid] = Some(nxt);
                    }
                    if let Some(&nxt) = next_store_by_addr.get(&ins.addr) {
                        next_local_store[uid] = Some(nxt);
                    }
                }

                next_sync[uid] = next_sync_uid;
                next_begin[uid] = next_begin_uid;

                if ins.op == Op::Sync {
                    next_sync_uid = Some(uid);
                }
                if ins.begin_time.is_some() {
                    next_begin_uid = Some(uid);
                }
                if ins.is_store() {
                    next_store_by_addr.insert(ins.addr, uid);
                }
                if ins.is_load() {
                    next_load_by_addr.insert(ins.addr, uid);
                }
            }
        }

        Ok(Trace {
            num_instrs,
            num_threads,
            num_addrs,
            num_data,
            num_syncs,
            num_rmws,
            instrs,
            finals,
            final_vals,
            reads_from,
            reads_from_inv,
            threads,
            prev_local_store,
            next_local_store,
            next_local_load,
            first_store,
            final_store,
            prev_sync,
            next_sync,
            first_sync,
            next_begin,
        })
    }

    /// First instruction strictly after `load` in its own thread's program
    /// order whose `begin_time` strictly exceeds `load`'s `end_time`.
    /// Relies on `next_begin` to skip instructions with no timestamp.
    pub fn begin_after(&self, load: InstrId) -> Option<InstrId> {
        let threshold = self.instrs[load].end_time?;
        let mut cursor = self.next_begin[load];
        while let Some(uid) = cursor {
            let b = self.instrs[uid].begin_time.expect("next_begin only points at timed instrs");
            if b > threshold {
                return Some(uid);
            }
            cursor = self.next_begin[uid];
        }
        None
    }

    /// On-demand per-(instruction, address) table: the latest value known
    /// present at `addr` at or before `uid` in program order (its own
    /// thread). `None` means "still the reserved initial value".
    pub fn compute_prev_seen(&self) -> Vec<Vec<Option<Data>>> {
        let mut out = vec![vec![None; self.num_addrs]; self.num_instrs];
        for thread in &self.threads {
            let mut seen: Vec<Option<Data>> = vec![None; self.num_addrs];
            for &uid in thread {
                let ins = self.instrs[uid];
                out[uid] = seen.clone();
                if ins.is_store() {
                    seen[ins.addr as usize] = Some(ins.write_val);
                } else if ins.op == Op::Ld && ins.read_val != 0 {
                    seen[ins.addr as usize] = Some(ins.read_val);
                }
            }
        }
        out
    }

    /// On-demand: the latest value known present at `addr` at or after
    /// `uid` in program order.
    pub fn compute_next_seen(&self) -> Vec<Vec<Option<Data>>> {
        let mut out = vec![vec![None; self.num_addrs]; self.num_instrs];
        for thread in &self.threads {
            let mut seen: Vec<Option<Data>> = vec![None; self.num_addrs];
            for &uid in thread.iter().rev() {
                let ins = self.instrs[uid];
                if ins.is_store() {
                    seen[ins.addr as usize] = Some(ins.write_val);
                } else if ins.op == Op::Ld && ins.read_val != 0 {
                    seen[ins.addr as usize] = Some(ins.read_val);
                }
                out[uid] = seen.clone();
            }
        }
        out
    }
}

fn intern(
    map: &mut HashMap<ThreadId, ThreadId>,
    raw: ThreadId,
    limit: usize,
    line: u32,
    what: &str,
) -> Result<ThreadId> {
    if let Some(&dense) = map.get(&raw) {
        return Ok(dense);
    }
    let dense = map.len() as ThreadId;
    if dense as usize >= limit {
        return Err(AxeError::trace(line, format!("too many distinct {what}s (limit {limit})")));
    }
    map.insert(raw, dense);
    Ok(dense)
}

fn compact_value(map: &mut IntHash<Data>, counter: &mut usize, addr: Addr, raw: u32) -> Data {
    let _ = addr;
    if raw == 0 {
        return 0;
    }
    if let Some(dense) = map.lookup(raw as i64) {
        return dense;
    }
    let dense = *counter as Data;
    *counter += 1;
    map.insert(raw as i64, dense);
    dense
}

fn rf_key(addr: Addr, value: Data, num_addrs: usize) -> i64 {
    value as i64 * num_addrs as i64 + addr as i64
}
