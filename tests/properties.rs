//! Property tests for the invariants spec section 8 calls out: model
//! monotonicity (SC implies TSO implies PSO implies WMO), canonicalization
//! producing dense ranges, the `-i`/ignore-timestamps flag depending only
//! on op/tid/addr/values, and backtrack soundness of the generic journal.

use std::collections::BTreeSet;

use proptest::prelude::*;

use axe::instr::{Instr, Op};
use axe::journal::{Journal, Undo};
use axe::model::{self, ModelTag, Options};
use axe::trace::Trace;

/// Builds a trace from a flat list of `(tid_bit, addr_bit, kind)` specs over
/// two threads and two addresses. `kind % 3 == 0` stores a fresh value,
/// `== 1` loads the reserved initial value, and `== 2` loads back the most
/// recent store this generator made to that address (or the initial value,
/// if none yet) -- by construction every load's value already has a matching
/// store (or is the initial value), so the result is always a valid trace.
fn build_trace(specs: &[(bool, bool, u8)]) -> Option<Trace> {
    let mut raw = Vec::with_capacity(specs.len());
    let mut last_store_val: [Option<u32>; 2] = [None, None];
    let mut next_val: u32 = 1;

    for (uid, &(tid_bit, addr_bit, kind)) in specs.iter().enumerate() {
        let tid = tid_bit as u32;
        let addr = addr_bit as u32;
        let (op, read_val, write_val) = match kind % 3 {
            0 => {
                let v = next_val;
                next_val += 1;
                last_store_val[addr as usize] = Some(v);
                (Op::St, 0, v)
            }
            1 => (Op::Ld, 0, 0),
            _ => match last_store_val[addr as usize] {
                Some(v) => (Op::Ld, v, 0),
                None => (Op::Ld, 0, 0),
            },
        };
        raw.push(Instr {
            uid,
            tid,
            op,
            addr,
            read_val,
            write_val,
            begin_time: None,
            end_time: None,
            line: 1,
        });
    }
    Trace::new(raw).ok()
}

fn spec_strategy() -> impl Strategy<Value = Vec<(bool, bool, u8)>> {
    proptest::collection::vec((any::<bool>(), any::<bool>(), any::<u8>()), 0..8)
}

proptest! {
    #[test]
    fn model_monotonicity(specs in spec_strategy()) {
        if let Some(trace) = build_trace(&specs) {
            let opts = Options::default();
            let sc = model::check(&trace, ModelTag::Sc, opts);
            let tso = model::check(&trace, ModelTag::Tso, opts);
            let pso = model::check(&trace, ModelTag::Pso, opts);
            let wmo = model::check(&trace, ModelTag::Wmo, opts);

            prop_assert!(!sc || tso, "SC accepted but TSO rejected");
            prop_assert!(!tso || pso, "TSO accepted but PSO rejected");
            prop_assert!(!pso || wmo, "PSO accepted but WMO rejected");
        }
    }

    #[test]
    fn canonicalization_is_dense(specs in spec_strategy()) {
        if let Some(trace) = build_trace(&specs) {
            for ins in &trace.instrs {
                prop_assert!((ins.tid as usize) < trace.num_threads);
                if ins.has_addr() {
                    prop_assert!((ins.addr as usize) < trace.num_addrs);
                    prop_assert!((ins.read_val as usize) < trace.num_data[ins.addr as usize]);
                    prop_assert!((ins.write_val as usize) < trace.num_data[ins.addr as usize]);
                }
            }
            for (uid, ins) in trace.instrs.iter().enumerate() {
                prop_assert_eq!(ins.uid, uid);
            }
        }
    }
}

/// `-i` drops every timestamp before checking; two traces that agree on
/// op/tid/addr/values but disagree only on timestamps must then agree on
/// every model's verdict.
#[test]
fn ignore_timestamps_flag_erases_timing_differences() {
    let with_sync_times = "\
        0: sync @0:5\n\
        0: M[0] := 1\n\
        1: M[0] == 1\n\
        1: sync @10:20\n";
    let without_times = "\
        0: sync\n\
        0: M[0] := 1\n\
        1: M[0] == 1\n\
        1: sync\n";

    let parse = |src: &str| {
        let mut p = axe::parser::Parser::new(src);
        p.parse_batch().unwrap().unwrap()
    };

    let mut timed = parse(with_sync_times);
    for ins in &mut timed {
        ins.begin_time = None;
        ins.end_time = None;
    }
    let stripped_by_flag = Trace::new(timed).unwrap();
    let never_timed = Trace::new(parse(without_times)).unwrap();

    let opts = Options { global_clock: true, ignore_times: true };
    for model in [ModelTag::Sc, ModelTag::Tso, ModelTag::Pso, ModelTag::Wmo, ModelTag::Pow] {
        assert_eq!(
            model::check(&stripped_by_flag, model, opts),
            model::check(&never_timed, model, opts),
            "model {model} disagreed after timestamps were stripped"
        );
    }
}

/// A small stand-in engine exercising the same `write`/`add_edge`/`del_node`
/// shape as `analysis::Engine`/`valorder::Engine`, used to property-test
/// `Journal` itself rather than any one engine's particular fields.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JournalTarget {
    cells: Vec<i32>,
    edges: BTreeSet<(usize, usize)>,
    present: Vec<bool>,
}

#[derive(Debug, Clone, Copy)]
enum JournalOp {
    Write { idx: usize, val: i32 },
    AddEdge { from: usize, to: usize },
    DelNode { idx: usize },
}

#[derive(Debug)]
enum JournalEntry {
    Write { idx: usize, old: i32 },
    AddEdge { from: usize, to: usize },
    DelNode { idx: usize, old: bool },
}

impl Undo for JournalEntry {
    type Target = JournalTarget;

    fn undo(self, target: &mut JournalTarget) {
        match self {
            JournalEntry::Write { idx, old } => target.cells[idx] = old,
            JournalEntry::AddEdge { from, to } => {
                target.edges.remove(&(from, to));
            }
            JournalEntry::DelNode { idx, old } => target.present[idx] = old,
        }
    }
}

/// Applies `op` to `target`, journaling an undo entry for it.
fn apply(journal: &mut Journal<JournalEntry>, target: &mut JournalTarget, op: JournalOp) {
    match op {
        JournalOp::Write { idx, val } => {
            let old = target.cells[idx];
            journal.record(JournalEntry::Write { idx, old });
            target.cells[idx] = val;
        }
        JournalOp::AddEdge { from, to } => {
            if target.edges.insert((from, to)) {
                journal.record(JournalEntry::AddEdge { from, to });
            }
        }
        JournalOp::DelNode { idx } => {
            let old = target.present[idx];
            journal.record(JournalEntry::DelNode { idx, old });
            target.present[idx] = false;
        }
    }
}

const JOURNAL_NODES: usize = 4;

fn journal_op_strategy() -> impl Strategy<Value = JournalOp> {
    prop_oneof![
        (0..JOURNAL_NODES, any::<i32>()).prop_map(|(idx, val)| JournalOp::Write { idx, val }),
        (0..JOURNAL_NODES, 0..JOURNAL_NODES).prop_map(|(from, to)| JournalOp::AddEdge { from, to }),
        (0..JOURNAL_NODES).prop_map(|idx| JournalOp::DelNode { idx }),
    ]
}

proptest! {
    /// Checkpointing, applying any mixed sequence of write/addEdge/delNode
    /// mutations, then backtracking restores the exact state the checkpoint
    /// was taken at -- cells, edges, and present flags alike.
    #[test]
    fn backtrack_restores_checkpointed_state(
        before in proptest::collection::vec(journal_op_strategy(), 0..6),
        after in proptest::collection::vec(journal_op_strategy(), 0..10),
    ) {
        let mut target = JournalTarget {
            cells: vec![0; JOURNAL_NODES],
            edges: BTreeSet::new(),
            present: vec![true; JOURNAL_NODES],
        };
        let mut journal: Journal<JournalEntry> = Journal::new();

        for op in before {
            apply(&mut journal, &mut target, op);
        }

        journal.checkpoint();
        let snapshot = target.clone();

        for op in after {
            apply(&mut journal, &mut target, op);
        }

        journal.backtrack(&mut target);
        prop_assert_eq!(target, snapshot);
    }
}
