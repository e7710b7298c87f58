//! The instruction schema the parser emits and the rest of the checker
//! consumes.

/// Unique instruction identifier. Dense in `0..N` only after a [`crate::trace::Trace`]
/// has canonicalized a raw instruction list; as emitted by the parser it is
/// simply "the order instructions were read in".
pub type InstrId = usize;

/// Hardware thread id.
pub type ThreadId = u32;

/// Byte/word address. Dense in `0..A` after canonicalization.
pub type Addr = u32;

/// A data value. Dense in `0..D_a` (per address) after canonicalization;
/// value `0` is always the reserved "initial value".
pub type Data = u32;

/// A logical clock reading used for `localDep` edges.
pub type Time = i64;

/// Maximum number of distinct threads a trace may use.
pub const MAX_THREADS: usize = 1024;

/// Maximum number of distinct addresses a trace may use.
pub const MAX_ADDRS: usize = 256;

/// Maximum number of distinct data values a trace may use, summed over all
/// addresses before per-address compaction.
pub const MAX_DATA: usize = 8_388_608;

/// The kind of operation an instruction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Load.
    Ld,
    /// Store.
    St,
    /// Atomic read-modify-write.
    Rmw,
    /// Memory barrier.
    Sync,
    /// No-op: occupies a uid and a program-order slot but carries no edges.
    Nop,
    /// Separator between traces in an interactive batch.
    End,
    /// Constraint on the final value observable at some address; not a
    /// memory operation.
    Final,
}

/// One instruction, as emitted by [`crate::parser::Parser`] and consumed by
/// [`crate::trace::Trace::new`].
#[derive(Debug, Clone, Copy)]
pub struct Instr {
    pub uid: InstrId,
    pub tid: ThreadId,
    pub op: Op,
    pub addr: Addr,
    pub read_val: Data,
    pub write_val: Data,
    pub begin_time: Option<Time>,
    pub end_time: Option<Time>,
    /// 1-based source line, used for diagnostics only.
    pub line: u32,
}

impl Instr {
    /// True for LD, ST, RMW, and FINAL: the operations for which `addr` (and
    /// the compacted data fields) are meaningful.
    pub fn has_addr(&self) -> bool {
        matches!(self.op, Op::Ld | Op::St | Op::Rmw | Op::Final)
    }

    /// True for LD and RMW: operations that read a value.
    pub fn is_load(&self) -> bool {
        matches!(self.op, Op::Ld | Op::Rmw)
    }

    /// True for ST and RMW: operations that write a value.
    pub fn is_store(&self) -> bool {
        matches!(self.op, Op::St | Op::Rmw)
    }
}
