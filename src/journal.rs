//! A stack of undoable mutations with `checkpoint()`/`backtrack()`
//! (`original_source/src/Backtrack.h`, spec section 4.2).
//!
//! The C++ original stores raw `Graph*`/`Seq<InstrId>*` pointers in each
//! journal entry so that `backtrack()` can mutate the right structure
//! without the caller's help. Rust has no equivalent of an owning
//! container holding pointers into itself, so instead each engine defines
//! its own small `Undo` entry enum carrying just enough information
//! (indices, not references) to know what to restore, and hands the whole
//! engine state back to `undo()` by `&mut` reference when backtracking --
//! this is the "tagged entries referencing a borrowed engine-scoped
//! context, not owning it" shape spec section 9 asks for.

/// One engine's set of undoable mutations. Implementors typically mirror
/// `write`/`add_edge`/`del_node`/`add_root`/`del_root` from the original,
/// specialized to that engine's actual fields.
pub trait Undo: Sized {
    type Target;

    fn undo(self, target: &mut Self::Target);
}

#[derive(Debug)]
enum Item<E> {
    Checkpoint,
    Entry(E),
}

/// Generic backtrackable mutation stack. When the stack is empty,
/// `record()` is a no-op (the fast path of spec section 4.2/4.3: mutations
/// outside any checkpoint don't need to be undoable).
#[derive(Debug)]
pub struct Journal<E> {
    stack: Vec<Item<E>>,
}

impl<E> Default for Journal<E> {
    fn default() -> Self {
        Journal { stack: Vec::new() }
    }
}

impl<E: Undo> Journal<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn checkpoint(&mut self) {
        self.stack.push(Item::Checkpoint);
    }

    /// Journal `entry` if (and only if) a checkpoint is currently live.
    /// Callers perform the actual mutation themselves, before or after
    /// calling this -- `Journal` only remembers how to undo it.
    pub fn record(&mut self, entry: E) {
        if self.is_live() {
            self.stack.push(Item::Entry(entry));
        }
    }

    /// Pop entries, undoing each against `target`, until (and consuming) a
    /// checkpoint. With no checkpoint on the stack this drains it entirely
    /// (spec section 4.2: defined behavior, not an error).
    pub fn backtrack(&mut self, target: &mut E::Target) {
        while let Some(item) = self.stack.pop() {
            match item {
                Item::Checkpoint => return,
                Item::Entry(e) => e.undo(target),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum Entry {
        Write { idx: usize, old: i32 },
    }

    struct Target {
        cells: Vec<i32>,
    }

    impl Undo for Entry {
        type Target = Target;
        fn undo(self, target: &mut Target) {
            match self {
                Entry::Write { idx, old } => target.cells[idx] = old,
            }
        }
    }

    fn write(j: &mut Journal<Entry>, t: &mut Target, idx: usize, val: i32) {
        let old = t.cells[idx];
        j.record(Entry::Write { idx, old });
        t.cells[idx] = val;
    }

    #[test]
    fn backtrack_restores_to_checkpoint() {
        let mut t = Target { cells: vec![0, 0, 0] };
        let mut j: Journal<Entry> = Journal::new();

        write(&mut j, &mut t, 0, 1); // unjournaled: no checkpoint yet
        j.checkpoint();
        write(&mut j, &mut t, 1, 2);
        write(&mut j, &mut t, 2, 3);

        assert_eq!(t.cells, vec![1, 2, 3]);
        j.backtrack(&mut t);
        assert_eq!(t.cells, vec![1, 0, 0]);
    }

    #[test]
    fn backtrack_with_no_checkpoint_drains_stack() {
        let mut t = Target { cells: vec![0, 0] };
        let mut j: Journal<Entry> = Journal::new();
        j.checkpoint();
        write(&mut j, &mut t, 0, 5);
        write(&mut j, &mut t, 1, 6);
        // Pop the checkpoint itself off by backtracking once already.
        j.backtrack(&mut t);
        assert_eq!(t.cells, vec![0, 0]);
    }

    #[test]
    fn unjournaled_fast_path_when_stack_empty() {
        let mut t = Target { cells: vec![0] };
        let mut j: Journal<Entry> = Journal::new();
        write(&mut j, &mut t, 0, 9);
        assert!(!j.is_live());
        // No checkpoint was ever pushed, so nothing is recorded and a
        // "backtrack" has nothing to do.
        j.backtrack(&mut t);
        assert_eq!(t.cells, vec![9]);
    }
}
