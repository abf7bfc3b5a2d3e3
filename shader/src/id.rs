// id.rs — Stable identifiers for compiled expressions and invocations
//
// Slot IDs are allocated in source order during compilation, so the n-th
// distinct `$variable` in the text always lands in slot n. The owning
// instance keeps its variable references in the same order.

/// Index of a resolved free variable in a compiled expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarSlot(pub u32);

/// Index of a local (assigned) variable in a compiled expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalSlot(pub u32);

/// Identity of one invocation context, assigned by the host. Two requests
/// carrying the same id are treated as the same binding target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl VarSlot {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl LocalSlot {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Allocator for slot IDs. Produces monotonically increasing IDs in
/// allocation (source) order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct SlotAllocator {
    next_var: u32,
    next_local: u32,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_var(&mut self) -> VarSlot {
        let id = VarSlot(self.next_var);
        self.next_var += 1;
        id
    }

    pub fn alloc_local(&mut self) -> LocalSlot {
        let id = LocalSlot(self.next_local);
        self.next_local += 1;
        id
    }

    pub fn local_count(&self) -> usize {
        self.next_local as usize
    }
}
