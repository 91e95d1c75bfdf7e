#![forbid(unsafe_code)]

//! Mutation flags recorded on fibers during render and consumed by commit.

use bitflags::bitflags;

bitflags! {
    /// Side effects pending on a fiber.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u16 {
        /// Insert (or move) the fiber's host objects.
        const PLACEMENT      = 1 << 0;
        /// Apply a host property diff, new text, or run layout effects.
        const UPDATE         = 1 << 1;
        /// `deletions` lists previous children to remove.
        const CHILD_DELETION = 1 << 2;
        /// Passive effects are queued for the passive pass.
        const PASSIVE        = 1 << 3;
    }
}

impl Flags {
    /// Flags handled by the mutation pass.
    pub const MUTATION_MASK: Self = Self::PLACEMENT
        .union(Self::UPDATE)
        .union(Self::CHILD_DELETION);

    /// Flags that require the passive pass to visit a subtree.
    pub const PASSIVE_MASK: Self = Self::PASSIVE.union(Self::CHILD_DELETION);
}
