#![forbid(unsafe_code)]

//! Update lanes: bitmask priority tokens attached to pending updates.
//!
//! Smaller bits are more urgent. A set of lanes is mapped to a scheduler
//! [`PriorityLevel`] through its most urgent member.
//!
//! The lane that new updates are tagged with is thread-wide state. Set it with
//! [`with_update_priority`] or hold an [`UpdatePriorityGuard`]; both restore
//! the previous lane on every exit path, unwinding included.

use std::cell::Cell;

use arbor_scheduler::PriorityLevel;
use bitflags::bitflags;

bitflags! {
    /// A set of update lanes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Lanes: u32 {
        /// Discrete user actions. Rendered without yielding.
        const SYNC             = 0b0000_0001;
        /// High-frequency continuous input (drag, scroll).
        const INPUT_CONTINUOUS = 0b0000_0100;
        /// Initial render and most state updates.
        const DEFAULT          = 0b0001_0000;
        /// Work that can wait indefinitely.
        const IDLE             = 0b0100_0000_0000_0000_0000_0000_0000_0000;
    }
}

/// Lanes that render without time slicing.
pub const BLOCKING_LANES: Lanes = Lanes::SYNC;

impl Lanes {
    /// No lane.
    pub const NONE: Self = Self::empty();

    /// Most urgent lane in the set (lowest set bit), or `NONE`.
    #[inline]
    pub fn highest_priority_lane(self) -> Self {
        let bits = self.bits();
        Self::from_bits_retain(bits & bits.wrapping_neg())
    }

    /// Whether any lane is shared with `other`.
    #[inline]
    pub fn includes_some(self, other: Self) -> bool {
        self.intersects(other)
    }

    /// Whether the set contains a lane that must render without yielding.
    #[inline]
    pub fn includes_blocking(self) -> bool {
        self.intersects(BLOCKING_LANES)
    }
}

/// `a` is strictly more urgent than `b`.
///
/// An empty `a` is never more urgent.
#[inline]
pub fn is_higher_priority(a: Lanes, b: Lanes) -> bool {
    !a.is_empty() && a.bits() < b.bits()
}

/// Event priority of a lane set: its most urgent lane, folded onto the four
/// named lanes.
pub fn lanes_to_event_priority(lanes: Lanes) -> Lanes {
    let lane = lanes.highest_priority_lane();
    if !is_higher_priority(Lanes::SYNC, lane) {
        return Lanes::SYNC;
    }
    if !is_higher_priority(Lanes::INPUT_CONTINUOUS, lane) {
        return Lanes::INPUT_CONTINUOUS;
    }
    if !is_higher_priority(Lanes::DEFAULT, lane) && !lane.is_empty() {
        return Lanes::DEFAULT;
    }
    Lanes::IDLE
}

/// Scheduler priority for a lane set, chosen by its most urgent lane.
pub fn lanes_to_priority(lanes: Lanes) -> PriorityLevel {
    if lanes.is_empty() {
        return PriorityLevel::NoPriority;
    }
    let event = lanes_to_event_priority(lanes);
    if event == Lanes::SYNC {
        PriorityLevel::Immediate
    } else if event == Lanes::INPUT_CONTINUOUS {
        PriorityLevel::UserBlocking
    } else if event == Lanes::DEFAULT {
        PriorityLevel::Normal
    } else {
        PriorityLevel::Idle
    }
}

/// Lane for updates requested while a scheduler task of `priority` runs.
pub fn priority_to_lane(priority: PriorityLevel) -> Lanes {
    match priority {
        PriorityLevel::Immediate => Lanes::SYNC,
        PriorityLevel::UserBlocking => Lanes::INPUT_CONTINUOUS,
        PriorityLevel::Idle => Lanes::IDLE,
        PriorityLevel::Normal | PriorityLevel::Low | PriorityLevel::NoPriority => Lanes::DEFAULT,
    }
}

thread_local! {
    static CURRENT_UPDATE_PRIORITY: Cell<Lanes> = const { Cell::new(Lanes::NONE) };
}

/// Lane new updates are tagged with, `NONE` when unset.
pub fn current_update_priority() -> Lanes {
    CURRENT_UPDATE_PRIORITY.with(Cell::get)
}

/// Restores the previous update lane when dropped.
#[must_use = "the previous lane is restored when the guard drops"]
#[derive(Debug)]
pub struct UpdatePriorityGuard {
    previous: Lanes,
}

impl UpdatePriorityGuard {
    /// Set the update lane until the guard drops.
    pub fn set(lane: Lanes) -> Self {
        let previous = CURRENT_UPDATE_PRIORITY.with(|cell| cell.replace(lane));
        Self { previous }
    }
}

impl Drop for UpdatePriorityGuard {
    fn drop(&mut self) {
        CURRENT_UPDATE_PRIORITY.with(|cell| cell.set(self.previous));
    }
}

/// Run `f` with updates tagged `lane`.
pub fn with_update_priority<R>(lane: Lanes, f: impl FnOnce() -> R) -> R {
    let _guard = UpdatePriorityGuard::set(lane);
    f()
}

/// Lane for a state dispatch: the current update lane, else `SYNC`.
pub fn request_update_lane() -> Lanes {
    let lane = current_update_priority();
    if lane.is_empty() { Lanes::SYNC } else { lane }
}

/// Lane for a root render: the current update lane, else `DEFAULT`.
pub fn request_root_lane() -> Lanes {
    let lane = current_update_priority();
    if lane.is_empty() { Lanes::DEFAULT } else { lane }
}
