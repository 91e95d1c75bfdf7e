#![forbid(unsafe_code)]

//! Scheduler priority levels.

use std::fmt;

/// Urgency of a scheduled task, most urgent first.
///
/// `NoPriority` is only ever observed as the ambient level when no task is
/// running; tasks scheduled with it run at `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum PriorityLevel {
    #[default]
    NoPriority = 0,
    Immediate = 1,
    UserBlocking = 2,
    Normal = 3,
    Low = 4,
    Idle = 5,
}

impl PriorityLevel {
    /// All schedulable levels, most urgent first.
    pub const SCHEDULABLE: [Self; 5] = [
        Self::Immediate,
        Self::UserBlocking,
        Self::Normal,
        Self::Low,
        Self::Idle,
    ];

    /// Stable lowercase name, used in log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoPriority => "none",
            Self::Immediate => "immediate",
            Self::UserBlocking => "user-blocking",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Idle => "idle",
        }
    }

    /// Level a task actually runs at when scheduled with `self`.
    #[inline]
    pub const fn effective(self) -> Self {
        match self {
            Self::NoPriority => Self::Normal,
            other => other,
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
