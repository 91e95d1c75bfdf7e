#![forbid(unsafe_code)]

//! Env-gated stderr tracing for the scheduler and reconciler internals.
//!
//! Set `ARBOR_DEBUG_TRACE=1` to print timestamped lines for every host turn,
//! scheduler slice, render pass and commit. The flag is read once; when it is
//! off each call site costs a single static bool load.
//!
//! ```ignore
//! use arbor_scheduler::debug_trace;
//! debug_trace!("commit #{} placed {} nodes", commit, placed);
//! ```
//!
//! Structured logging goes through `tracing`; this macro exists for the
//! cases where installing a subscriber is not practical (embedded hosts,
//! quick bisection of scheduling order).

use std::sync::LazyLock;
use std::time::Instant;

/// Environment variable that enables the trace.
pub const DEBUG_TRACE_ENV: &str = "ARBOR_DEBUG_TRACE";

static DEBUG_TRACE_ENABLED: LazyLock<bool> = LazyLock::new(|| {
    std::env::var(DEBUG_TRACE_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
});

static START_TIME: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Whether `ARBOR_DEBUG_TRACE` was set when first checked.
#[inline]
pub fn is_enabled() -> bool {
    *DEBUG_TRACE_ENABLED
}

/// Milliseconds since the first trace call.
#[inline]
pub fn elapsed_ms() -> u64 {
    START_TIME.elapsed().as_millis() as u64
}

/// Print a timestamped line to stderr when `ARBOR_DEBUG_TRACE=1`.
#[macro_export]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        if $crate::debug_trace::is_enabled() {
            eprintln!(
                "[arbor {:>8}ms] {}",
                $crate::debug_trace::elapsed_ms(),
                format_args!($($arg)*)
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_expands_in_both_states() {
        let slice = 3;
        crate::debug_trace!("slice {slice} pending={}", 2);
        let _ = is_enabled();
    }

    #[test]
    fn elapsed_is_monotonic() {
        let a = elapsed_ms();
        let b = elapsed_ms();
        assert!(b >= a);
    }
}
