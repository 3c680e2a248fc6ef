//! Logging macros with verbosity level control.
//!
//! Logging is zero-cost when disabled (verbosity=0). Levels:
//! - 0: SILENT (nothing)
//! - 1: PROGRESS (optimizer iteration summaries, termination, planner totals)
//! - 2: STEPS (line-search decisions, per-follower planner progress)
//! - 3: DEBUG (full iterates and gradients)

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_PROGRESS: u8 = 1;
pub const VERBOSITY_STEPS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Log at PROGRESS level (verbosity >= 1).
#[macro_export]
macro_rules! log_progress {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_PROGRESS {
            eprintln!($($arg)*);
        }
    };
}

/// Log at STEPS level (verbosity >= 2).
#[macro_export]
macro_rules! log_steps {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_STEPS {
            eprintln!($($arg)*);
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            eprintln!($($arg)*);
        }
    };
}
