//! Stage-tagged logging macros gated by a module-level `ENABLE_LOGS` flag.
//!
//! A module opts in by declaring both constants:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TAG: &str = "Ocr";
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("dispatched {} tiles", 9); // => "[Ocr] dispatched 9 tiles"
//! ```
//!
//! Turning `ENABLE_LOGS` off silences a noisy stage without touching the
//! global `RUST_LOG` filter.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Errors are tagged the same way but still honour `ENABLE_LOGS`; stages that
/// must always surface a failure call `log::error!` directly.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}
