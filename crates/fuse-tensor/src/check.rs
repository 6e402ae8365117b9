//! Fatal checks.
//!
//! A failed check logs the failing condition and returns the error to the
//! caller. Callers that cannot recover turn it into a process exit with
//! [`OrAbort::or_abort`].

use crate::error::{Result, TensorError};

/// Returns `Err($err)` from the enclosing function when `$cond` is false,
/// logging the condition text first.
macro_rules! check {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($crate::check::fatal(stringify!($cond), $err));
        }
    };
}

/// Logs a failed check and hands the error back.
pub(crate) fn fatal(condition: &'static str, err: TensorError) -> TensorError {
    tracing::error!(condition, error = %err, "check failed");
    err
}

pub trait OrAbort<T> {
    /// Unwraps the value or terminates the process with the error's exit code.
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T> {
    fn or_abort(self) -> T {
        match self {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(error = %err, kind = ?err.kind(), "fatal tensor error, aborting");
                std::process::exit(err.exit_code())
            }
        }
    }
}
