//! Exit codes for the linewise CLI.
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | The run failed (unreadable input, write error, connection test) |
//! | 2 | Invalid configuration or missing credentials |
//!
//! Argument errors reported by clap also exit with 2.

use linewise_core::Error as CoreError;

/// Exit code for a failed run.
pub const FAILURE: u8 = 1;

/// Exit code for configuration and credential problems.
pub const USAGE: u8 = 2;

/// Exit code for an error returned by a command.
///
/// Any [`linewise_core::Error`] in the chain that is fatal maps to [`USAGE`].
#[must_use]
pub fn exit_code_from_error(err: &anyhow::Error) -> u8 {
    let fatal = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<CoreError>())
        .any(CoreError::is_fatal);
    if fatal { USAGE } else { FAILURE }
}
