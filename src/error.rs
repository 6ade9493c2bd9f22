//! Structured error handling and exit codes.

use serde::Serialize;

/// Exit codes for the diskwarden binary.
///
/// - 0: Success
/// - 1: General error (unexpected failure)
/// - 2: Nothing to do (no files selected, unknown backup, empty plan)
/// - 3: Partial success (some files failed to clean or restore)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// The operation completed.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// The operation had nothing to act on.
    NothingToDo = 2,
    /// The operation completed with some per-file failures.
    PartialSuccess = 3,
    /// The operation was interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DW000",
            Self::GeneralError => "DW001",
            Self::NothingToDo => "DW002",
            Self::PartialSuccess => "DW003",
            Self::Interrupted => "DW130",
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "DW001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
