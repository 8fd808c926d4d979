//! Error type shared by the recording engine and every backend.

use core::fmt;

use crate::command::CommandId;

/// Result alias used throughout the engine.
pub type RhiResult<T> = Result<T, RhiError>;

/// Errors surfaced by recording, submission and backend native calls.
///
/// [`RhiError::Unsupported`] is raised by backends and absorbed by the recorder; every other
/// variant reaches the caller of `finish()` or `submit()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RhiError {
    /// An arena, scratch page or native allocation could not be satisfied.
    OutOfMemory(String),
    /// The native device stopped responding.
    DeviceLost(String),
    /// A wait fence has not reached the value a submission depends on.
    FenceNotReached {
        fence: u64,
        required: u64,
        current: u64,
    },
    /// The backend has no native equivalent for this command.
    Unsupported(CommandId),
    /// A caller-supplied argument is out of range or inconsistent.
    InvalidArgument(String),
    /// Any other native API failure.
    Native(String),
}

impl RhiError {
    /// Whether the recorder may absorb this error and continue with the next command.
    #[inline]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

impl fmt::Display for RhiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory(msg) => write!(f, "Out of memory: {msg}"),
            Self::DeviceLost(msg) => write!(f, "Device lost: {msg}"),
            Self::FenceNotReached {
                fence,
                required,
                current,
            } => write!(
                f,
                "Fence {fence} is at {current}, submission requires {required}"
            ),
            Self::Unsupported(id) => write!(f, "{id} command is not supported"),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Self::Native(msg) => write!(f, "Native error: {msg}"),
        }
    }
}

impl std::error::Error for RhiError {}

impl From<anyhow::Error> for RhiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Native(format!("{err:#}"))
    }
}
