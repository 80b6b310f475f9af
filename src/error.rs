// src/error.rs  —  library error kinds
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything a caller can observe going wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A setter was called with a value outside its inclusive [MIN, MAX] range.
    /// State is left unchanged.
    #[error("{0} out of range")]
    InvalidArgument(&'static str),

    /// The sound system is occupied or not available (e.g. no generator
    /// has been registered with the key yet).
    #[error("sound system busy or not available")]
    Busy,

    /// Refused to wait for the keyer to idle while a paddle is still held:
    /// the machine would never reach Idle.
    #[error("keyer cannot idle while a paddle is held")]
    DeadlockLikely,

    /// A graph update arrived while another one was already in progress.
    /// Callers retry once after about a millisecond, then give up.
    #[error("keyer graph update re-entered")]
    ReEntered,

    /// The tone queue is full; the tone was dropped.
    #[error("tone queue full")]
    QueueOverflow,
}
