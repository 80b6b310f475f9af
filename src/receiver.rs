// src/receiver.rs  —  receiver collaborator contract
use crate::error::Result;
use crate::timestamp::Timestamp;

/// Consumer of timestamped mark edges (a Morse receiver front-end).
///
/// Implemented outside this crate. The key reports every tone-queue-driven
/// key-value edge here, before the keying callback fires. Implementations
/// must not call back into the key or generator from these hooks.
pub trait Receiver: Send + Sync {
    /// A mark (key closed, tone on) started at `at`.
    fn mark_begin(&self, at: &Timestamp) -> Result<()>;
    /// The current mark ended (key open, tone off) at `at`.
    fn mark_end(&self, at: &Timestamp) -> Result<()>;
    /// Pick up changed speed/tolerance parameters. Called once when the
    /// receiver is registered and again after every generator resync.
    fn sync_parameters(&self) {}
}
