//! Multi-threaded execution engines.
//!
//! [`hybrid`] is the optimistic time-warp engine: GVT reduction, rollback,
//! anti-messages, and the clone/branch director all live there.

pub mod hybrid;

/// Synchronization protocol selector, matching `--synch=1|2|3` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchMode {
    /// `--synch=1`: serial execution. Implemented by pinning the optimistic
    /// engine to a single `Planet` rather than routing through
    /// [`crate::st::World`] — see DESIGN.md "serial mode via a single planet".
    Serial,
    /// `--synch=2`: conservative synchronization. Not implemented — see
    /// `AikaError::ConfigError` raised by [`crate::mt::hybrid::config::HybridConfig::validate`].
    Conservative,
    /// `--synch=3`: the optimistic time-warp engine, [`hybrid::HybridEngine`].
    Optimistic,
}

impl SynchMode {
    pub fn from_cli_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(SynchMode::Serial),
            2 => Some(SynchMode::Conservative),
            3 => Some(SynchMode::Optimistic),
            _ => None,
        }
    }
}
