//! Crate level error type.

use crate::morton::MortonKey;
use crate::scheduler::Phase;

/// Errors raised by the coordination protocol.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The relations of the tree are inconsistent.
    #[error("Topology error: {0}")]
    Topology(String),

    /// A message was asked for after a newer cycle had already been consumed.
    #[error("Stale message: cycle {cycle} requested, but cycle {consumed} was already consumed")]
    StaleMessage {
        /// The requested cycle.
        cycle: u64,
        /// The last consumed cycle of the channel.
        consumed: u64,
    },

    /// The relation behind a channel was torn down by a regrid.
    #[error("Channel closed")]
    ChannelClosed,

    /// Every remaining node waits on a message that nobody will send.
    #[error("Stalled in {phase}: {} node(s) blocked, first {}", .blocked.len(), first_key(.blocked))]
    Stalled {
        /// The pass that stalled.
        phase: Phase,
        /// Nodes still waiting when the scheduler ran out of work.
        blocked: Vec<MortonKey>,
    },

    /// The interaction kernel produced invalid output.
    #[error("Kernel error: {0}")]
    Kernel(String),

    /// An earlier cycle failed. The tree must be rebuilt.
    #[error("Octree aborted by an earlier failed cycle")]
    Aborted,

    /// Another locality reported a failed cycle.
    #[error("Cycle failed on a remote locality")]
    RemoteAbort,

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed TOML configuration.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error while reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn first_key(blocked: &[MortonKey]) -> String {
    blocked
        .first()
        .map_or_else(|| "none".to_string(), |key| key.to_string())
}

/// Result type of the crate.
pub type Result<T> = std::result::Result<T, Error>;
