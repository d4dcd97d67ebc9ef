use thiserror::Error;

/// Errors surfaced by the relay layer.
///
/// Transient by design: nothing here is allowed to terminate the process.
/// Callers either retry (`ChannelUnavailable`), drop the message
/// (`Malformed`) or log and move on.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No live channel after the bounded poll. Usually a boot-order
    /// problem (broker not up yet) - callers may retry the whole operation.
    #[error("channel not ready after {retries} attempts")]
    ChannelUnavailable { retries: u32 },

    #[error("broker operation failed: {0}")]
    Broker(#[from] lapin::Error),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("chat transport failed: {0}")]
    Chat(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
