use thiserror::Error;

/// Failure taxonomy for the wire protocol and its callers.
#[derive(Debug, Error)]
pub enum NetError {
    /// Malformed frame, unknown packet kind, or a reply of an unexpected
    /// kind. Pumps drop these; they never crash the receive loop.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered a request with an `Error` packet.
    #[error("{0}")]
    Application(String),

    /// The underlying connection is broken or closed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A pending wait was aborted by the caller's cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// The encoded packet does not fit the 16-bit frame length prefix.
    #[error("packet too large for frame: {0} bytes")]
    PacketTooLarge(usize),
}

impl NetError {
    /// Transport failure for a pump that has already shut down.
    pub fn closed() -> Self {
        NetError::Transport(std::io::ErrorKind::NotConnected.into())
    }
}
