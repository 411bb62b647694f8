use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No answer from {0} within the connection timeout")]
    HandshakeTimeout(SocketAddr),

    #[error("Peer stopped acknowledging sent data")]
    AckTimeout,

    #[error("No data arrived within the connection timeout")]
    ReceiveTimeout,

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("Endpoint has no connected peer")]
    NotConnected,

    #[error("Endpoint is not listening")]
    NotListening,

    #[error("Unknown mode: {0}")]
    InvalidMode(u32),

    #[error("Server has no file named '{0}'")]
    FileNotFound(String),
}
