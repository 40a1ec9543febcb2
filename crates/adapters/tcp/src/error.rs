//! TCP adapter error types.

/// Errors that stop the TCP listener.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}
