use thiserror::Error;

/// Error taxonomy shared by every engine subsystem.
///
/// Malformed inbound bytes are never surfaced through this type; parsers
/// drop them silently. Outbound failures and API misuse are returned by
/// value — there is no process-wide error slot.
#[derive(Error, Debug)]
pub enum CyxError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    Exists,

    #[error("capacity reached")]
    Full,

    #[error("cryptographic verification failed")]
    Crypto,

    #[error("network send failed: {0}")]
    Network(String),

    #[error("timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, CyxError>;
