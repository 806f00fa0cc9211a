use thiserror::Error;

/// A command failure reported by the server as `ACK [code@index] {command} message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckError {
    pub code: u32,
    /// Position of the failing command inside a command list (0 outside lists).
    pub command_index: usize,
    pub command: String,
    pub message: String,
}

impl std::fmt::Display for AckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}@{}] {{{}}} {}",
            self.code, self.command_index, self.command, self.message
        )
    }
}

impl AckError {
    // Server-side error codes (ack.h)
    pub const NOT_LIST: u32 = 1;
    pub const ARG: u32 = 2;
    pub const PASSWORD: u32 = 3;
    pub const PERMISSION: u32 = 4;
    pub const UNKNOWN: u32 = 5;
    pub const NO_EXIST: u32 = 50;
    pub const PLAYLIST_MAX: u32 = 51;
    pub const SYSTEM: u32 = 52;
    pub const PLAYLIST_LOAD: u32 = 53;
    pub const UPDATE_ALREADY: u32 = 54;
    pub const PLAYER_SYNC: u32 = 55;
    pub const EXIST: u32 = 56;
}

// Basic error handling with thiserror
#[derive(Error, Debug)]
pub enum MpdError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Ack(AckError),

    #[error("Integer parsing failed: {0}")]
    IntParseFailed(#[from] std::num::ParseIntError),

    #[error("Numeric parsing failed: {0}")]
    NumericParseFailed(#[from] std::num::ParseFloatError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Connection explicitly closed or terminated")]
    ConnectionClosed, // EOF from the server, or the connector was stopped

    #[error("Timed out waiting for the server")]
    Timeout,

    #[error("Not connected to MPD")]
    NotConnected,

    #[error("Task panicked or cancelled")]
    TaskJoinError(#[from] tokio::task::JoinError),
}

impl MpdError {
    /// True for failures that leave the transport in an unknown state. The
    /// session that produced them is torn down and the connector reconnects.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MpdError::IoError(_) | MpdError::ConnectionClosed | MpdError::Timeout
        )
    }

    /// The server's error report, if this is one.
    pub fn ack(&self) -> Option<&AckError> {
        match self {
            MpdError::Ack(ack) => Some(ack),
            _ => None,
        }
    }
}

impl From<AckError> for MpdError {
    fn from(ack: AckError) -> Self {
        MpdError::Ack(ack)
    }
}
