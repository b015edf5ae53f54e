use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already present: {0}")]
    AlreadyPresent(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Incomplete: {0}")]
    Incomplete(String),

    #[error("Continue: {0}")]
    Continue(String),
}

impl ConsensusError {
    /// True for the "requested op is still pending append" status from a
    /// log-cache read. The buffer must not reset on it.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ConsensusError::Incomplete(_))
    }

    /// True for the informational "cache stopped short of the requested
    /// fill" status. The caller may simply read again.
    pub fn is_continue(&self) -> bool {
        matches!(self, ConsensusError::Continue(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ConsensusError::NotFound(_))
    }

    pub fn is_already_present(&self) -> bool {
        matches!(self, ConsensusError::AlreadyPresent(_))
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
