use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("timed out waiting for link")]
    Timeout,
    #[error("link not connected")]
    NotConnected,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("server answered HTTP {0}")]
    Status(u16),
    #[error("remote version `{0}` is not a dotted numeric version")]
    BadVersion(String),
    #[error("image body is empty")]
    Empty,
    #[error("image truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },
    #[error("update begin failed: {0}")]
    Begin(String),
    #[error("update write failed: {0}")]
    Write(String),
    #[error("update finalize failed: {0}")]
    Finalize(String),
    #[error("malformed upload: {0}")]
    Multipart(&'static str),
    #[error("another firmware update is in progress")]
    Busy,
}

impl UpdateError {
    /// Errors raised before anything reached the staging area.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Self::Fetch(_) | Self::Status(_) | Self::BadVersion(_) | Self::Empty
        )
    }
}

/// Why a cycle ended before reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CycleFailure {
    #[error("network link exhausted after {attempts} attempts")]
    NetworkExhausted { attempts: u32 },
    #[error("broker link exhausted after {attempts} attempts")]
    BrokerExhausted { attempts: u32 },
    #[error("sensor read exhausted after {attempts} attempts")]
    SensorExhausted { attempts: u32 },
}
