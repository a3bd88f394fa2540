/// Typed failure of a caller-initiated request.
/// Connection loss is kept separate so callers can tell "the request failed"
/// from "the session died".
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("remote error {code}: {message}")]
    Remote { code: u32, message: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("cancelled")]
    Cancelled,
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("request abandoned before an outcome was delivered")]
    Abandoned,
}

impl RequestError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Remote { .. } => "remote",
            Self::Rejected(_) => "rejected",
            Self::Cancelled => "cancelled",
            Self::ConnectionLost(_) => "connection_lost",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Synchronous failure of the transport while issuing a call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IssueError {
    #[error("not connected")]
    NotConnected,
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<IssueError> for RequestError {
    fn from(e: IssueError) -> Self {
        RequestError::Rejected(e.to_string())
    }
}
