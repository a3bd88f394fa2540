//! Outbound side of the session: the collaborator that carries requests to the
//! remote counterpart.

use voxlink_core::{CorrelationToken, IssueError, Request};

/// Synchronous issue step toward the remote service.
///
/// `Ok` means the request is in flight and its outcome will arrive later on
/// the notification stream under `token`. An `Err` means nothing was sent.
pub trait Transport: Send + Sync {
    fn issue(&self, request: &Request, token: CorrelationToken) -> Result<(), IssueError>;

    /// Ask the remote side to abandon the request carrying `token`.
    fn abort(&self, token: CorrelationToken) -> Result<(), IssueError>;
}

/// Transport for a session with no live link. Every call is rejected.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisconnectedTransport;

impl Transport for DisconnectedTransport {
    fn issue(&self, _request: &Request, _token: CorrelationToken) -> Result<(), IssueError> {
        Err(IssueError::NotConnected)
    }

    fn abort(&self, _token: CorrelationToken) -> Result<(), IssueError> {
        Err(IssueError::NotConnected)
    }
}
