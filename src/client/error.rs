use thiserror::Error;

use crate::transport::error::RpcError;

/// Failure of one client call, classified for the retry policy.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Unreachable, timed out, or not ready. Worth rediscovering the leader.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The node answered and said no (not leader, invalid input, storage failure).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },
}

impl ClientError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClientError::Unavailable(_))
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Unavailable { .. } => ClientError::Unavailable(err.to_string()),
            RpcError::Decode { .. } => ClientError::Decode(err.to_string()),
        }
    }
}
