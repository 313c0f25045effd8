use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    /// Connect failure, timeout, or the peer answered 503.
    #[error("{address} unavailable: {reason}")]
    Unavailable { address: String, reason: String },

    /// The peer answered but the body was not the expected JSON.
    #[error("unreadable response from {address}: {reason}")]
    Decode { address: String, reason: String },
}

impl RpcError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RpcError::Unavailable { .. })
    }
}
