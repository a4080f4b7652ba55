//! Client error types.

use vbs_types::AddressParseError;

use crate::transport::RpcError;

/// Errors surfaced by the engine's internal plumbing. Terminal request
/// outcomes travel through the closure's error-code field instead.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A transport-level RPC failure.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// No leader is currently known for the copyset.
    #[error("no leader for copyset (lpid={lpid}, cpid={cpid})")]
    NoLeaderSelected { lpid: u32, cpid: u32 },

    /// A textual endpoint could not be parsed.
    #[error("bad endpoint: {0}")]
    AddrParse(#[from] AddressParseError),

    /// An endpoint does not map to any chunk server the cache knows.
    #[error("unknown peer endpoint: {0}")]
    UnknownPeer(vbs_types::Address),

    /// An internal / unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ClientError {
    fn from(err: anyhow::Error) -> Self {
        ClientError::Internal(err.to_string())
    }
}

/// Convenience result type.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
