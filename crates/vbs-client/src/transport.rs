//! The transport seam.
//!
//! The engine issues exactly one RPC attempt per [`ChunkTransport::call`];
//! framing, connection pooling, and the per-attempt timeout enforcement all
//! live behind this trait. Retry is never the transport's job.

use std::time::Duration;

use async_trait::async_trait;
use vbs_proto::{ChunkRequest, ChunkResponse};
use vbs_types::{status_code_t, Address, ChunkServerId, RpcCode};

/// Transport-level failure of a single RPC attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The attempt did not complete within its timeout.
    #[error("rpc timed out")]
    Timeout,

    /// The connection could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The request could not be written to the peer.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The connection broke while waiting for the response.
    #[error("socket error: {0}")]
    SocketError(String),

    /// No usable endpoint was available for the target.
    #[error("invalid address")]
    InvalidAddr,
}

impl RpcError {
    /// Status code recorded as the request's last observed failure.
    pub fn code(&self) -> status_code_t {
        match self {
            RpcError::Timeout => RpcCode::TIMEOUT,
            RpcError::ConnectFailed(_) => RpcCode::CONNECT_FAILED,
            RpcError::SendFailed(_) => RpcCode::SEND_FAILED,
            RpcError::SocketError(_) => RpcCode::SOCKET_ERROR,
            RpcError::InvalidAddr => RpcCode::INVALID_ADDR,
        }
    }

    /// Timeouts feed the unstable tracker; other transport failures do not.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout)
    }
}

/// Single-attempt RPC issue against a chunk server.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Send `request` to `endpoint` and wait at most `timeout` for the
    /// response.
    async fn call(
        &self,
        endpoint: Address,
        request: ChunkRequest,
        timeout: Duration,
    ) -> Result<ChunkResponse, RpcError>;

    /// Drop pooled connections to a chunk server whose health is in doubt.
    /// Called after transport failures; the default does nothing.
    fn reset_if_not_healthy(&self, _cs: ChunkServerId) {}
}
