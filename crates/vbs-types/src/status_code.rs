/// Status code type alias; every service reports a `u16` code.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const INTERNAL: status_code_t = 5;
    pub const UNKNOWN: status_code_t = 999;
}

/// Chunk service status codes (1xxx), reported in chunk RPC responses.
pub mod ChunkCode {
    use super::status_code_t;

    /// The addressed peer is not the copyset leader.
    pub const REDIRECTED: status_code_t = 1001;
    /// The copyset is not hosted on the addressed peer.
    pub const COPYSET_NOT_EXIST: status_code_t = 1002;
    /// The chunk has not been allocated.
    pub const CHUNK_NOT_EXIST: status_code_t = 1003;
    /// Malformed or out-of-range request parameters.
    pub const INVALID_REQUEST: status_code_t = 1004;
    /// Create collided with an existing chunk.
    pub const CHUNK_EXIST: status_code_t = 1005;
    /// The server has already seen a newer file sequence.
    pub const BACKWARD: status_code_t = 1006;
    /// The server is shedding load.
    pub const OVERLOAD: status_code_t = 1007;
    /// The client's epoch is behind a structural change.
    pub const EPOCH_TOO_OLD: status_code_t = 1008;
}

/// RPC transport status codes (2xxx).
pub mod RpcCode {
    use super::status_code_t;

    pub const TIMEOUT: status_code_t = 2005;
    pub const INVALID_ADDR: status_code_t = 2006;
    pub const SEND_FAILED: status_code_t = 2007;
    pub const SOCKET_ERROR: status_code_t = 2010;
    pub const CONNECT_FAILED: status_code_t = 2014;
}

/// Human-readable name for a status code, for log lines.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::INTERNAL => "Internal",
        StatusCode::UNKNOWN => "Unknown",
        ChunkCode::REDIRECTED => "Chunk::Redirected",
        ChunkCode::COPYSET_NOT_EXIST => "Chunk::CopysetNotExist",
        ChunkCode::CHUNK_NOT_EXIST => "Chunk::ChunkNotExist",
        ChunkCode::INVALID_REQUEST => "Chunk::InvalidRequest",
        ChunkCode::CHUNK_EXIST => "Chunk::ChunkExist",
        ChunkCode::BACKWARD => "Chunk::Backward",
        ChunkCode::OVERLOAD => "Chunk::Overload",
        ChunkCode::EPOCH_TOO_OLD => "Chunk::EpochTooOld",
        RpcCode::TIMEOUT => "Rpc::Timeout",
        RpcCode::INVALID_ADDR => "Rpc::InvalidAddr",
        RpcCode::SEND_FAILED => "Rpc::SendFailed",
        RpcCode::SOCKET_ERROR => "Rpc::SocketError",
        RpcCode::CONNECT_FAILED => "Rpc::ConnectFailed",
        _ => "Unrecognized",
    }
}
