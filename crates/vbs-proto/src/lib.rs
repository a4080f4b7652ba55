//! Chunk service RPC message types.
//!
//! Plain serde structs; wire framing and encoding belong to the transport
//! layer that carries them.

pub mod chunk;

pub use chunk::{
    ChunkInfoResponse, ChunkIoResponse, ChunkRequest, ChunkResponse, CreateCloneChunkRequest,
    DeleteChunkSnapshotRequest, GetChunkInfoRequest, ReadChunkRequest, ReadChunkSnapshotRequest,
    RecoverChunkRequest, WriteChunkRequest,
};
