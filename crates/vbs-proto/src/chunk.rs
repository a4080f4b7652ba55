//! Request and response messages for the chunk service.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use vbs_types::{status_code_t, ChunkIdInfo, Epoch, FileId, SequenceNum};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Clone-source hint attached to reads and writes against lazily-cloned
/// chunks: where the original data lives if the chunk is not yet populated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CloneSourceInfo {
    pub file_source: String,
    pub file_offset: u64,
}

impl CloneSourceInfo {
    /// A hint is meaningful only when a source path is present.
    pub fn is_valid(&self) -> bool {
        !self.file_source.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadChunkRequest {
    pub id: ChunkIdInfo,
    pub seq: SequenceNum,
    pub offset: u64,
    pub length: u64,
    pub source: CloneSourceInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteChunkRequest {
    pub id: ChunkIdInfo,
    pub file_id: FileId,
    pub epoch: Epoch,
    pub seq: SequenceNum,
    pub offset: u64,
    pub length: u64,
    pub data: Bytes,
    pub source: CloneSourceInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadChunkSnapshotRequest {
    pub id: ChunkIdInfo,
    pub seq: SequenceNum,
    pub offset: u64,
    pub length: u64,
}

/// Deletes a chunk snapshot, or corrects the chunk's sequence when no
/// snapshot data needs discarding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeleteChunkSnapshotRequest {
    pub id: ChunkIdInfo,
    pub corrected_seq: SequenceNum,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetChunkInfoRequest {
    pub id: ChunkIdInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateCloneChunkRequest {
    pub id: ChunkIdInfo,
    /// Location of the source object, e.g. `"file:/vol1@cs"`.
    pub location: String,
    pub seq: SequenceNum,
    pub corrected_seq: SequenceNum,
    pub chunk_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecoverChunkRequest {
    pub id: ChunkIdInfo,
    pub offset: u64,
    pub length: u64,
}

/// A single chunk-service request, tagged by operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkRequest {
    Read(ReadChunkRequest),
    Write(WriteChunkRequest),
    ReadSnapshot(ReadChunkSnapshotRequest),
    DeleteSnapshot(DeleteChunkSnapshotRequest),
    GetChunkInfo(GetChunkInfoRequest),
    CreateClone(CreateCloneChunkRequest),
    Recover(RecoverChunkRequest),
}

impl ChunkRequest {
    /// The copyset-and-chunk this request addresses.
    pub fn id(&self) -> ChunkIdInfo {
        match self {
            ChunkRequest::Read(r) => r.id,
            ChunkRequest::Write(r) => r.id,
            ChunkRequest::ReadSnapshot(r) => r.id,
            ChunkRequest::DeleteSnapshot(r) => r.id,
            ChunkRequest::GetChunkInfo(r) => r.id,
            ChunkRequest::CreateClone(r) => r.id,
            ChunkRequest::Recover(r) => r.id,
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Response to read/write/snapshot/clone/recover operations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkIoResponse {
    pub status: status_code_t,
    /// Textual endpoint of the current leader, set alongside a redirect
    /// status when the peer knows it.
    pub redirect: Option<String>,
    /// Chunk data, present on successful reads.
    pub data: Option<Bytes>,
}

/// Response to a chunk-info query; carries its own redirect field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkInfoResponse {
    pub status: status_code_t,
    pub redirect: Option<String>,
    /// Sequence numbers of the chunk and its snapshots.
    pub chunk_sns: Vec<SequenceNum>,
}

/// Any chunk-service response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkResponse {
    Io(ChunkIoResponse),
    Info(ChunkInfoResponse),
}

impl ChunkResponse {
    pub fn status(&self) -> status_code_t {
        match self {
            ChunkResponse::Io(r) => r.status,
            ChunkResponse::Info(r) => r.status,
        }
    }

    pub fn redirect(&self) -> Option<&str> {
        match self {
            ChunkResponse::Io(r) => r.redirect.as_deref(),
            ChunkResponse::Info(r) => r.redirect.as_deref(),
        }
    }
}
