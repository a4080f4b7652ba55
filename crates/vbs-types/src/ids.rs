strong_type!(LogicalPoolId, u32);
strong_type!(CopysetId, u32);
strong_type!(ChunkId, u64);
strong_type!(ChunkServerId, u32);
strong_type!(FileId, u64);
strong_type!(SequenceNum, u64);
strong_type!(Epoch, u64);

/// Identifies a chunk inside a replicated copyset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub struct ChunkIdInfo {
    pub lpid: LogicalPoolId,
    pub cpid: CopysetId,
    pub chunk_id: ChunkId,
}

impl ChunkIdInfo {
    pub fn new(lpid: LogicalPoolId, cpid: CopysetId, chunk_id: ChunkId) -> Self {
        Self {
            lpid,
            cpid,
            chunk_id,
        }
    }
}

impl std::fmt::Display for ChunkIdInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(lpid={}, cpid={}, chunk={})",
            self.lpid, self.cpid, self.chunk_id
        )
    }
}
