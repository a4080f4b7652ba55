//! Single-attempt request dispatch.
//!
//! The sender owns no retry logic: it builds the wire message for the
//! operation kind, resolves the cached copyset leader, and issues exactly
//! one transport call with the closure's current timeout. When no leader can
//! be selected the attempt completes with a synthetic transport error so the
//! completion handler drives refresh and retry through one path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vbs_proto::chunk::{
    ChunkIoResponse, CreateCloneChunkRequest, DeleteChunkSnapshotRequest, GetChunkInfoRequest,
    ReadChunkRequest, ReadChunkSnapshotRequest, RecoverChunkRequest, WriteChunkRequest,
};
use vbs_proto::{ChunkRequest, ChunkResponse};
use vbs_types::{Address, ChunkCode, ChunkServerId};

use crate::metacache::MetaCache;
use crate::request::{OpType, RequestContext};
use crate::transport::{ChunkTransport, RpcError};

/// The chunk server an attempt was addressed to.
#[derive(Debug, Clone, Copy)]
pub struct AttemptTarget {
    pub cs: ChunkServerId,
    pub endpoint: Address,
}

/// Everything the completion handler needs to classify one attempt.
pub struct AttemptOutcome {
    /// `None` when no leader could be selected (no RPC was issued).
    pub target: Option<AttemptTarget>,
    pub result: Result<ChunkResponse, RpcError>,
    pub latency_us: u64,
}

pub struct RequestSender {
    transport: Arc<dyn ChunkTransport>,
    meta_cache: Arc<MetaCache>,
}

impl RequestSender {
    pub fn new(transport: Arc<dyn ChunkTransport>, meta_cache: Arc<MetaCache>) -> Self {
        Self {
            transport,
            meta_cache,
        }
    }

    /// Issue one attempt for the request with the given per-attempt timeout.
    pub async fn send_request(&self, ctx: &RequestContext, timeout: Duration) -> AttemptOutcome {
        let request = match build_request(ctx) {
            Some(request) => request,
            None => {
                // No chunk-RPC dispatch path exists for this kind.
                tracing::warn!("{} has no chunk rpc dispatch, request id = {}", ctx, ctx.id);
                return AttemptOutcome {
                    target: None,
                    result: Ok(ChunkResponse::Io(ChunkIoResponse {
                        status: ChunkCode::INVALID_REQUEST,
                        ..Default::default()
                    })),
                    latency_us: 0,
                };
            }
        };

        let (cs, endpoint) = match self
            .meta_cache
            .get_leader(ctx.idinfo.lpid, ctx.idinfo.cpid, false)
            .await
        {
            Ok(leader) => leader,
            Err(e) => {
                tracing::warn!(
                    "select leader failed for {}, request id = {}: {}",
                    ctx,
                    ctx.id,
                    e
                );
                return AttemptOutcome {
                    target: None,
                    result: Err(RpcError::InvalidAddr),
                    latency_us: 0,
                };
            }
        };

        let start = Instant::now();
        let result = self.transport.call(endpoint, request, timeout).await;
        AttemptOutcome {
            target: Some(AttemptTarget { cs, endpoint }),
            result,
            latency_us: start.elapsed().as_micros() as u64,
        }
    }
}

/// Build the wire message for the context's operation kind, pulling the
/// fields a retry must re-send (the sequence may have been refreshed).
fn build_request(ctx: &RequestContext) -> Option<ChunkRequest> {
    let request = match ctx.optype {
        OpType::Read => ChunkRequest::Read(ReadChunkRequest {
            id: ctx.idinfo,
            seq: ctx.seq,
            offset: ctx.offset,
            length: ctx.rawlength,
            source: ctx.source.clone(),
        }),
        OpType::Write => ChunkRequest::Write(WriteChunkRequest {
            id: ctx.idinfo,
            file_id: ctx.file_id,
            epoch: ctx.epoch,
            seq: ctx.seq,
            offset: ctx.offset,
            length: ctx.rawlength,
            data: ctx.write_data.clone(),
            source: ctx.source.clone(),
        }),
        OpType::ReadSnapshot => ChunkRequest::ReadSnapshot(ReadChunkSnapshotRequest {
            id: ctx.idinfo,
            seq: ctx.seq,
            offset: ctx.offset,
            length: ctx.rawlength,
        }),
        OpType::DeleteSnapshotOrCorrectSn => {
            ChunkRequest::DeleteSnapshot(DeleteChunkSnapshotRequest {
                id: ctx.idinfo,
                corrected_seq: ctx.corrected_seq,
            })
        }
        OpType::GetChunkInfo => ChunkRequest::GetChunkInfo(GetChunkInfoRequest { id: ctx.idinfo }),
        OpType::CreateCloneChunk => ChunkRequest::CreateClone(CreateCloneChunkRequest {
            id: ctx.idinfo,
            location: ctx.location.clone(),
            seq: ctx.seq,
            corrected_seq: ctx.corrected_seq,
            chunk_size: ctx.chunk_size,
        }),
        OpType::RecoverChunk => ChunkRequest::Recover(RecoverChunkRequest {
            id: ctx.idinfo,
            offset: ctx.offset,
            length: ctx.rawlength,
        }),
        OpType::Flush | OpType::Discard => return None,
    };
    Some(request)
}
