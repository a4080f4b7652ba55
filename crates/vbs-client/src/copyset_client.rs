//! Submission surface and per-request driver.
//!
//! Each submitted operation becomes one task that loops dispatch →
//! completion → backoff sleep until the completion handler declares the
//! request terminal. The inflight token is taken once before the first
//! dispatch, held across retries as deliberate back-pressure, and released
//! before the done callback runs.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use vbs_proto::chunk::CloneSourceInfo;
use vbs_types::{ChunkIdInfo, Epoch, FileId, SequenceNum, StatusCode};

use crate::completion::{CompletionHandler, RetryDecision};
use crate::config::CopysetClientConfig;
use crate::inflight::InflightThrottle;
use crate::metacache::{LeaderFetcher, MetaCache};
use crate::metric::{self, FileMetric};
use crate::request::{OpType, RequestClosure, RequestContext, RequestDone, RequestResult};
use crate::sender::RequestSender;
use crate::transport::ChunkTransport;

/// Client for chunk-level operations against copyset leaders.
///
/// Cheap to clone-by-`Arc`; all state is shared.
pub struct CopysetClient {
    meta_cache: Arc<MetaCache>,
    sender: Arc<RequestSender>,
    handler: Arc<CompletionHandler>,
    throttle: Arc<InflightThrottle>,
    metric: Option<Arc<FileMetric>>,
    base_timeout_ms: u64,
}

impl CopysetClient {
    pub fn new(
        config: CopysetClientConfig,
        transport: Arc<dyn ChunkTransport>,
        fetcher: Arc<dyn LeaderFetcher>,
        metric: Option<Arc<FileMetric>>,
    ) -> Self {
        let meta_cache = Arc::new(MetaCache::new(fetcher, &config.failure_request));
        let sender = Arc::new(RequestSender::new(
            Arc::clone(&transport),
            Arc::clone(&meta_cache),
        ));
        let handler = Arc::new(CompletionHandler::new(
            Arc::clone(&meta_cache),
            transport,
            config.failure_request.clone(),
        ));
        Self {
            meta_cache,
            sender,
            handler,
            throttle: Arc::new(InflightThrottle::new(config.max_inflight_rpc)),
            metric,
            base_timeout_ms: config.failure_request.chunkserver_rpc_timeout_ms,
        }
    }

    /// The shared leader cache, for the volume layer to feed sequence
    /// updates into.
    pub fn meta_cache(&self) -> &Arc<MetaCache> {
        &self.meta_cache
    }

    /// Non-blocking overload probe for upstream admission decisions.
    pub fn is_overload(&self) -> bool {
        self.throttle.is_overload()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write_chunk(
        &self,
        idinfo: ChunkIdInfo,
        file_id: FileId,
        epoch: Epoch,
        seq: SequenceNum,
        data: Bytes,
        offset: u64,
        length: u64,
        source: CloneSourceInfo,
        done: RequestDone,
    ) {
        let mut ctx = RequestContext::new(OpType::Write, idinfo);
        ctx.file_id = file_id;
        ctx.epoch = epoch;
        ctx.seq = seq;
        ctx.write_data = data;
        ctx.offset = offset;
        ctx.rawlength = length;
        ctx.source = source;
        self.submit(ctx, done);
    }

    pub fn read_chunk(
        &self,
        idinfo: ChunkIdInfo,
        seq: SequenceNum,
        offset: u64,
        length: u64,
        source: CloneSourceInfo,
        done: RequestDone,
    ) {
        let mut ctx = RequestContext::new(OpType::Read, idinfo);
        ctx.seq = seq;
        ctx.offset = offset;
        ctx.rawlength = length;
        ctx.source = source;
        self.submit(ctx, done);
    }

    pub fn read_chunk_snapshot(
        &self,
        idinfo: ChunkIdInfo,
        seq: SequenceNum,
        offset: u64,
        length: u64,
        done: RequestDone,
    ) {
        let mut ctx = RequestContext::new(OpType::ReadSnapshot, idinfo);
        ctx.seq = seq;
        ctx.offset = offset;
        ctx.rawlength = length;
        self.submit(ctx, done);
    }

    pub fn delete_chunk_snapshot_or_correct_sn(
        &self,
        idinfo: ChunkIdInfo,
        corrected_seq: SequenceNum,
        done: RequestDone,
    ) {
        let mut ctx = RequestContext::new(OpType::DeleteSnapshotOrCorrectSn, idinfo);
        ctx.corrected_seq = corrected_seq;
        self.submit(ctx, done);
    }

    pub fn get_chunk_info(&self, idinfo: ChunkIdInfo, done: RequestDone) {
        let ctx = RequestContext::new(OpType::GetChunkInfo, idinfo);
        self.submit(ctx, done);
    }

    pub fn create_clone_chunk(
        &self,
        idinfo: ChunkIdInfo,
        location: &str,
        seq: SequenceNum,
        corrected_seq: SequenceNum,
        chunk_size: u64,
        done: RequestDone,
    ) {
        let mut ctx = RequestContext::new(OpType::CreateCloneChunk, idinfo);
        ctx.location = location.to_string();
        ctx.seq = seq;
        ctx.corrected_seq = corrected_seq;
        ctx.chunk_size = chunk_size;
        self.submit(ctx, done);
    }

    pub fn recover_chunk(&self, idinfo: ChunkIdInfo, offset: u64, length: u64, done: RequestDone) {
        let mut ctx = RequestContext::new(OpType::RecoverChunk, idinfo);
        ctx.offset = offset;
        ctx.rawlength = length;
        self.submit(ctx, done);
    }

    fn submit(&self, ctx: RequestContext, done: RequestDone) {
        let closure = RequestClosure::new(done, self.base_timeout_ms, self.metric.clone());
        let sender = Arc::clone(&self.sender);
        let handler = Arc::clone(&self.handler);
        let throttle = Arc::clone(&self.throttle);
        tokio::spawn(drive(sender, handler, throttle, ctx, closure));
    }
}

/// Run one request to its terminal completion.
async fn drive(
    sender: Arc<RequestSender>,
    handler: Arc<CompletionHandler>,
    throttle: Arc<InflightThrottle>,
    mut ctx: RequestContext,
    mut closure: RequestClosure,
) {
    throttle.acquire().await;
    closure.set_own_inflight(true);
    metric::incr_inflight(closure.metric());

    loop {
        let timeout = Duration::from_millis(closure.next_timeout_ms());
        let outcome = sender.send_request(&ctx, timeout).await;
        match handler.on_rpc_returned(&mut ctx, &mut closure, outcome).await {
            RetryDecision::Complete => break,
            RetryDecision::Retry { sleep } => {
                if !sleep.is_zero() {
                    tokio::time::sleep(sleep).await;
                }
            }
        }
    }

    // The token goes back before the user learns the outcome.
    if closure.own_inflight() {
        closure.set_own_inflight(false);
        metric::decr_inflight(closure.metric());
        throttle.release();
    }

    let errcode = closure.error_code();
    let data = match ctx.optype {
        OpType::Read | OpType::ReadSnapshot if errcode == StatusCode::OK => {
            Some(ctx.read_data.clone())
        }
        _ => None,
    };
    let result = RequestResult {
        errcode,
        data,
        chunk_sns: ctx.chunk_sns.clone(),
        retried_times: closure.retried_times(),
    };
    closure.complete(result);
}
