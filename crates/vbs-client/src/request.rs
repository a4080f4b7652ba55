//! Per-request state.
//!
//! A [`RequestContext`] describes one chunk-level operation for its whole
//! lifetime; the paired [`RequestClosure`] carries the retry machinery and
//! the user's done callback, which fires exactly once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use vbs_proto::chunk::CloneSourceInfo;
use vbs_types::{status_code_t, ChunkIdInfo, Epoch, FileId, SequenceNum, StatusCode};

use crate::metric::FileMetric;

/// Operation kinds the engine understands.
///
/// Flush and Discard are declared for completeness of the request model;
/// they resolve above the chunk RPC layer and have no dispatch path here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Read,
    Write,
    ReadSnapshot,
    DeleteSnapshotOrCorrectSn,
    GetChunkInfo,
    CreateCloneChunk,
    RecoverChunk,
    Flush,
    Discard,
}

impl OpType {
    pub const ALL: [OpType; 9] = [
        OpType::Read,
        OpType::Write,
        OpType::ReadSnapshot,
        OpType::DeleteSnapshotOrCorrectSn,
        OpType::GetChunkInfo,
        OpType::CreateCloneChunk,
        OpType::RecoverChunk,
        OpType::Flush,
        OpType::Discard,
    ];

    /// Short lowercase name for logs and metric keys.
    pub fn name(&self) -> &'static str {
        match self {
            OpType::Read => "read",
            OpType::Write => "write",
            OpType::ReadSnapshot => "read_snapshot",
            OpType::DeleteSnapshotOrCorrectSn => "delete_snapshot",
            OpType::GetChunkInfo => "get_chunk_info",
            OpType::CreateCloneChunk => "create_clone_chunk",
            OpType::RecoverChunk => "recover_chunk",
            OpType::Flush => "flush",
            OpType::Discard => "discard",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// One chunk-level operation. Created by the upstream I/O tracker, mutated
/// only by retry handling (the sequence refreshes after BACKWARD), dropped
/// after the terminal callback.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Process-unique id, for correlating log lines.
    pub id: u64,
    pub optype: OpType,
    pub idinfo: ChunkIdInfo,
    pub file_id: FileId,
    pub epoch: Epoch,
    pub seq: SequenceNum,
    /// Target sequence for snapshot delete / correct-sn.
    pub corrected_seq: SequenceNum,
    pub offset: u64,
    pub rawlength: u64,
    /// Borrowed write payload; must stay valid until the terminal callback.
    pub write_data: Bytes,
    /// Read result, attached on success or zero-filled on a missing chunk.
    pub read_data: Bytes,
    pub source: CloneSourceInfo,
    /// Source object location for clone creation.
    pub location: String,
    pub chunk_size: u64,
    /// Chunk and snapshot sequences returned by a chunk-info query.
    pub chunk_sns: Vec<SequenceNum>,
}

impl RequestContext {
    pub fn new(optype: OpType, idinfo: ChunkIdInfo) -> Self {
        Self {
            id: next_request_id(),
            optype,
            idinfo,
            file_id: FileId(0),
            epoch: Epoch(0),
            seq: SequenceNum(0),
            corrected_seq: SequenceNum(0),
            offset: 0,
            rawlength: 0,
            write_data: Bytes::new(),
            read_data: Bytes::new(),
            source: CloneSourceInfo::default(),
            location: String::new(),
            chunk_size: 0,
            chunk_sns: Vec::new(),
        }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} offset={} length={} seq={} epoch={}",
            self.optype, self.idinfo, self.offset, self.rawlength, self.seq, self.epoch
        )
    }
}

/// Terminal outcome handed to the done callback.
#[derive(Debug, Clone, Default)]
pub struct RequestResult {
    /// 0 on success; otherwise the last observed status code.
    pub errcode: status_code_t,
    /// Read payload, when the operation produces one.
    pub data: Option<Bytes>,
    /// Chunk sequence numbers from a chunk-info query.
    pub chunk_sns: Vec<SequenceNum>,
    /// Dispatch attempts minus one.
    pub retried_times: u64,
}

/// User completion callback; invoked exactly once per request.
pub type RequestDone = Box<dyn FnOnce(RequestResult) + Send + 'static>;

/// Retry-side state of one in-flight request.
pub struct RequestClosure {
    /// Upstream I/O tracker correlation id, for logs only.
    pub io_id: u64,
    error_code: status_code_t,
    retried_times: u64,
    next_timeout_ms: u64,
    created_at: Instant,
    slow_request: bool,
    own_inflight: bool,
    retry_directly: bool,
    metric: Option<Arc<FileMetric>>,
    done: Option<RequestDone>,
}

impl RequestClosure {
    pub fn new(done: RequestDone, base_timeout_ms: u64, metric: Option<Arc<FileMetric>>) -> Self {
        Self {
            io_id: 0,
            error_code: StatusCode::UNKNOWN,
            retried_times: 0,
            next_timeout_ms: base_timeout_ms,
            created_at: Instant::now(),
            slow_request: false,
            own_inflight: false,
            retry_directly: false,
            metric,
            done: Some(done),
        }
    }

    pub fn set_failed(&mut self, code: status_code_t) {
        self.error_code = code;
    }

    pub fn error_code(&self) -> status_code_t {
        self.error_code
    }

    pub fn increment_retried_times(&mut self) {
        self.retried_times += 1;
    }

    pub fn retried_times(&self) -> u64 {
        self.retried_times
    }

    pub fn set_next_timeout_ms(&mut self, timeout_ms: u64) {
        self.next_timeout_ms = timeout_ms;
    }

    pub fn next_timeout_ms(&self) -> u64 {
        self.next_timeout_ms
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.created_at.elapsed().as_millis() as u64
    }

    pub fn is_slow_request(&self) -> bool {
        self.slow_request
    }

    pub fn mark_as_slow_request(&mut self) {
        self.slow_request = true;
    }

    pub fn set_own_inflight(&mut self, own: bool) {
        self.own_inflight = own;
    }

    pub fn own_inflight(&self) -> bool {
        self.own_inflight
    }

    pub fn set_retry_directly(&mut self, retry_directly: bool) {
        self.retry_directly = retry_directly;
    }

    pub fn retry_directly(&self) -> bool {
        self.retry_directly
    }

    pub fn metric(&self) -> Option<&Arc<FileMetric>> {
        self.metric.as_ref()
    }

    /// Invoke the done callback. The callback is consumed; a second call is
    /// a bug and is swallowed with an error log rather than a panic.
    pub fn complete(&mut self, result: RequestResult) {
        match self.done.take() {
            Some(done) => done(result),
            None => {
                tracing::error!("request completed twice, dropping duplicate completion");
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        self.done.is_none()
    }
}
