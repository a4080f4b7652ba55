//! Shared test doubles: a transport that replays a scripted sequence of
//! attempt outcomes and a leader fetcher backed by a settable table.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use vbs_proto::chunk::{ChunkInfoResponse, ChunkIoResponse};
use vbs_proto::{ChunkRequest, ChunkResponse};
use vbs_types::{Address, ChunkServerId, CopysetId, LogicalPoolId, SequenceNum, StatusCode};

use crate::error::{ClientError, ClientResult};
use crate::metacache::LeaderFetcher;
use crate::transport::{ChunkTransport, RpcError};

pub(crate) fn ep(d: u8, port: u16) -> Address {
    Address::from_octets(10, 0, 0, d, port)
}

pub(crate) fn ok_io() -> Result<ChunkResponse, RpcError> {
    Ok(ChunkResponse::Io(ChunkIoResponse {
        status: StatusCode::OK,
        ..Default::default()
    }))
}

pub(crate) fn ok_read(data: &[u8]) -> Result<ChunkResponse, RpcError> {
    Ok(ChunkResponse::Io(ChunkIoResponse {
        status: StatusCode::OK,
        redirect: None,
        data: Some(Bytes::copy_from_slice(data)),
    }))
}

pub(crate) fn io_status(status: u16) -> Result<ChunkResponse, RpcError> {
    Ok(ChunkResponse::Io(ChunkIoResponse {
        status,
        ..Default::default()
    }))
}

pub(crate) fn io_redirect(status: u16, hint: &str) -> Result<ChunkResponse, RpcError> {
    Ok(ChunkResponse::Io(ChunkIoResponse {
        status,
        redirect: Some(hint.to_string()),
        data: None,
    }))
}

pub(crate) fn info_ok(chunk_sns: Vec<u64>) -> Result<ChunkResponse, RpcError> {
    Ok(ChunkResponse::Info(ChunkInfoResponse {
        status: StatusCode::OK,
        redirect: None,
        chunk_sns: chunk_sns.into_iter().map(SequenceNum).collect(),
    }))
}

pub(crate) fn info_redirect(status: u16, hint: &str) -> Result<ChunkResponse, RpcError> {
    Ok(ChunkResponse::Info(ChunkInfoResponse {
        status,
        redirect: Some(hint.to_string()),
        chunk_sns: Vec::new(),
    }))
}

/// A call observed by the scripted transport.
pub(crate) struct CallRecord {
    pub endpoint: Address,
    pub request: ChunkRequest,
    pub timeout: Duration,
}

/// Replays a prepared outcome per call; answers OK once the script is
/// drained.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<ChunkResponse, RpcError>>>,
    pub calls: Mutex<Vec<CallRecord>>,
    pub resets: Mutex<Vec<ChunkServerId>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<ChunkResponse, RpcError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            resets: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn timeouts_ms(&self) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .map(|c| c.timeout.as_millis() as u64)
            .collect()
    }
}

#[async_trait]
impl ChunkTransport for ScriptedTransport {
    async fn call(
        &self,
        endpoint: Address,
        request: ChunkRequest,
        timeout: Duration,
    ) -> Result<ChunkResponse, RpcError> {
        self.calls.lock().push(CallRecord {
            endpoint,
            request,
            timeout,
        });
        self.script.lock().pop_front().unwrap_or_else(ok_io)
    }

    fn reset_if_not_healthy(&self, cs: ChunkServerId) {
        self.resets.lock().push(cs);
    }
}

/// Leader table shared with the test body; counts authoritative fetches.
pub(crate) struct TestFetcher {
    leader: Mutex<Option<(ChunkServerId, Address)>>,
    fetches: AtomicU64,
}

impl TestFetcher {
    pub fn new(leader: Option<(ChunkServerId, Address)>) -> Arc<Self> {
        Arc::new(Self {
            leader: Mutex::new(leader),
            fetches: AtomicU64::new(0),
        })
    }

    pub fn set_leader(&self, cs: ChunkServerId, endpoint: Address) {
        *self.leader.lock() = Some((cs, endpoint));
    }

    pub fn clear_leader(&self) {
        *self.leader.lock() = None;
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LeaderFetcher for TestFetcher {
    async fn fetch_leader(
        &self,
        lpid: LogicalPoolId,
        cpid: CopysetId,
    ) -> ClientResult<(ChunkServerId, Address)> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let leader = *self.leader.lock();
        leader.ok_or(ClientError::NoLeaderSelected {
            lpid: *lpid,
            cpid: *cpid,
        })
    }
}
