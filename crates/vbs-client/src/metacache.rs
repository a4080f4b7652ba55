//! Copyset leader cache.
//!
//! Maps (logical pool, copyset) to the chunk server currently believed to be
//! the leader. Entries go stale the moment a redirect or timeout is
//! observed (`leader_may_change`); a stale or missing entry is resolved
//! through the injected [`LeaderFetcher`] without holding the cache lock
//! across the fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use vbs_types::{Address, ChunkServerId, CopysetId, LogicalPoolId, SequenceNum};

use crate::config::FailureRequestOption;
use crate::error::{ClientError, ClientResult};
use crate::unstable::UnstableHelper;

/// Authoritative leader lookup, implemented against the metadata service.
#[async_trait]
pub trait LeaderFetcher: Send + Sync {
    async fn fetch_leader(
        &self,
        lpid: LogicalPoolId,
        cpid: CopysetId,
    ) -> ClientResult<(ChunkServerId, Address)>;
}

#[derive(Debug, Clone, Copy)]
struct LeaderEntry {
    leader: ChunkServerId,
    endpoint: Address,
    leader_may_change: bool,
}

#[derive(Default)]
struct CacheState {
    leaders: HashMap<(LogicalPoolId, CopysetId), LeaderEntry>,
    /// Every chunk server ever observed as a leader, for reverse lookup of
    /// redirect hints and host-level fan-out.
    endpoints: HashMap<ChunkServerId, Address>,
    ids_by_endpoint: HashMap<Address, ChunkServerId>,
}

pub struct MetaCache {
    fetcher: Arc<dyn LeaderFetcher>,
    state: RwLock<CacheState>,
    unstable: UnstableHelper,
    latest_file_sn: AtomicU64,
}

impl MetaCache {
    pub fn new(fetcher: Arc<dyn LeaderFetcher>, opt: &FailureRequestOption) -> Self {
        Self {
            fetcher,
            state: RwLock::new(CacheState::default()),
            unstable: UnstableHelper::new(
                opt.chunkserver_unstable_threshold,
                opt.server_unstable_threshold,
            ),
            latest_file_sn: AtomicU64::new(0),
        }
    }

    pub fn unstable_helper(&self) -> &UnstableHelper {
        &self.unstable
    }

    /// Current leader for the copyset.
    ///
    /// Serves from cache when the entry is present, trusted, and `refresh`
    /// is false; otherwise resolves through the fetcher. A successful fetch
    /// clears `leader_may_change`.
    pub async fn get_leader(
        &self,
        lpid: LogicalPoolId,
        cpid: CopysetId,
        refresh: bool,
    ) -> ClientResult<(ChunkServerId, Address)> {
        if !refresh {
            let state = self.state.read();
            if let Some(entry) = state.leaders.get(&(lpid, cpid)) {
                if !entry.leader_may_change {
                    return Ok((entry.leader, entry.endpoint));
                }
            }
        }

        let (leader, endpoint) = self.fetcher.fetch_leader(lpid, cpid).await?;
        tracing::debug!(
            "fetched leader of copyset (lpid={}, cpid={}): chunkserver {} at {}",
            lpid,
            cpid,
            leader,
            endpoint
        );

        let mut state = self.state.write();
        state.leaders.insert(
            (lpid, cpid),
            LeaderEntry {
                leader,
                endpoint,
                leader_may_change: false,
            },
        );
        state.endpoints.insert(leader, endpoint);
        state.ids_by_endpoint.insert(endpoint, leader);
        Ok((leader, endpoint))
    }

    /// Apply a leader hint carried in a redirect response. Fails when the
    /// endpoint maps to no chunk server this cache has seen; the caller
    /// falls back to a full refresh.
    pub fn update_leader(
        &self,
        lpid: LogicalPoolId,
        cpid: CopysetId,
        endpoint: Address,
    ) -> ClientResult<()> {
        let mut state = self.state.write();
        let leader = *state
            .ids_by_endpoint
            .get(&endpoint)
            .ok_or(ClientError::UnknownPeer(endpoint))?;
        // A hint straight from a serving peer counts as fresh information.
        state.leaders.insert(
            (lpid, cpid),
            LeaderEntry {
                leader,
                endpoint,
                leader_may_change: false,
            },
        );
        Ok(())
    }

    pub fn is_leader_may_change(&self, lpid: LogicalPoolId, cpid: CopysetId) -> bool {
        self.state
            .read()
            .leaders
            .get(&(lpid, cpid))
            .map(|e| e.leader_may_change)
            .unwrap_or(false)
    }

    /// Force a leader re-lookup, on next send, for every copyset whose
    /// cached leader is `cs`.
    pub fn set_chunkserver_unstable(&self, cs: ChunkServerId) {
        let mut state = self.state.write();
        for entry in state.leaders.values_mut() {
            if entry.leader == cs {
                entry.leader_may_change = true;
            }
        }
    }

    /// Mark every chunk server on the host unstable. Fails when the host
    /// has no registered chunk servers.
    pub fn set_server_unstable(&self, host_ip: u32) -> ClientResult<()> {
        let mut state = self.state.write();
        let on_host: Vec<ChunkServerId> = state
            .endpoints
            .iter()
            .filter(|(_, ep)| ep.host_ip() == host_ip)
            .map(|(cs, _)| *cs)
            .collect();
        if on_host.is_empty() {
            return Err(ClientError::Internal(format!(
                "no chunk servers registered on host {:#010x}",
                host_ip
            )));
        }
        for entry in state.leaders.values_mut() {
            if on_host.contains(&entry.leader) {
                entry.leader_may_change = true;
            }
        }
        Ok(())
    }

    /// Latest file sequence number observed by the volume layer; writes
    /// refresh their sequence from here after a BACKWARD response.
    pub fn latest_file_sn(&self) -> SequenceNum {
        SequenceNum(self.latest_file_sn.load(Ordering::Relaxed))
    }

    pub fn set_latest_file_sn(&self, sn: SequenceNum) {
        self.latest_file_sn.store(*sn, Ordering::Relaxed);
    }
}
