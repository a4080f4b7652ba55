//! Timeout accounting per chunk server and per host.
//!
//! Consecutive RPC timeouts against one chunk server eventually classify it
//! as unstable; enough unstable chunk servers on one machine classify the
//! whole host as unstable. Any non-timeout completion against the server
//! clears its count.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use vbs_types::{Address, ChunkServerId};

/// Health classification after a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnstableState {
    NoUnstable,
    ChunkServerUnstable,
    ServerUnstable,
}

#[derive(Default)]
struct UnstableCounters {
    /// RPC timeouts accumulated per chunk server since its last clear.
    timeouts: HashMap<ChunkServerId, u64>,
    /// Chunk servers currently over the timeout threshold, grouped by host.
    unstable_by_host: HashMap<u32, HashSet<ChunkServerId>>,
}

pub struct UnstableHelper {
    chunkserver_unstable_threshold: u64,
    server_unstable_threshold: u64,
    counters: Mutex<UnstableCounters>,
}

impl UnstableHelper {
    pub fn new(chunkserver_unstable_threshold: u64, server_unstable_threshold: u64) -> Self {
        Self {
            chunkserver_unstable_threshold,
            server_unstable_threshold,
            counters: Mutex::new(UnstableCounters::default()),
        }
    }

    /// Record one RPC timeout against `cs`.
    pub fn increase_timeout(&self, cs: ChunkServerId) {
        let mut counters = self.counters.lock();
        *counters.timeouts.entry(cs).or_insert(0) += 1;
    }

    /// Any completed RPC that was not a timeout resets the accounting.
    pub fn clear_timeout(&self, cs: ChunkServerId, endpoint: Address) {
        let mut counters = self.counters.lock();
        counters.timeouts.insert(cs, 0);
        if let Some(set) = counters.unstable_by_host.get_mut(&endpoint.host_ip()) {
            set.remove(&cs);
        }
    }

    /// Classify `cs` from the current accounting. Called after every
    /// transport failure; below the threshold the server counts as healthy.
    pub fn unstable_state(&self, cs: ChunkServerId, endpoint: Address) -> UnstableState {
        let mut counters = self.counters.lock();

        let count = counters.timeouts.get(&cs).copied().unwrap_or(0);
        if count < self.chunkserver_unstable_threshold {
            return UnstableState::NoUnstable;
        }

        let host = counters.unstable_by_host.entry(endpoint.host_ip()).or_default();
        host.insert(cs);
        if host.len() as u64 >= self.server_unstable_threshold {
            UnstableState::ServerUnstable
        } else {
            UnstableState::ChunkServerUnstable
        }
    }

    pub fn timeout_count(&self, cs: ChunkServerId) -> u64 {
        self.counters.lock().timeouts.get(&cs).copied().unwrap_or(0)
    }
}
