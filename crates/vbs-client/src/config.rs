//! Engine configuration.
//!
//! All options are read once at engine construction and never mutated; the
//! engine holds them behind an `Arc` and threads the handle through every
//! request.

use serde::{Deserialize, Serialize};

/// Retry, timeout, and health-threshold knobs for chunk-server requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRequestOption {
    /// Base sleep between retries, in microseconds.
    pub chunkserver_op_retry_interval_us: u64,

    /// Cap on the overload backoff sleep, in microseconds.
    pub chunkserver_max_retry_sleep_interval_us: u64,

    /// Base per-attempt RPC timeout, in milliseconds.
    pub chunkserver_rpc_timeout_ms: u64,

    /// Cap on the backed-off RPC timeout, in milliseconds.
    pub chunkserver_max_rpc_timeout_ms: u64,

    /// Maximum number of retries per request; the attempt budget is one
    /// larger.
    pub chunkserver_op_max_retry: u64,

    /// Below this retry count a timed-out request whose copyset leader may
    /// have changed keeps the base RPC timeout instead of backing off.
    pub chunkserver_min_retry_times_force_timeout_backoff: u64,

    /// Elapsed time after which a still-retrying request is flagged slow,
    /// in milliseconds.
    pub chunkserver_slow_request_threshold_ms: u64,

    /// RPC timeouts a single chunk server may accumulate before it is
    /// considered unstable.
    pub chunkserver_unstable_threshold: u64,

    /// Unstable chunk servers a host may accumulate before the whole host
    /// is considered unstable.
    pub server_unstable_threshold: u64,
}

impl Default for FailureRequestOption {
    fn default() -> Self {
        Self {
            chunkserver_op_retry_interval_us: 100_000,
            chunkserver_max_retry_sleep_interval_us: 64_000_000,
            chunkserver_rpc_timeout_ms: 1_000,
            chunkserver_max_rpc_timeout_ms: 64_000,
            chunkserver_op_max_retry: 50,
            chunkserver_min_retry_times_force_timeout_backoff: 5,
            chunkserver_slow_request_threshold_ms: 45_000,
            chunkserver_unstable_threshold: 5,
            server_unstable_threshold: 3,
        }
    }
}

/// Top-level configuration for the copyset client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopysetClientConfig {
    pub failure_request: FailureRequestOption,

    /// Maximum number of RPCs in flight across the process.
    pub max_inflight_rpc: u64,
}

impl Default for CopysetClientConfig {
    fn default() -> Self {
        Self {
            failure_request: FailureRequestOption::default(),
            max_inflight_rpc: 128,
        }
    }
}
