//! Per-file request metrics.
//!
//! The sink is optional everywhere: helpers accept `Option<&Arc<FileMetric>>`
//! and do nothing without one, so the engine runs identically with metrics
//! disabled. Metric naming is the export sink's concern; it combines the
//! file prefix with the operation name and field.

use std::collections::HashMap;
use std::sync::Arc;

use vbs_monitor::{Counter, Gauge, LatencyStat};

use crate::request::OpType;

/// Counters and latency for one operation kind.
#[derive(Default)]
pub struct OpMetric {
    pub rpc_latency: LatencyStat,
    pub rpc_count: Counter,
    pub rpc_bytes: Counter,
    pub fail_count: Counter,
    pub redirect_count: Counter,
    pub timeout_count: Counter,
}

/// Metric sink for all requests of one file.
pub struct FileMetric {
    prefix: String,
    ops: HashMap<OpType, OpMetric>,
    pub slow_request_count: Counter,
    pub inflight_rpc: Gauge,
}

impl FileMetric {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ops: OpType::ALL
                .iter()
                .map(|op| (*op, OpMetric::default()))
                .collect(),
            slow_request_count: Counter::new(),
            inflight_rpc: Gauge::new(),
        }
    }

    /// Name prefix for an exporting sink, e.g. the volume or file name.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn op(&self, op: OpType) -> &OpMetric {
        // The map is populated for every kind at construction.
        &self.ops[&op]
    }
}

pub fn latency_record(metric: Option<&Arc<FileMetric>>, op: OpType, latency_us: u64) {
    if let Some(m) = metric {
        m.op(op).rpc_latency.record(latency_us);
    }
}

pub fn incr_rpc_qps(metric: Option<&Arc<FileMetric>>, op: OpType, bytes: u64) {
    if let Some(m) = metric {
        m.op(op).rpc_count.incr();
        m.op(op).rpc_bytes.add(bytes);
    }
}

pub fn incr_fail_rpc(metric: Option<&Arc<FileMetric>>, op: OpType) {
    if let Some(m) = metric {
        m.op(op).fail_count.incr();
    }
}

pub fn incr_redirect_rpc(metric: Option<&Arc<FileMetric>>, op: OpType) {
    if let Some(m) = metric {
        m.op(op).redirect_count.incr();
    }
}

pub fn incr_timeout_rpc(metric: Option<&Arc<FileMetric>>, op: OpType) {
    if let Some(m) = metric {
        m.op(op).timeout_count.incr();
    }
}

pub fn incr_slow_request(metric: Option<&Arc<FileMetric>>) {
    if let Some(m) = metric {
        m.slow_request_count.incr();
    }
}

pub fn incr_inflight(metric: Option<&Arc<FileMetric>>) {
    if let Some(m) = metric {
        m.inflight_rpc.incr();
    }
}

pub fn decr_inflight(metric: Option<&Arc<FileMetric>>) {
    if let Some(m) = metric {
        m.inflight_rpc.decr();
    }
}
