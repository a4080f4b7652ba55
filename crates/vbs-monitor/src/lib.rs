//! Process-local metrics primitives.
//!
//! Write-side only, sized for a hot path that records one sample per
//! completed RPC: plain atomic counters and gauges, and a fixed-footprint
//! latency accumulator. Shipping values to an external sink is a deployment
//! concern layered on top of the snapshots.

pub mod stat;

pub use stat::{Counter, Gauge, LatencySnapshot, LatencyStat};
