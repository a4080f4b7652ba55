//! Chunk request engine for vbs virtual volumes.
//!
//! Upstream I/O trackers submit chunk-level operations through
//! [`CopysetClient`]; the engine locates the copyset leader via the
//! [`MetaCache`], issues one RPC attempt at a time through the
//! [`ChunkTransport`] seam, and reacts to leader changes, overload, and
//! transient failures with capped exponential backoff until the request
//! completes or its retry budget runs out. Every request finishes with
//! exactly one invocation of its done callback.

pub mod backoff;
pub mod completion;
pub mod config;
pub mod copyset_client;
pub mod error;
pub mod inflight;
pub mod metacache;
pub mod metric;
pub mod request;
pub mod sender;
pub mod transport;
pub mod unstable;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{CopysetClientConfig, FailureRequestOption};
pub use copyset_client::CopysetClient;
pub use error::{ClientError, ClientResult};
pub use inflight::InflightThrottle;
pub use metacache::{LeaderFetcher, MetaCache};
pub use metric::FileMetric;
pub use request::{OpType, RequestContext, RequestDone, RequestResult};
pub use transport::{ChunkTransport, RpcError};
pub use unstable::{UnstableHelper, UnstableState};
