//! RPC completion handling.
//!
//! One attempt finished; decide what happens to the request. The handler
//! classifies the transport result, keeps the unstable accounting and leader
//! cache honest, runs the per-status sub-handler, and either terminates the
//! request or hands the driver a retry decision with the sleep to apply.
//! Sleeps themselves happen in the driver task, never here.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use vbs_proto::ChunkResponse;
use vbs_types::{status_code, status_code_t, Address, ChunkCode, StatusCode};

use crate::backoff::RequestBackoff;
use crate::config::FailureRequestOption;
use crate::error::ClientResult;
use crate::metacache::MetaCache;
use crate::metric;
use crate::request::{OpType, RequestClosure, RequestContext};
use crate::sender::{AttemptOutcome, AttemptTarget};
use crate::transport::{ChunkTransport, RpcError};
use crate::unstable::UnstableState;

/// What the driver does after one completion.
#[derive(Debug)]
pub enum RetryDecision {
    /// Terminal: release the token and run the done callback.
    Complete,
    /// Dispatch again after sleeping (possibly zero).
    Retry { sleep: Duration },
}

pub struct CompletionHandler {
    meta_cache: Arc<MetaCache>,
    transport: Arc<dyn ChunkTransport>,
    opt: FailureRequestOption,
    backoff: RequestBackoff,
}

impl CompletionHandler {
    pub fn new(
        meta_cache: Arc<MetaCache>,
        transport: Arc<dyn ChunkTransport>,
        opt: FailureRequestOption,
    ) -> Self {
        let backoff = RequestBackoff::new(opt.clone());
        Self {
            meta_cache,
            transport,
            opt,
            backoff,
        }
    }

    /// Classify one finished attempt and decide between terminating the
    /// request and retrying it.
    pub async fn on_rpc_returned(
        &self,
        ctx: &mut RequestContext,
        closure: &mut RequestClosure,
        outcome: AttemptOutcome,
    ) -> RetryDecision {
        let AttemptOutcome {
            target,
            result,
            latency_us,
        } = outcome;

        // Each completion starts from a clean fast-retry decision.
        closure.set_retry_directly(false);

        let status: status_code_t;
        let mut rpc_timed_out = false;

        match result {
            Err(err) => {
                status = err.code();
                rpc_timed_out = err.is_timeout();
                self.on_rpc_failed(ctx, closure, target, &err).await;
            }
            Ok(response) => {
                // The RPC completed; whatever the answer, the peer is alive.
                if let Some(t) = target {
                    self.meta_cache
                        .unstable_helper()
                        .clear_timeout(t.cs, t.endpoint);
                }

                status = response.status();
                match status {
                    StatusCode::OK => {
                        self.on_success(ctx, closure, response, latency_us);
                        return RetryDecision::Complete;
                    }
                    ChunkCode::REDIRECTED => {
                        metric::incr_redirect_rpc(closure.metric(), ctx.optype);
                        self.on_redirected(ctx, closure, &response, target).await;
                    }
                    ChunkCode::COPYSET_NOT_EXIST => {
                        self.on_copyset_not_exist(ctx, closure, target).await;
                    }
                    ChunkCode::CHUNK_NOT_EXIST => {
                        self.on_chunk_not_exist(ctx, closure, latency_us);
                        return RetryDecision::Complete;
                    }
                    ChunkCode::INVALID_REQUEST => {
                        self.on_invalid_request(ctx, closure);
                        return RetryDecision::Complete;
                    }
                    ChunkCode::BACKWARD => {
                        if ctx.optype == OpType::Write {
                            self.on_backward(ctx, closure);
                        } else {
                            closure.set_failed(status);
                            tracing::error!(
                                "{} returned backward, io_id = {}, req_id = {}",
                                ctx,
                                closure.io_id,
                                ctx.id
                            );
                            return RetryDecision::Complete;
                        }
                    }
                    ChunkCode::CHUNK_EXIST => {
                        closure.set_failed(status);
                        tracing::warn!(
                            "{} chunk already exists, retried = {}, io_id = {}, req_id = {}",
                            ctx,
                            closure.retried_times(),
                            closure.io_id,
                            ctx.id
                        );
                        return RetryDecision::Complete;
                    }
                    ChunkCode::EPOCH_TOO_OLD => {
                        closure.set_failed(status);
                        tracing::warn!(
                            "{} epoch too old, retried = {}, io_id = {}, req_id = {}",
                            ctx,
                            closure.retried_times(),
                            closure.io_id,
                            ctx.id
                        );
                        return RetryDecision::Complete;
                    }
                    ChunkCode::OVERLOAD => {
                        tracing::warn!(
                            "{} hit overloaded chunkserver, retried = {}, io_id = {}, req_id = {}",
                            ctx,
                            closure.retried_times(),
                            closure.io_id,
                            ctx.id
                        );
                    }
                    _ => {
                        tracing::warn!(
                            "{} failed with unrecognized status {}, retried = {}, io_id = {}, req_id = {}",
                            ctx,
                            status,
                            closure.retried_times(),
                            closure.io_id,
                            ctx.id
                        );
                    }
                }
            }
        }

        self.on_retry(ctx, closure, status, rpc_timed_out).await
    }

    async fn on_rpc_failed(
        &self,
        ctx: &RequestContext,
        closure: &mut RequestClosure,
        target: Option<AttemptTarget>,
        err: &RpcError,
    ) {
        if let Some(t) = target {
            self.transport.reset_if_not_healthy(t.cs);
        }

        if err.is_timeout() {
            if let Some(t) = target {
                self.meta_cache.unstable_helper().increase_timeout(t.cs);
            }
            metric::incr_timeout_rpc(closure.metric(), ctx.optype);
        }

        tracing::warn!(
            "{} rpc failed: {}, retried = {}, io_id = {}, req_id = {}, remote = {:?}",
            ctx,
            err,
            closure.retried_times(),
            closure.io_id,
            ctx.id,
            target.map(|t| t.endpoint)
        );

        match target {
            Some(t) => match self
                .meta_cache
                .unstable_helper()
                .unstable_state(t.cs, t.endpoint)
            {
                UnstableState::ServerUnstable => {
                    if self
                        .meta_cache
                        .set_server_unstable(t.endpoint.host_ip())
                        .is_err()
                    {
                        tracing::warn!(
                            "mark host of chunkserver {} unstable failed, marking the chunkserver alone",
                            t.cs
                        );
                        self.meta_cache.set_chunkserver_unstable(t.cs);
                    }
                }
                UnstableState::ChunkServerUnstable => {
                    self.meta_cache.set_chunkserver_unstable(t.cs);
                }
                UnstableState::NoUnstable => {
                    self.refresh_leader(ctx, closure, target).await;
                }
            },
            // Dispatch never selected a server; only a refresh can help.
            None => self.refresh_leader(ctx, closure, None).await,
        }
    }

    fn on_success(
        &self,
        ctx: &mut RequestContext,
        closure: &mut RequestClosure,
        response: ChunkResponse,
        latency_us: u64,
    ) {
        closure.set_failed(StatusCode::OK);
        metric::latency_record(closure.metric(), ctx.optype, latency_us);
        metric::incr_rpc_qps(closure.metric(), ctx.optype, ctx.rawlength);

        match ctx.optype {
            OpType::Read | OpType::ReadSnapshot => {
                if let ChunkResponse::Io(io) = response {
                    ctx.read_data = io.data.unwrap_or_default();
                }
            }
            OpType::GetChunkInfo => {
                if let ChunkResponse::Info(info) = response {
                    ctx.chunk_sns = info.chunk_sns;
                }
            }
            _ => {}
        }
    }

    fn on_chunk_not_exist(
        &self,
        ctx: &mut RequestContext,
        closure: &mut RequestClosure,
        latency_us: u64,
    ) {
        if ctx.optype == OpType::Read {
            // Reading an unallocated chunk observes zeroes.
            closure.set_failed(StatusCode::OK);
            ctx.read_data = Bytes::from(vec![0u8; ctx.rawlength as usize]);
        } else {
            closure.set_failed(ChunkCode::CHUNK_NOT_EXIST);
            tracing::warn!(
                "{} chunk not exists, retried = {}, io_id = {}, req_id = {}",
                ctx,
                closure.retried_times(),
                closure.io_id,
                ctx.id
            );
        }
        metric::latency_record(closure.metric(), ctx.optype, latency_us);
        metric::incr_rpc_qps(closure.metric(), ctx.optype, ctx.rawlength);
    }

    fn on_invalid_request(&self, ctx: &RequestContext, closure: &mut RequestClosure) {
        closure.set_failed(ChunkCode::INVALID_REQUEST);
        metric::incr_fail_rpc(closure.metric(), ctx.optype);
        tracing::error!(
            "{} failed for invalid format, retried = {}, io_id = {}, req_id = {}",
            ctx,
            closure.retried_times(),
            closure.io_id,
            ctx.id
        );
    }

    async fn on_redirected(
        &self,
        ctx: &RequestContext,
        closure: &mut RequestClosure,
        response: &ChunkResponse,
        target: Option<AttemptTarget>,
    ) {
        tracing::warn!(
            "{} redirected, retried = {}, io_id = {}, req_id = {}, leader hint = {:?}",
            ctx,
            closure.retried_times(),
            closure.io_id,
            ctx.id,
            response.redirect()
        );

        if let Some(hint) = response.redirect() {
            if self
                .update_leader_with_redirect(ctx, closure, target, hint)
                .await
                .is_ok()
            {
                return;
            }
        }

        self.refresh_leader(ctx, closure, target).await;
    }

    async fn update_leader_with_redirect(
        &self,
        ctx: &RequestContext,
        closure: &mut RequestClosure,
        target: Option<AttemptTarget>,
        hint: &str,
    ) -> ClientResult<()> {
        let addr: Address = match hint.parse() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!("parse leader address from {:?} failed: {}", hint, e);
                return Err(e.into());
            }
        };

        let (lpid, cpid) = (ctx.idinfo.lpid, ctx.idinfo.cpid);
        if let Err(e) = self.meta_cache.update_leader(lpid, cpid, addr) {
            tracing::warn!(
                "update leader of copyset (lpid={}, cpid={}) to {} failed: {}",
                lpid,
                cpid,
                addr,
                e
            );
            return Err(e);
        }

        let (leader, _) = self.meta_cache.get_leader(lpid, cpid, false).await?;
        closure.set_retry_directly(Some(leader) != target.map(|t| t.cs));
        Ok(())
    }

    async fn on_copyset_not_exist(
        &self,
        ctx: &RequestContext,
        closure: &mut RequestClosure,
        target: Option<AttemptTarget>,
    ) {
        tracing::warn!(
            "{} copyset not exists, retried = {}, io_id = {}, req_id = {}",
            ctx,
            closure.retried_times(),
            closure.io_id,
            ctx.id
        );
        self.refresh_leader(ctx, closure, target).await;
    }

    fn on_backward(&self, ctx: &mut RequestContext, closure: &RequestClosure) {
        let latest = self.meta_cache.latest_file_sn();
        tracing::warn!(
            "{} returned backward, seq {} -> {}, retried = {}, io_id = {}, req_id = {}",
            ctx,
            ctx.seq,
            latest,
            closure.retried_times(),
            closure.io_id,
            ctx.id
        );
        ctx.seq = latest;
    }

    /// Refresh the copyset leader through the authority. Failure keeps
    /// `retry_directly` clear so the next attempt waits out the base
    /// interval; a changed leader retries without delay.
    async fn refresh_leader(
        &self,
        ctx: &RequestContext,
        closure: &mut RequestClosure,
        target: Option<AttemptTarget>,
    ) {
        let (lpid, cpid) = (ctx.idinfo.lpid, ctx.idinfo.cpid);
        match self.meta_cache.get_leader(lpid, cpid, true).await {
            Err(e) => {
                tracing::warn!(
                    "refresh leader failed, lpid = {}, cpid = {}, io_id = {}, req_id = {}: {}",
                    lpid,
                    cpid,
                    closure.io_id,
                    ctx.id,
                    e
                );
            }
            Ok((leader, _)) => {
                closure.set_retry_directly(Some(leader) != target.map(|t| t.cs));
            }
        }
    }

    async fn on_retry(
        &self,
        ctx: &RequestContext,
        closure: &mut RequestClosure,
        status: status_code_t,
        rpc_timed_out: bool,
    ) -> RetryDecision {
        metric::incr_fail_rpc(closure.metric(), ctx.optype);

        if closure.retried_times() >= self.opt.chunkserver_op_max_retry {
            closure.set_failed(status);
            tracing::error!(
                "{} retried times exceed, last status = {}, io_id = {}, req_id = {}",
                ctx,
                status_code::to_string(status),
                closure.io_id,
                ctx.id
            );
            return RetryDecision::Complete;
        }

        if !closure.is_slow_request()
            && closure.elapsed_ms() > self.opt.chunkserver_slow_request_threshold_ms
        {
            closure.mark_as_slow_request();
            metric::incr_slow_request(closure.metric());
            tracing::error!(
                "slow request: {} retrying for {} ms, retried = {}, io_id = {}, req_id = {}",
                ctx,
                closure.elapsed_ms(),
                closure.retried_times(),
                closure.io_id,
                ctx.id
            );
        }

        let sleep = self.pre_process_before_retry(ctx, closure, status, rpc_timed_out);
        closure.increment_retried_times();
        RetryDecision::Retry { sleep }
    }

    /// Compute the next attempt's timeout (after an RPC timeout) or the
    /// sleep before re-dispatch (everything else).
    fn pre_process_before_retry(
        &self,
        ctx: &RequestContext,
        closure: &mut RequestClosure,
        status: status_code_t,
        rpc_timed_out: bool,
    ) -> Duration {
        if rpc_timed_out {
            let retried = closure.retried_times();
            let leader_may_change = self
                .meta_cache
                .is_leader_may_change(ctx.idinfo.lpid, ctx.idinfo.cpid);

            // After a leader change the stale attempt only needs a prompt
            // retry against the new leader; a backed-off timeout would turn
            // a short outage into a long hang.
            let next_timeout_ms = if retried
                < self.opt.chunkserver_min_retry_times_force_timeout_backoff
                && leader_may_change
            {
                self.opt.chunkserver_rpc_timeout_ms
            } else {
                self.backoff.timeout_backoff(retried)
            };

            closure.set_next_timeout_ms(next_timeout_ms);
            tracing::warn!(
                "rpc timed out, next timeout = {} ms, {}, retried = {}, io_id = {}, req_id = {}",
                next_timeout_ms,
                ctx,
                retried,
                closure.io_id,
                ctx.id
            );
            return Duration::ZERO;
        }

        if status == ChunkCode::OVERLOAD {
            let sleep_us = self.backoff.overload_backoff(closure.retried_times());
            tracing::warn!(
                "chunkserver overload, sleep = {} us, {}, retried = {}, io_id = {}, req_id = {}",
                sleep_us,
                ctx,
                closure.retried_times(),
                closure.io_id,
                ctx.id
            );
            return Duration::from_micros(sleep_us);
        }

        let mut sleep_us = 0;
        if !closure.retry_directly() {
            sleep_us = self.opt.chunkserver_op_retry_interval_us;
            if status == ChunkCode::REDIRECTED {
                sleep_us /= 10;
            }
        }

        tracing::warn!(
            "rpc failed, {}, {} retried = {}, status = {}, io_id = {}, req_id = {}",
            if closure.retry_directly() {
                "retry directly,".to_string()
            } else {
                format!("sleep {} us,", sleep_us)
            },
            ctx,
            closure.retried_times(),
            status_code::to_string(status),
            closure.io_id,
            ctx.id
        );
        Duration::from_micros(sleep_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestDone;
    use crate::sender::RequestSender;
    use crate::testutil::*;
    use vbs_types::{ChunkId, ChunkIdInfo, CopysetId, LogicalPoolId, RpcCode, SequenceNum};

    fn idinfo() -> ChunkIdInfo {
        ChunkIdInfo::new(LogicalPoolId(1), CopysetId(100), ChunkId(7))
    }

    fn opt() -> FailureRequestOption {
        FailureRequestOption {
            chunkserver_op_retry_interval_us: 100_000,
            chunkserver_max_retry_sleep_interval_us: 8_000_000,
            chunkserver_rpc_timeout_ms: 1_000,
            chunkserver_max_rpc_timeout_ms: 16_000,
            chunkserver_op_max_retry: 3,
            chunkserver_min_retry_times_force_timeout_backoff: 3,
            chunkserver_slow_request_threshold_ms: 45_000,
            chunkserver_unstable_threshold: 5,
            server_unstable_threshold: 3,
        }
    }

    struct Fixture {
        handler: CompletionHandler,
        sender: RequestSender,
        cache: Arc<MetaCache>,
        fetcher: Arc<TestFetcher>,
        transport: Arc<ScriptedTransport>,
    }

    fn fixture(
        script: Vec<Result<ChunkResponse, RpcError>>,
        leader: Option<(vbs_types::ChunkServerId, Address)>,
    ) -> Fixture {
        let transport = ScriptedTransport::new(script);
        let fetcher = TestFetcher::new(leader);
        let cache = Arc::new(MetaCache::new(
            Arc::clone(&fetcher) as Arc<dyn crate::metacache::LeaderFetcher>,
            &opt(),
        ));
        let handler = CompletionHandler::new(
            Arc::clone(&cache),
            Arc::clone(&transport) as Arc<dyn ChunkTransport>,
            opt(),
        );
        let sender = RequestSender::new(
            Arc::clone(&transport) as Arc<dyn ChunkTransport>,
            Arc::clone(&cache),
        );
        Fixture {
            handler,
            sender,
            cache,
            fetcher,
            transport,
        }
    }

    fn noop_done() -> RequestDone {
        Box::new(|_| {})
    }

    async fn run_one_attempt(
        f: &Fixture,
        ctx: &mut RequestContext,
        closure: &mut RequestClosure,
    ) -> RetryDecision {
        let timeout = Duration::from_millis(closure.next_timeout_ms());
        let outcome = f.sender.send_request(ctx, timeout).await;
        f.handler.on_rpc_returned(ctx, closure, outcome).await
    }

    #[tokio::test]
    async fn test_success_completes_without_retry() {
        vbs_logging::init_test_logging();
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(vec![ok_io()], Some((cs, ep(1, 8200))));

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        ctx.rawlength = 4096;
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        assert!(matches!(decision, RetryDecision::Complete));
        assert_eq!(closure.error_code(), StatusCode::OK);
        assert_eq!(closure.retried_times(), 0);
    }

    #[tokio::test]
    async fn test_read_success_attaches_body() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(vec![ok_read(b"chunk-bytes")], Some((cs, ep(1, 8200))));

        let mut ctx = RequestContext::new(OpType::Read, idinfo());
        ctx.rawlength = 11;
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        assert!(matches!(decision, RetryDecision::Complete));
        assert_eq!(ctx.read_data, Bytes::from_static(b"chunk-bytes"));
    }

    #[tokio::test]
    async fn test_read_chunk_not_exist_zero_fills() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(
            vec![io_status(ChunkCode::CHUNK_NOT_EXIST)],
            Some((cs, ep(1, 8200))),
        );

        let mut ctx = RequestContext::new(OpType::Read, idinfo());
        ctx.rawlength = 4096;
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        assert!(matches!(decision, RetryDecision::Complete));
        assert_eq!(closure.error_code(), StatusCode::OK);
        assert_eq!(ctx.read_data.len(), 4096);
        assert!(ctx.read_data.iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_write_chunk_not_exist_fails() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(
            vec![io_status(ChunkCode::CHUNK_NOT_EXIST)],
            Some((cs, ep(1, 8200))),
        );

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        assert!(matches!(decision, RetryDecision::Complete));
        assert_eq!(closure.error_code(), ChunkCode::CHUNK_NOT_EXIST);
    }

    #[tokio::test]
    async fn test_permanent_failures_terminate() {
        for status in [
            ChunkCode::INVALID_REQUEST,
            ChunkCode::CHUNK_EXIST,
            ChunkCode::EPOCH_TOO_OLD,
        ] {
            let cs = vbs_types::ChunkServerId(7);
            let f = fixture(vec![io_status(status)], Some((cs, ep(1, 8200))));
            let mut ctx = RequestContext::new(OpType::Write, idinfo());
            let mut closure = RequestClosure::new(noop_done(), 1_000, None);

            let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
            assert!(matches!(decision, RetryDecision::Complete));
            assert_eq!(closure.error_code(), status);
        }
    }

    #[tokio::test]
    async fn test_backward_on_write_refreshes_seq_and_retries() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(vec![io_status(ChunkCode::BACKWARD)], Some((cs, ep(1, 8200))));
        f.cache.set_latest_file_sn(SequenceNum(42));

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        ctx.seq = SequenceNum(3);
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        match decision {
            RetryDecision::Retry { sleep } => {
                assert_eq!(sleep, Duration::from_micros(100_000));
            }
            other => panic!("expected retry, got {:?}", other),
        }
        assert_eq!(ctx.seq, SequenceNum(42));
        assert_eq!(closure.retried_times(), 1);
    }

    #[tokio::test]
    async fn test_backward_on_read_fails() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(vec![io_status(ChunkCode::BACKWARD)], Some((cs, ep(1, 8200))));

        let mut ctx = RequestContext::new(OpType::Read, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        assert!(matches!(decision, RetryDecision::Complete));
        assert_eq!(closure.error_code(), ChunkCode::BACKWARD);
    }

    #[tokio::test]
    async fn test_redirect_with_hint_updates_leader_and_skips_sleep() {
        let old_cs = vbs_types::ChunkServerId(7);
        let new_cs = vbs_types::ChunkServerId(8);
        let f = fixture(
            vec![io_redirect(ChunkCode::REDIRECTED, "10.0.0.2:8200")],
            Some((old_cs, ep(1, 8200))),
        );

        // Teach the cache the new peer through another copyset.
        f.fetcher.set_leader(new_cs, ep(2, 8200));
        f.cache
            .get_leader(LogicalPoolId(1), CopysetId(999), true)
            .await
            .unwrap();
        // Point our copyset back at the old leader.
        f.fetcher.set_leader(old_cs, ep(1, 8200));
        f.cache
            .get_leader(LogicalPoolId(1), CopysetId(100), true)
            .await
            .unwrap();
        let fetches_before = f.fetcher.fetches();

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        match decision {
            RetryDecision::Retry { sleep } => assert_eq!(sleep, Duration::ZERO),
            other => panic!("expected retry, got {:?}", other),
        }
        assert!(closure.retry_directly());
        // The hint was applied without an authoritative fetch.
        assert_eq!(f.fetcher.fetches(), fetches_before);
        let (leader, _) = f
            .cache
            .get_leader(LogicalPoolId(1), CopysetId(100), false)
            .await
            .unwrap();
        assert_eq!(leader, new_cs);
    }

    #[tokio::test]
    async fn test_redirect_with_malformed_hint_refreshes() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(
            vec![io_redirect(ChunkCode::REDIRECTED, "not-an-endpoint")],
            Some((cs, ep(1, 8200))),
        );

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let fetches_before = f.fetcher.fetches();
        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        match decision {
            RetryDecision::Retry { sleep } => {
                // Same leader after refresh: redirect sleeps a tenth of the
                // base interval.
                assert_eq!(sleep, Duration::from_micros(10_000));
            }
            other => panic!("expected retry, got {:?}", other),
        }
        // The malformed hint fell through to an authoritative refresh.
        assert!(f.fetcher.fetches() > fetches_before);
        assert!(!closure.retry_directly());
    }

    #[tokio::test]
    async fn test_get_chunk_info_redirect_reads_info_response() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(
            vec![
                info_redirect(ChunkCode::REDIRECTED, "10.0.0.1:8200"),
                info_ok(vec![5, 4]),
            ],
            Some((cs, ep(1, 8200))),
        );

        let mut ctx = RequestContext::new(OpType::GetChunkInfo, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        assert!(matches!(decision, RetryDecision::Retry { .. }));

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        assert!(matches!(decision, RetryDecision::Complete));
        assert_eq!(ctx.chunk_sns, vec![SequenceNum(5), SequenceNum(4)]);
    }

    #[tokio::test]
    async fn test_copyset_not_exist_refreshes_each_time_until_budget() {
        let cs = vbs_types::ChunkServerId(7);
        let script = vec![
            io_status(ChunkCode::COPYSET_NOT_EXIST),
            io_status(ChunkCode::COPYSET_NOT_EXIST),
            io_status(ChunkCode::COPYSET_NOT_EXIST),
            io_status(ChunkCode::COPYSET_NOT_EXIST),
        ];
        let f = fixture(script, Some((cs, ep(1, 8200))));

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let mut dispatches = 0;
        loop {
            dispatches += 1;
            match run_one_attempt(&f, &mut ctx, &mut closure).await {
                RetryDecision::Retry { .. } => continue,
                RetryDecision::Complete => break,
            }
        }

        // max_retry = 3: attempts 0..3, four dispatches total.
        assert_eq!(dispatches, 4);
        assert_eq!(closure.retried_times(), 3);
        assert_eq!(closure.error_code(), ChunkCode::COPYSET_NOT_EXIST);
        // Every completion refreshed the leader (initial resolve + 4).
        assert!(f.fetcher.fetches() >= 4);
    }

    #[tokio::test]
    async fn test_timeout_with_leader_may_change_keeps_base_timeout() {
        let cs = vbs_types::ChunkServerId(7);
        let mut custom = opt();
        custom.chunkserver_op_max_retry = 10;
        let transport = ScriptedTransport::new(Vec::new());
        let fetcher = TestFetcher::new(Some((cs, ep(1, 8200))));
        let cache = Arc::new(MetaCache::new(
            Arc::clone(&fetcher) as Arc<dyn crate::metacache::LeaderFetcher>,
            &custom,
        ));
        let handler = CompletionHandler::new(
            Arc::clone(&cache),
            Arc::clone(&transport) as Arc<dyn ChunkTransport>,
            custom,
        );

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        // Two prior retries; the leader is suspected stale and the
        // authority is unreachable, so the suspicion cannot be resolved.
        closure.increment_retried_times();
        closure.increment_retried_times();
        cache
            .get_leader(LogicalPoolId(1), CopysetId(100), false)
            .await
            .unwrap();
        cache.set_chunkserver_unstable(cs);
        fetcher.clear_leader();
        assert!(cache.is_leader_may_change(LogicalPoolId(1), CopysetId(100)));

        let timeout_outcome = || crate::sender::AttemptOutcome {
            target: Some(crate::sender::AttemptTarget {
                cs,
                endpoint: ep(1, 8200),
            }),
            result: Err(RpcError::Timeout),
            latency_us: 0,
        };

        // retried = 2 < 3 and leader may change: keep the base timeout.
        let decision = handler
            .on_rpc_returned(&mut ctx, &mut closure, timeout_outcome())
            .await;
        match decision {
            RetryDecision::Retry { sleep } => assert_eq!(sleep, Duration::ZERO),
            other => panic!("expected retry, got {:?}", other),
        }
        assert_eq!(closure.next_timeout_ms(), 1_000);
        assert_eq!(closure.retried_times(), 3);
        assert!(cache.is_leader_may_change(LogicalPoolId(1), CopysetId(100)));

        // retried = 3 reaches the forced-backoff threshold: the timeout
        // backs off even though the leader is still in doubt.
        let decision = handler
            .on_rpc_returned(&mut ctx, &mut closure, timeout_outcome())
            .await;
        assert!(matches!(decision, RetryDecision::Retry { .. }));
        assert_eq!(closure.next_timeout_ms(), 8_000);
    }

    #[tokio::test]
    async fn test_timeouts_feed_unstable_tracker() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(Vec::new(), Some((cs, ep(1, 8200))));

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        for _ in 0..3 {
            let outcome = crate::sender::AttemptOutcome {
                target: Some(crate::sender::AttemptTarget {
                    cs,
                    endpoint: ep(1, 8200),
                }),
                result: Err(RpcError::Timeout),
                latency_us: 0,
            };
            let _ = f.handler.on_rpc_returned(&mut ctx, &mut closure, outcome).await;
        }
        assert_eq!(f.cache.unstable_helper().timeout_count(cs), 3);
        assert!(!f.transport.resets.lock().is_empty());

        // A non-timeout completion clears the count.
        let outcome = crate::sender::AttemptOutcome {
            target: Some(crate::sender::AttemptTarget {
                cs,
                endpoint: ep(1, 8200),
            }),
            result: io_status(ChunkCode::OVERLOAD),
            latency_us: 0,
        };
        let _ = f.handler.on_rpc_returned(&mut ctx, &mut closure, outcome).await;
        assert_eq!(f.cache.unstable_helper().timeout_count(cs), 0);
    }

    #[tokio::test]
    async fn test_overload_sleep_and_no_unstable_accounting() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(vec![io_status(ChunkCode::OVERLOAD)], Some((cs, ep(1, 8200))));

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        match decision {
            RetryDecision::Retry { sleep } => {
                let us = sleep.as_micros() as u64;
                assert!((100_000..=110_000).contains(&us), "slept {}", us);
            }
            other => panic!("expected retry, got {:?}", other),
        }
        // Overload never counts toward instability.
        assert_eq!(f.cache.unstable_helper().timeout_count(cs), 0);
        // Timeout untouched by the overload path.
        assert_eq!(closure.next_timeout_ms(), 1_000);
    }

    #[tokio::test]
    async fn test_unknown_status_retries_with_base_sleep() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(vec![io_status(1777)], Some((cs, ep(1, 8200))));

        let mut ctx = RequestContext::new(OpType::Write, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let decision = run_one_attempt(&f, &mut ctx, &mut closure).await;
        match decision {
            RetryDecision::Retry { sleep } => {
                assert_eq!(sleep, Duration::from_micros(100_000));
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_budget_surfaces_transport_code() {
        let cs = vbs_types::ChunkServerId(7);
        let f = fixture(
            vec![
                Err(RpcError::SendFailed("broken pipe".into())),
                Err(RpcError::SendFailed("broken pipe".into())),
                Err(RpcError::SendFailed("broken pipe".into())),
                Err(RpcError::SendFailed("broken pipe".into())),
            ],
            Some((cs, ep(1, 8200))),
        );

        let mut ctx = RequestContext::new(OpType::RecoverChunk, idinfo());
        let mut closure = RequestClosure::new(noop_done(), 1_000, None);

        let mut dispatches = 0;
        loop {
            dispatches += 1;
            match run_one_attempt(&f, &mut ctx, &mut closure).await {
                RetryDecision::Retry { .. } => continue,
                RetryDecision::Complete => break,
            }
        }
        assert_eq!(dispatches, 4);
        assert_eq!(closure.error_code(), RpcCode::SEND_FAILED);
    }
}
