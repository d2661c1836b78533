//! Relay core: one client socket paired with one backend socket.
//!
//! Responsibilities:
//! - Connect to the backend; if that fails, answer the client's first
//!   request with GATEWAY PATH UNAVAILABLE and close.
//! - Client -> backend: frame, evaluate, audit, then forward the original
//!   bytes (Allow/Alert) or suppress them (Block).
//! - Backend -> client: frame for sanity only, relay verbatim.
//! - Both directions run concurrently; the first to finish (EOF, error, or
//!   process shutdown) ends the session and drops both sockets.
//! - If the backend fails (EOF, socket error, or no reply within
//!   `response_timeout`), every forwarded request still waiting for a reply
//!   gets GATEWAY TARGET FAILED TO RESPOND before the client is closed.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::Instrument;

use mbguard_core::error::{FrameError, MbGuardError, Result};
use mbguard_core::protocol::function::{self, ExceptionCode};
use mbguard_core::protocol::mbap::MAX_ADU_LEN;
use mbguard_core::protocol::{Framer, Message};

use crate::app_state::{AppState, RelaySettings};
use crate::config::BlockResponse;
use crate::context::SourceIdentity;
use crate::obs::ProxyMetrics;
use crate::policy::{Decision, EvalTime, PolicySnapshot};

use super::session::{ConnStats, PendingRequests, SessionEnd, SessionLifecycle, SessionState};

const READ_BUF_LEN: usize = 4 * MAX_ADU_LEN;

/// Serve one accepted client connection until either side goes away.
pub async fn run_session(app: AppState, client: TcpStream, peer: SocketAddr) {
    let conn_id = app.next_connection_id();
    let source = SourceIdentity::new(peer.ip(), conn_id);
    let span = tracing::info_span!("session", conn_id, peer = %peer);
    relay(app, client, source).instrument(span).await
}

/// Keeps `connections_active` honest however the session ends.
struct ActiveConnection<'a> {
    metrics: &'a ProxyMetrics,
}

impl<'a> ActiveConnection<'a> {
    fn open(metrics: &'a ProxyMetrics) -> Self {
        metrics.connections_total.inc(&[]);
        metrics.connections_active.inc(&[]);
        Self { metrics }
    }
}

impl Drop for ActiveConnection<'_> {
    fn drop(&mut self) {
        self.metrics.connections_active.dec(&[]);
    }
}

/// Read-only view shared by both directions of one session.
struct RelayCtx<'a> {
    app: &'a AppState,
    policy: &'a PolicySnapshot,
    settings: &'a RelaySettings,
    source: SourceIdentity,
}

impl RelayCtx<'_> {
    /// Evaluate, count, and audit one client request.
    ///
    /// The record reaches the audit pipeline before the caller forwards or
    /// suppresses anything.
    fn decide(&self, msg: &Message, stats: &mut ConnStats) -> Decision {
        let metrics = self.app.metrics();
        metrics.messages_seen.inc(&[]);

        let started = Instant::now();
        let record = self
            .app
            .engine()
            .evaluate(self.policy, msg, &self.source, &EvalTime::now());
        metrics.policy_eval_duration.observe(&[], started.elapsed());

        let decision = record.decision;
        metrics
            .decisions
            .inc(&[("decision", decision.as_str()), ("reason", record.reason.as_str())]);
        stats.record(decision);

        if decision != Decision::Allow {
            tracing::debug!(
                decision = decision.as_str(),
                reason = record.reason.as_str(),
                tid = msg.transaction_id,
                fc = msg.function_code,
                function = function::name(msg.function_code),
                "request not allowed"
            );
        }

        self.app.audit().emit(record);
        decision
    }

    fn frame_error(&self, direction: &'static str, e: &FrameError) {
        self.app
            .metrics()
            .frame_errors
            .inc(&[("direction", direction), ("kind", e.kind())]);
        tracing::warn!(direction, error = %e, "framing error; closing session");
    }
}

async fn relay(app: AppState, client: TcpStream, source: SourceIdentity) {
    let _active = ActiveConnection::open(app.metrics());
    let mut life = SessionLifecycle::new();
    let settings = app.relay_settings();
    let policy = app.policy();

    let backend = match connect_backend(settings).await {
        Ok(b) => b,
        Err(e) => {
            app.metrics().backend_failures.inc(&[("stage", "connect")]);
            tracing::warn!(error = %e, backend = %settings.backend, "backend unreachable; refusing client");
            refuse_client(client, settings).await;
            life.advance(SessionState::Closed);
            return;
        }
    };
    let _ = client.set_nodelay(true);
    life.advance(SessionState::Relaying);
    tracing::info!(backend = %settings.backend, "session relaying");

    let (client_rd, client_wr) = client.into_split();
    let (backend_rd, backend_wr) = backend.into_split();
    let client_wr = Mutex::new(client_wr);

    let ctx = RelayCtx {
        app: &app,
        policy: &policy,
        settings,
        source,
    };
    let pending = PendingRequests::default();
    let mut stats = ConnStats::default();
    let mut responses = 0u64;
    let mut shutdown = app.subscribe_shutdown();

    let outcome = tokio::select! {
        r = client_to_backend(&ctx, client_rd, backend_wr, &client_wr, &pending, &mut stats) => r,
        r = backend_to_client(&ctx, backend_rd, &client_wr, &pending, &mut responses) => r,
        _ = shutdown.recv() => Ok(SessionEnd::Shutdown),
    };
    stats.responses = responses;

    life.advance(SessionState::Closing);
    match &outcome {
        Ok(end) => tracing::debug!(end = end.as_str(), "session ending"),
        Err(e) => tracing::warn!(error = %e, code = e.code().as_str(), "session failed"),
    }

    let backend_failed = matches!(
        outcome,
        Ok(SessionEnd::BackendClosed) | Err(MbGuardError::BackendUnavailable(_))
    );
    if backend_failed {
        answer_pending(&client_wr, &pending).await;
    }

    let mut client_wr = client_wr.into_inner();
    let _ = client_wr.shutdown().await;
    drop(client_wr);

    life.advance(SessionState::Closed);
    tracing::info!(
        requests = stats.requests,
        allowed = stats.allowed,
        blocked = stats.blocked,
        alerted = stats.alerted,
        responses = stats.responses,
        "session closed"
    );
}

async fn connect_backend(settings: &RelaySettings) -> Result<TcpStream> {
    let stream = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(settings.backend.as_str()))
        .await
        .map_err(|_| MbGuardError::BackendUnavailable(format!("connect to {} timed out", settings.backend)))?
        .map_err(|e| MbGuardError::BackendUnavailable(format!("connect to {}: {e}", settings.backend)))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Backend is down: answer the first request with an explicit gateway
/// exception rather than leaving the client hanging, then close.
async fn refuse_client(mut client: TcpStream, settings: &RelaySettings) {
    let mut framer = Framer::new();
    let mut buf = [0u8; MAX_ADU_LEN];

    let first = tokio::time::timeout(settings.connect_timeout, async {
        loop {
            let n = client.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            match framer.feed(&buf[..n]).next() {
                Some(Ok(msg)) => return Some(msg),
                Some(Err(_)) => return None,
                None => continue,
            }
        }
    })
    .await
    .ok()
    .flatten();

    if let Some(req) = first {
        let reply = req.exception_response(ExceptionCode::GatewayPathUnavailable.as_u8());
        let _ = client.write_all(&reply.raw).await;
    }
    let _ = client.shutdown().await;
}

/// Backend is gone: tell the client about every request it will never see
/// answered.
async fn answer_pending(client_wr: &Mutex<OwnedWriteHalf>, pending: &PendingRequests) {
    let outstanding = pending.take_all();
    if outstanding.is_empty() {
        return;
    }
    let code = ExceptionCode::GatewayTargetFailedToRespond.as_u8();
    for req in &outstanding {
        if write_client(client_wr, &req.exception_response(code).raw).await.is_err() {
            break;
        }
    }
    tracing::info!(outstanding = outstanding.len(), "pending requests answered with gateway exception");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending().await,
    }
}

async fn write_client(client_wr: &Mutex<OwnedWriteHalf>, bytes: &[u8]) -> Result<()> {
    let mut wr = client_wr.lock().await;
    wr.write_all(bytes).await?;
    Ok(())
}

async fn client_to_backend(
    ctx: &RelayCtx<'_>,
    mut rd: OwnedReadHalf,
    mut backend: OwnedWriteHalf,
    client_wr: &Mutex<OwnedWriteHalf>,
    pending: &PendingRequests,
    stats: &mut ConnStats,
) -> Result<SessionEnd> {
    let mut framer = Framer::new();
    let mut buf = vec![0u8; READ_BUF_LEN];

    loop {
        let n = rd.read(&mut buf).await?;
        if n == 0 {
            if framer.buffered() > 0 {
                tracing::debug!(discarded = framer.buffered(), "client closed mid-message");
            }
            return Ok(SessionEnd::ClientClosed);
        }

        for frame in framer.feed(&buf[..n]) {
            let msg = frame.map_err(|e| {
                ctx.frame_error("client", &e);
                e
            })?;

            let decision = ctx.decide(&msg, stats);
            if decision.forwards() {
                pending.push(&msg, Instant::now());
                if let Err(e) = backend.write_all(&msg.raw).await {
                    ctx.app.metrics().backend_failures.inc(&[("stage", "write")]);
                    return Err(MbGuardError::BackendUnavailable(format!("write: {e}")));
                }
            } else if ctx.settings.block_response == BlockResponse::Exception {
                let reply = msg.exception_response(ctx.settings.exception_code);
                write_client(client_wr, &reply.raw).await?;
            }
        }
    }
}

async fn backend_to_client(
    ctx: &RelayCtx<'_>,
    mut rd: OwnedReadHalf,
    client_wr: &Mutex<OwnedWriteHalf>,
    pending: &PendingRequests,
    responses: &mut u64,
) -> Result<SessionEnd> {
    let mut framer = Framer::new();
    let mut buf = vec![0u8; READ_BUF_LEN];
    let limit = ctx.settings.response_timeout;

    loop {
        let deadline = limit.and_then(|t: Duration| pending.oldest_sent().map(|sent| sent + t));
        let read = tokio::select! {
            r = rd.read(&mut buf) => r,
            // Re-arm the deadline when a request goes out.
            _ = pending.pushed(), if limit.is_some() && deadline.is_none() => continue,
            _ = wait_until(deadline) => {
                ctx.app.metrics().backend_failures.inc(&[("stage", "timeout")]);
                return Err(MbGuardError::BackendUnavailable(format!(
                    "no response within {} ms",
                    limit.map(|t| t.as_millis()).unwrap_or_default()
                )));
            }
        };
        let n = match read {
            Ok(n) => n,
            Err(e) => {
                ctx.app.metrics().backend_failures.inc(&[("stage", "read")]);
                return Err(MbGuardError::BackendUnavailable(format!("read: {e}")));
            }
        };
        if n == 0 {
            return Ok(SessionEnd::BackendClosed);
        }

        for frame in framer.feed(&buf[..n]) {
            let msg = frame.map_err(|e| {
                ctx.frame_error("backend", &e);
                e
            })?;
            pending.complete(&msg);
            write_client(client_wr, &msg.raw).await?;
            *responses += 1;
        }
    }
}
