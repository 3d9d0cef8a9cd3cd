// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use bytes::BytesMut;
use dashmap::DashMap;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpSocket, TcpStream},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    protocol::resp::{self, Value},
    server::{executor::CommandExecutor, stats::Stats},
};

/// Hard cap on simultaneously served connections.
pub const MAX_CLIENTS: usize = 1024;
/// Per-connection read buffer size.
pub const READ_BUFFER_SIZE: usize = 8192;
/// A frame still incomplete this close to a full buffer closes the
/// session.
const PARSE_HEADROOM: usize = 100;
const LISTEN_BACKLOG: u32 = 128;
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("{label} cancelled")),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow!("{label} timeout")),
            }
        }
    }
}

struct SessionHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps the connection gauge and the session table honest no matter how
/// the session task ends, including abort during shutdown.
struct SessionGuard {
    id: u64,
    stats: Arc<Stats>,
    sessions: Arc<DashMap<u64, SessionHandle>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.stats.dec_connections();
        self.sessions.remove(&self.id);
    }
}

/// TCP front end: one accept task feeding one task per connection.
///
/// Each session task owns its socket end to end, so commands on a
/// connection execute in arrival order and replies go out in matching
/// order. Cross-connection interleaving is serialized only inside the
/// shared components.
pub struct NetworkListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    sessions: Arc<DashMap<u64, SessionHandle>>,
    accept_handle: Option<JoinHandle<()>>,
}

impl NetworkListener {
    /// Binds 0.0.0.0:`port` and spawns the accept loop. Port 0 lets the OS
    /// choose; the bound address is available via [`local_addr`].
    ///
    /// [`local_addr`]: NetworkListener::local_addr
    pub async fn start(
        port: u16,
        executor: Arc<CommandExecutor>,
        stats: Arc<Stats>,
    ) -> Result<Self> {
        let socket = TcpSocket::new_v4().context("failed to create listen socket")?;
        socket
            .set_reuseaddr(true)
            .context("failed to set SO_REUSEADDR")?;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        socket
            .bind(addr)
            .with_context(|| format!("bind failed on {addr}"))?;
        let listener = socket
            .listen(LISTEN_BACKLOG)
            .context("listen failed")?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound address")?;

        info!("server listening on {local_addr}");

        let cancel = CancellationToken::new();
        let sessions: Arc<DashMap<u64, SessionHandle>> = Arc::new(DashMap::new());

        let accept_handle = tokio::spawn(accept_loop(
            listener,
            executor,
            stats,
            sessions.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            local_addr,
            cancel,
            sessions,
            accept_handle: Some(accept_handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn current_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Stops accepting, then gives every task a share of
    /// `shutdown_timeout` to finish before it is aborted. Sessions still
    /// registered afterwards are force-closed.
    pub async fn stop(mut self, shutdown_timeout: Duration) {
        info!("shutting down network listener");
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + shutdown_timeout;

        if let Some(handle) = self.accept_handle.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!("accept loop did not finish in time, aborting");
                abort.abort();
            }
        }

        let ids: Vec<u64> = self.sessions.iter().map(|e| *e.key()).collect();
        let mut forced = 0usize;
        for id in ids {
            let Some((_, session)) = self.sessions.remove(&id) else {
                continue;
            };
            session.cancel.cancel();
            let abort = session.handle.abort_handle();
            if tokio::time::timeout_at(deadline, session.handle)
                .await
                .is_err()
            {
                abort.abort();
                forced += 1;
            }
        }
        if forced > 0 {
            warn!("force-closed {forced} client sessions");
        }

        info!("network listener stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    executor: Arc<CommandExecutor>,
    stats: Arc<Stats>,
    sessions: Arc<DashMap<u64, SessionHandle>>,
    cancel: CancellationToken,
) {
    info!("accept loop started");
    let mut next_id: u64 = 0;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            res = listener.accept() => res,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            },
        };

        if sessions.len() >= MAX_CLIENTS {
            warn!("too many clients, rejecting connection from {peer}");
            continue;
        }

        let id = next_id;
        next_id += 1;
        info!("new connection from {peer} (session {id})");
        stats.inc_connections();

        let session_cancel = cancel.child_token();
        let handle = tokio::spawn(run_session(
            id,
            stream,
            executor.clone(),
            stats.clone(),
            sessions.clone(),
            session_cancel.clone(),
        ));
        sessions.insert(id, SessionHandle { cancel: session_cancel, handle });
    }

    info!("accept loop finished");
}

async fn run_session(
    id: u64,
    stream: TcpStream,
    executor: Arc<CommandExecutor>,
    stats: Arc<Stats>,
    sessions: Arc<DashMap<u64, SessionHandle>>,
    cancel: CancellationToken,
) {
    let _guard = SessionGuard { id, stats, sessions };

    if let Err(e) = serve_session(stream, executor, cancel).await {
        debug!("session {id} closed: {e}");
    } else {
        debug!("session {id} disconnected");
    }
}

/// Drives one connection: read, extract complete frames, execute, reply.
/// Returns `Err` for the abnormal closes (protocol error, I/O failure,
/// oversized frame) and `Ok` for EOF, QUIT, or cancellation.
async fn serve_session(
    mut stream: TcpStream,
    executor: Arc<CommandExecutor>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut out = BytesMut::new();
    let mut authenticated = false;

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = stream.read_buf(&mut buf) => res,
        };
        if read.context("read failed")? == 0 {
            return Ok(());
        }

        let mut processed = 0;
        let mut quit = false;
        while processed < buf.len() {
            match resp::parse(&buf[processed..]) {
                Err(e) => return Err(anyhow!("protocol error: {e}")),
                Ok(None) => break,
                Ok(Some((cmd, consumed))) => {
                    processed += consumed;

                    let reply = executor.execute(&cmd, &mut authenticated);
                    out.clear();
                    resp::encode(&reply, &mut out);
                    io_with_timeout(
                        "write reply",
                        stream.write_all(&out),
                        WRITE_TIMEOUT,
                        &cancel,
                    )
                    .await?;

                    if matches!(reply, Value::Error(_)) {
                        debug!("command rejected: {cmd:?}");
                    }
                    if cmd.command_name().as_deref() == Some("QUIT") {
                        quit = true;
                        break;
                    }
                },
            }
        }

        // Partial trailing bytes stay put for the next read.
        if processed > 0 {
            let _ = buf.split_to(processed);
        }
        if quit {
            return Ok(());
        }
        if buf.len() + PARSE_HEADROOM >= READ_BUFFER_SIZE {
            return Err(anyhow!("request too large or malformed"));
        }
    }
}
