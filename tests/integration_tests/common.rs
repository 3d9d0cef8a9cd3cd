// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Result, ensure};
use bytes::BytesMut;
use resp_cache_rs::{
    protocol::resp::{self, Value, encode_to_bytes},
    server::{
        auth::AuthService, executor::CommandExecutor, listener::NetworkListener,
        runtime::RuntimeConfig, stats::Stats,
    },
    storage::engine::StorageEngine,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

pub const TEST_USER: &str = "admin";
pub const TEST_PASSWORD: &str = "admin";

pub struct TestServer {
    pub listener: NetworkListener,
    pub addr: SocketAddr,
    pub storage: Arc<StorageEngine>,
    pub stats: Arc<Stats>,
}

/// Assembles the full stack on an ephemeral loopback port.
pub async fn start_server() -> Result<TestServer> {
    start_server_with(64, 0).await
}

pub async fn start_server_with(
    max_memory_mb: u64,
    default_ttl: i64,
) -> Result<TestServer> {
    let max_memory = max_memory_mb * 1024 * 1024;
    let stats = Arc::new(Stats::new(max_memory));
    let storage = Arc::new(StorageEngine::new(max_memory, default_ttl, stats.clone()));
    let auth = Arc::new(AuthService::new(TEST_USER, TEST_PASSWORD));
    let runtime = Arc::new(RuntimeConfig::new(max_memory_mb, 2, default_ttl));
    let executor = Arc::new(CommandExecutor::new(
        storage.clone(),
        stats.clone(),
        auth,
        runtime,
    ));

    let listener = NetworkListener::start(0, executor, stats.clone()).await?;
    let addr = listener.local_addr();

    Ok(TestServer { listener, addr, storage, stats })
}

/// One client connection plus the reply buffer that survives between
/// frames, so pipelined replies are never lost.
pub struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, buf: BytesMut::new() })
    }

    pub async fn send(&mut self, args: &[&str]) -> Result<()> {
        let cmd = Value::Array(args.iter().map(|a| Value::bulk_str(a)).collect());
        self.send_raw(&encode_to_bytes(&cmd)).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            if let Some((value, used)) = resp::parse(&self.buf)? {
                let _ = self.buf.split_to(used);
                return Ok(value);
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            ensure!(n > 0, "connection closed by server");
        }
    }

    pub async fn roundtrip(&mut self, args: &[&str]) -> Result<Value> {
        self.send(args).await?;
        self.recv().await
    }

    pub async fn authenticate(&mut self) -> Result<()> {
        let reply = self.roundtrip(&["AUTH", TEST_USER, TEST_PASSWORD]).await?;
        ensure!(reply == Value::ok(), "AUTH failed: {reply:?}");
        Ok(())
    }

    /// Drains the socket and succeeds once the server has closed it. A
    /// reset counts as closed; the server may drop the connection with
    /// bytes still unread.
    pub async fn expect_closed(&mut self) -> Result<()> {
        let mut scratch = [0u8; 256];
        loop {
            match self.stream.read(&mut scratch).await {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    return Ok(());
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
}
