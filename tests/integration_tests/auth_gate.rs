// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use resp_cache_rs::protocol::resp::Value;
use serial_test::serial;

use crate::integration_tests::common::{TestClient, start_server};

#[tokio::test]
#[serial]
async fn test_commands_require_auth_until_auth_succeeds() -> Result<()> {
    let server = start_server().await?;
    let mut client = TestClient::connect(server.addr).await?;

    // Raw frame, exactly as a client would send it.
    client
        .send_raw(b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n")
        .await?;
    assert_eq!(
        client.recv().await?,
        Value::Error("NOAUTH Authentication required".to_string())
    );

    client
        .send_raw(b"*3\r\n$4\r\nAUTH\r\n$5\r\nadmin\r\n$5\r\nadmin\r\n")
        .await?;
    assert_eq!(client.recv().await?, Value::ok());

    client
        .send_raw(b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n")
        .await?;
    assert_eq!(client.recv().await?, Value::Null);

    server.listener.stop(std::time::Duration::from_secs(5)).await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_wrong_password_leaves_session_unauthenticated() -> Result<()> {
    let server = start_server().await?;
    let mut client = TestClient::connect(server.addr).await?;

    let reply = client.roundtrip(&["AUTH", "admin", "wrong"]).await?;
    assert_eq!(
        reply,
        Value::Error("WRONGPASS invalid username-password pair".to_string())
    );

    let reply = client.roundtrip(&["SET", "k", "v"]).await?;
    assert_eq!(
        reply,
        Value::Error("NOAUTH Authentication required".to_string())
    );

    server.listener.stop(std::time::Duration::from_secs(5)).await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_auth_is_scoped_to_one_connection() -> Result<()> {
    let server = start_server().await?;

    let mut first = TestClient::connect(server.addr).await?;
    first.authenticate().await?;
    assert_eq!(first.roundtrip(&["SET", "k", "v"]).await?, Value::ok());

    // A second connection starts unauthenticated regardless.
    let mut second = TestClient::connect(server.addr).await?;
    let reply = second.roundtrip(&["GET", "k"]).await?;
    assert_eq!(
        reply,
        Value::Error("NOAUTH Authentication required".to_string())
    );

    server.listener.stop(std::time::Duration::from_secs(5)).await;
    Ok(())
}
