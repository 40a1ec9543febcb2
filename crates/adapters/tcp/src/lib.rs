//! # meshbridge-adapter-tcp
//!
//! Persistent sessions over raw TCP, one JSON document per line.
//!
//! A client receives the snapshot line on connect, then every path change,
//! and one response line per request line. Blank lines are ignored.
//!
//! ## Dependency rule
//! Depends on `meshbridge-app` only: the session protocol does the work,
//! this crate moves lines.

mod error;

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use meshbridge_app::api::Api;
use meshbridge_app::event_bus::PathChangeFeed;
use meshbridge_app::session::Session;

pub use error::TcpError;

/// Accept connections forever, one task per client.
///
/// # Errors
///
/// Returns [`TcpError::Accept`] when the listener itself fails.
pub async fn serve(listener: TcpListener, api: Arc<Api>, feed: PathChangeFeed) -> Result<(), TcpError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "TCP server listening");
    }
    loop {
        let (stream, peer) = listener.accept().await.map_err(TcpError::Accept)?;
        tracing::debug!(%peer, "TCP client connected");
        let api = Arc::clone(&api);
        let feed = feed.clone();
        tokio::spawn(async move {
            handle_connection(stream, api, &feed).await;
            tracing::debug!(%peer, "TCP client disconnected");
        });
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> std::io::Result<()> {
    let mut line = message.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Run one session over `stream` until either side goes away.
pub async fn handle_connection<S>(stream: S, api: Arc<Api>, feed: &PathChangeFeed)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let (mut session, snapshot) = Session::open(api, feed);
    if write_line(&mut writer, &snapshot).await.is_err() {
        return;
    }

    loop {
        let outbound = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => session.handle(&line).await,
                Ok(None) => break,
                Err(error) => {
                    tracing::debug!(session = %session.id(), %error, "TCP read failed");
                    break;
                }
            },
            change = session.next_change() => match change {
                Some(change) => change,
                None => break,
            },
        };
        if write_line(&mut writer, &outbound).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    use meshbridge_adapter_memory::{MemorySettingsStore, MemoryStateStore};
    use meshbridge_adapter_virtual::{VirtualLight, VirtualModel, VirtualNetwork, VirtualRegistry};
    use meshbridge_app::bridge::Bridge;
    use meshbridge_app::ports::FixedLogLevel;

    use super::*;

    fn bridge() -> Bridge {
        let network = Arc::new(VirtualNetwork::new());
        network.insert(VirtualLight::info("0xb1"));
        let registry = Arc::new(VirtualRegistry::new(&network));
        Bridge::new(
            Arc::new(MemorySettingsStore::new()),
            Arc::new(MemoryStateStore::new()),
            network,
            registry,
            Arc::new(FixedLogLevel::new("info")),
        )
    }

    fn connect(bridge: &Bridge) -> BufReader<DuplexStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let api = Arc::clone(&bridge.api);
        let feed = bridge.feed.clone();
        tokio::spawn(async move { handle_connection(server, api, &feed).await });
        BufReader::new(client)
    }

    async fn next(client: &mut BufReader<DuplexStream>) -> Value {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(1), client.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn should_send_snapshot_line_first() {
        let bridge = bridge();
        let mut client = connect(&bridge);

        let snapshot = next(&mut client).await;

        assert_eq!(snapshot["path"], json!([]));
        assert!(snapshot["data"]["devices"].get("0xb1").is_some());
    }

    #[tokio::test]
    async fn should_answer_request_and_push_change() {
        let bridge = bridge();
        let mut client = connect(&bridge);
        next(&mut client).await;

        client
            .get_mut()
            .write_all(b"\n{\"command\":\"set\",\"path\":\"devices/0xb1/state\",\"data\":{\"state\":\"ON\"},\"requestId\":\"a\"}\n")
            .await
            .unwrap();

        let mut received = vec![next(&mut client).await, next(&mut client).await];
        received.sort_by_key(|message| message["command"].to_string());
        assert_eq!(received[0]["requestId"], json!("a"));
        assert_eq!(received[0]["status"], json!("successful"));
        assert_eq!(received[1]["path"], json!(["devices", "0xb1", "state"]));
    }
}
