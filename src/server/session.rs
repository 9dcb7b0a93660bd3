//! Per-connection proxy session
//!
//! Drives one client connection through the handshake and into the relay:
//! 1. Dial the upstream server
//! 2. Read its greeting, rewrite it (proxy version string, local connection
//!    id, SSL/compression capabilities cleared), send it to the client
//! 3. Read the client's handshake response and forward it upstream with its
//!    sequence id preserved
//! 4. Shuttle auth-switch rounds until the upstream's OK/ERR has reached the
//!    client
//! 5. Relay bytes in both directions, teeing client-to-server traffic into
//!    the query recorder

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::protocol::packets::{CLIENT_COMPRESS, CLIENT_SSL, ERR_PACKET, OK_PACKET};
use crate::protocol::parser::{
    build_handshake_response, build_handshake_v10, parse_handshake_response, parse_handshake_v10,
    read_packet, write_packet,
};
use crate::query_record::{QueryRecorder, RecordTap};

/// Version string advertised to clients in the rewritten greeting
const SERVER_VERSION: &str = "8.0.30-mysqltap";

/// Process-wide connection id counter; zero is never handed out
static CONNECTION_ID: AtomicU32 = AtomicU32::new(0);

fn next_connection_id() -> u32 {
    let id = CONNECTION_ID.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    if id == 0 {
        CONNECTION_ID.store(1, Ordering::Relaxed);
        return 1;
    }
    id
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Dialing the upstream server
    Connecting,
    /// Waiting for the upstream greeting
    AwaitingServerGreeting,
    /// Greeting mutated and sent to the client
    GreetingRewritten,
    /// Waiting for the client handshake response
    AwaitingClientResponse,
    /// Shuttling auth-switch packets until OK/ERR
    AuthSwitching,
    /// Bidirectional byte relay
    Relaying,
    /// Both sockets and the recorder closed
    Closed,
}

/// A per-connection proxy session owning the client socket, the upstream
/// socket once dialed, and the session's query recorder.
pub struct ProxySession {
    /// Client stream (Option so the relay can take ownership)
    client: Option<TcpStream>,
    client_addr: SocketAddr,
    config: Arc<Config>,
    capture_dir: PathBuf,
    state: SessionState,
}

impl ProxySession {
    pub fn new(
        client: TcpStream,
        client_addr: SocketAddr,
        config: Arc<Config>,
        capture_dir: PathBuf,
    ) -> Self {
        Self {
            client: Some(client),
            client_addr,
            config,
            capture_dir,
            state: SessionState::Connecting,
        }
    }

    fn client_mut(&mut self) -> Result<&mut TcpStream> {
        self.client
            .as_mut()
            .ok_or_else(|| ProxyError::Client("client stream not available".into()))
    }

    fn take_client(&mut self) -> Result<TcpStream> {
        self.client
            .take()
            .ok_or_else(|| ProxyError::Client("client stream not available".into()))
    }

    /// Drive the session to completion.
    pub async fn handle(mut self) -> Result<()> {
        let mut upstream = TcpStream::connect(&self.config.remote_db)
            .await
            .map_err(|e| {
                ProxyError::Upstream(format!("dial {}: {}", self.config.remote_db, e))
            })?;

        self.state = SessionState::AwaitingServerGreeting;
        let greeting_packet = read_packet(&mut upstream)
            .await
            .map_err(ProxyError::on_upstream)?;
        let mut greeting = parse_handshake_v10(&greeting_packet.payload)?;
        debug!(
            "upstream greeting: version={}, connection_id={}, charset={}, auth_plugin={}",
            greeting.server_version,
            greeting.connection_id,
            greeting.character_set,
            greeting.auth_plugin_name
        );

        // rewrite: proxy identity, local connection id, and no SSL or
        // compression offered to the client
        greeting.connection_id = next_connection_id();
        greeting.server_version = SERVER_VERSION.to_string();
        greeting.capability_flags &= !(CLIENT_SSL | CLIENT_COMPRESS);

        self.state = SessionState::GreetingRewritten;
        let payload = build_handshake_v10(&greeting);
        write_packet(self.client_mut()?, 0, &payload)
            .await
            .map_err(ProxyError::on_client)?;

        self.state = SessionState::AwaitingClientResponse;
        let response_packet = read_packet(self.client_mut()?)
            .await
            .map_err(ProxyError::on_client)?;
        let response =
            parse_handshake_response(&response_packet.payload, response_packet.sequence_id)?;

        info!(
            "client {} connects as '{}' (connection id {})",
            self.client_addr, response.username, greeting.connection_id
        );

        // forward the response with the client's sequence id preserved
        let payload = build_handshake_response(&response);
        write_packet(&mut upstream, response.sequence_id, &payload)
            .await
            .map_err(ProxyError::on_upstream)?;

        self.state = SessionState::AuthSwitching;
        self.auth_switch(&mut upstream).await?;

        self.state = SessionState::Relaying;
        self.relay(upstream).await
    }

    /// Shuttle authentication packets between the peers until the upstream
    /// sends OK or ERR.
    ///
    /// Each round forwards one server packet to the client; unless that
    /// packet terminated the exchange, one client reply is forwarded back.
    /// The loop always ends with a server-side OK/ERR that the client has
    /// seen. A peer closing early surfaces as Upstream/Client.
    async fn auth_switch(&mut self, upstream: &mut TcpStream) -> Result<()> {
        loop {
            let server_packet = read_packet(upstream).await.map_err(ProxyError::on_upstream)?;

            let finished = matches!(
                server_packet.payload.first(),
                Some(&OK_PACKET) | Some(&ERR_PACKET)
            );

            write_packet(
                self.client_mut()?,
                server_packet.sequence_id,
                &server_packet.payload,
            )
            .await
            .map_err(ProxyError::on_client)?;

            if finished {
                return Ok(());
            }

            let client_packet = read_packet(self.client_mut()?)
                .await
                .map_err(ProxyError::on_client)?;
            write_packet(upstream, client_packet.sequence_id, &client_packet.payload)
                .await
                .map_err(ProxyError::on_upstream)?;
        }
    }

    /// Run the bidirectional relay until either peer disconnects.
    ///
    /// Upstream-to-client is a raw byte copy; client-to-upstream tees into
    /// the query recorder. When either direction returns, the other is torn
    /// down (dropping the socket halves closes both sockets), then the
    /// recorder drains and the session is done. I/O failures here are
    /// ordinary disconnects, not errors.
    async fn relay(mut self, upstream: TcpStream) -> Result<()> {
        let client = self.take_client()?;

        let log_path = self
            .capture_dir
            .join(format!("{}.log", self.client_addr.port()));
        let recorder = QueryRecorder::start(&log_path).await?;
        let tap = recorder.tap();

        let (client_read, client_write) = client.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();

        let mut client_to_upstream = tokio::spawn(copy_stream(
            client_read,
            upstream_write,
            "client->upstream",
            Some(tap),
        ));
        let mut upstream_to_client = tokio::spawn(copy_stream(
            upstream_read,
            client_write,
            "upstream->client",
            None,
        ));

        tokio::select! {
            result = &mut client_to_upstream => {
                debug!("client->upstream copy finished: {:?}", result);
                upstream_to_client.abort();
                let _ = upstream_to_client.await;
            }
            result = &mut upstream_to_client => {
                debug!("upstream->client copy finished: {:?}", result);
                client_to_upstream.abort();
                let _ = client_to_upstream.await;
            }
        }

        // all tap clones are gone now; the consumer drains and exits
        recorder.shutdown().await;

        self.state = SessionState::Closed;
        debug!("session {} closed ({:?})", self.client_addr, self.state);
        Ok(())
    }
}

/// Copy bytes from reader to writer until EOF, optionally teeing every chunk
/// into the query recorder before it is forwarded.
async fn copy_stream<R, W>(
    mut reader: R,
    mut writer: W,
    direction: &'static str,
    tap: Option<RecordTap>,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut total_bytes = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            debug!("{}: EOF after {} bytes", direction, total_bytes);
            break;
        }

        if let Some(ref tap) = tap {
            tap.write(&buf[..n]);
        }

        trace!("{}: {} bytes", direction, n);
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total_bytes += n as u64;
    }

    let _ = writer.shutdown().await;

    Ok(total_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_sequential_and_nonzero() {
        let first = next_connection_id();
        let second = next_connection_id();
        assert_ne!(first, 0);
        assert_eq!(second, first + 1);
    }

    #[tokio::test]
    async fn test_copy_stream_counts_bytes() {
        let (mut a, b) = tokio::io::duplex(64);

        let data = b"hello world";
        a.write_all(data).await.unwrap();
        drop(a);

        let bytes = copy_stream(b, tokio::io::sink(), "test", None)
            .await
            .unwrap();
        assert_eq!(bytes, data.len() as u64);
    }

    #[tokio::test]
    async fn test_copy_stream_tees_into_tap() {
        use tokio::sync::mpsc;

        let (mut a, b) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tap = RecordTap { tx };

        a.write_all(b"abc").await.unwrap();
        drop(a);

        copy_stream(b, tokio::io::sink(), "test", Some(tap))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"abc");
    }
}
