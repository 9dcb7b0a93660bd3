//! Per-session query recorder
//!
//! The relay's client-to-server copy tees every byte into a [`RecordTap`].
//! Taps push chunks onto an unbounded channel, so the relay never waits on
//! the recorder. A consumer task re-frames the chunk stream with the same
//! packet reader used on the sockets, tracks prepared statements, and
//! appends timestamped SQL lines to the session's log file.
//!
//! Shutdown is producer-first: once every tap clone is dropped, the consumer
//! observes end-of-stream, drains what is buffered, and exits.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::Local;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::annotation;
use super::interpolate::interpolate;
use super::stmt_args::parse_stmt_args;
use crate::error::Result;
use crate::protocol::packets::{
    Packet, COM_QUERY, COM_STMT_CLOSE, COM_STMT_EXECUTE, COM_STMT_PREPARE,
};
use crate::protocol::parser::read_packet;

/// Timestamp prefix on every emitted line
const LINE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Producer half of the recorder pipe.
///
/// `write` always accepts its input immediately; the channel is unbounded so
/// the relay is never slowed by recorder parsing or file I/O.
#[derive(Clone)]
pub struct RecordTap {
    pub(crate) tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl RecordTap {
    /// Hand a chunk of the client-to-server byte stream to the recorder.
    /// Chunks sent after the consumer has gone are silently dropped.
    pub fn write(&self, bytes: &[u8]) {
        let _ = self.tx.send(bytes.to_vec());
    }
}

/// A per-session query recorder bound to one log file.
pub struct QueryRecorder {
    tap: RecordTap,
    consumer: JoinHandle<()>,
}

impl QueryRecorder {
    /// Create the session log file and start the consumer task.
    pub async fn start(log_path: &Path) -> Result<Self> {
        info!("create query log file: {}", log_path.display());
        let file = File::create(log_path).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume_stream(rx, file));

        Ok(Self {
            tap: RecordTap { tx },
            consumer,
        })
    }

    /// A cloneable tap for the relay task.
    pub fn tap(&self) -> RecordTap {
        self.tap.clone()
    }

    /// Drop this recorder's own producer handle and wait for the consumer to
    /// drain. Tap clones held elsewhere must be dropped first or this will
    /// wait on them.
    pub async fn shutdown(self) {
        let QueryRecorder { tap, consumer } = self;
        drop(tap);
        let _ = consumer.await;
    }
}

/// AsyncRead over the chunk channel, so the framed packet reader can run
/// against the recorder pipe exactly as it does against a socket.
struct TapStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl AsyncRead for TapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos < this.chunk.len() {
                let n = (this.chunk.len() - this.pos).min(buf.remaining());
                buf.put_slice(&this.chunk[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.chunk = chunk;
                    this.pos = 0;
                }
                // all producers gone: end of stream
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Consumer loop: re-frame the command stream and record what it says.
async fn consume_stream(rx: mpsc::UnboundedReceiver<Vec<u8>>, file: File) {
    let mut stream = TapStream {
        rx,
        chunk: Vec::new(),
        pos: 0,
    };
    let mut log = SessionLog::new(file);

    loop {
        match read_packet(&mut stream).await {
            Ok(packet) => log.observe(&packet).await,
            Err(e) => {
                // EOF when the relay shuts the producer side; framing errors
                // also end recording (the tap carries no resync point)
                debug!("recorder stream ended: {}", e);
                return;
            }
        }
    }
}

/// Recording state for one session: the log file and the prepared-statement
/// table.
struct SessionLog {
    file: File,
    /// Running prepared-statement counter. Deliberately NOT the id the
    /// upstream assigns: the server->client stream is never parsed, so
    /// prepares are numbered in arrival order and EXECUTE/CLOSE resolve
    /// against the most recent one.
    stmt_counter: u32,
    statements: HashMap<u32, String>,
}

impl SessionLog {
    fn new(file: File) -> Self {
        Self {
            file,
            stmt_counter: 0,
            statements: HashMap::new(),
        }
    }

    async fn observe(&mut self, packet: &Packet) {
        // nothing to record in bare commands like COM_QUIT
        if packet.payload.len() < 2 {
            return;
        }

        match packet.payload[0] {
            COM_QUERY => {
                let raw = String::from_utf8_lossy(&packet.payload[1..]).into_owned();
                let (sql, annotation) = annotation::extract(&raw);
                if let Some(ref a) = annotation {
                    debug!(
                        "admin query issued at {} (captured {})",
                        a.unix_milli, a.create_time
                    );
                }
                self.emit("QUERY", &sql).await;
            }
            COM_STMT_PREPARE => {
                let sql = String::from_utf8_lossy(&packet.payload[1..]).into_owned();
                self.stmt_counter += 1;
                self.statements.insert(self.stmt_counter, sql.clone());
                self.emit("PREPARE", &sql).await;
            }
            COM_STMT_EXECUTE => {
                let sql = self
                    .statements
                    .get(&self.stmt_counter)
                    .cloned()
                    .unwrap_or_default();
                let placeholders = sql.matches('?').count();

                match parse_stmt_args(placeholders, &packet.payload)
                    .and_then(|args| interpolate(&sql, &args))
                {
                    Ok(full_sql) => self.emit("FULLSQL", &full_sql).await,
                    Err(e) => error!("failed to reconstruct executed statement: {}", e),
                }
            }
            COM_STMT_CLOSE => {
                self.statements.remove(&self.stmt_counter);
            }
            _ => {}
        }
    }

    /// Append one timestamped line and flush it immediately.
    async fn emit(&mut self, tag: &str, sql: &str) {
        let line = format!(
            "[{}] [{}] {}\n",
            Local::now().format(LINE_TIME_FORMAT),
            tag,
            sql
        );
        if let Err(e) = self.file.write_all(line.as_bytes()).await {
            warn!("failed to write query log line: {}", e);
            return;
        }
        if let Err(e) = self.file.flush().await {
            warn!("failed to flush query log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{wrap_packet, write_lenenc_bytes};
    use crate::protocol::packets::{FIELD_TYPE_LONG, FIELD_TYPE_LONGLONG};

    fn command_packet(command: u8, tail: &[u8], seq: u8) -> Vec<u8> {
        let mut payload = vec![command];
        payload.extend_from_slice(tail);
        wrap_packet(&payload, seq)
    }

    fn execute_packet(bitmap: &[u8], types: &[(u8, u8)], values: &[u8]) -> Vec<u8> {
        let mut payload = vec![COM_STMT_EXECUTE];
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(0);
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(bitmap);
        payload.push(0x01);
        for (t, u) in types {
            payload.push(*t);
            payload.push(*u);
        }
        payload.extend_from_slice(values);
        wrap_packet(&payload, 0)
    }

    async fn record(chunks: Vec<Vec<u8>>) -> String {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("50001.log");

        let recorder = QueryRecorder::start(&log_path).await.unwrap();
        let tap = recorder.tap();
        for chunk in chunks {
            tap.write(&chunk);
        }
        drop(tap);
        recorder.shutdown().await;

        std::fs::read_to_string(&log_path).unwrap()
    }

    #[tokio::test]
    async fn test_plain_query_recorded() {
        let content = record(vec![command_packet(COM_QUERY, b"SELECT 1", 0)]).await;

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[QUERY] SELECT 1"), "line: {}", lines[0]);
    }

    #[tokio::test]
    async fn test_prepare_then_execute_integers() {
        let mut values = Vec::new();
        values.extend_from_slice(&7u32.to_le_bytes());
        values.extend_from_slice(&35u32.to_le_bytes());

        let content = record(vec![
            command_packet(COM_STMT_PREPARE, b"SELECT ?+?", 0),
            execute_packet(&[0x00], &[(FIELD_TYPE_LONG, 0), (FIELD_TYPE_LONG, 0)], &values),
        ])
        .await;

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[PREPARE] SELECT ?+?"));
        assert!(lines[1].contains("[FULLSQL] SELECT 7+35"));
    }

    #[tokio::test]
    async fn test_execute_with_null_and_string() {
        let mut values = Vec::new();
        write_lenenc_bytes(&mut values, b"ok");

        let content = record(vec![
            command_packet(COM_STMT_PREPARE, b"INSERT INTO t VALUES (?, ?)", 0),
            execute_packet(&[0x01], &[(FIELD_TYPE_LONG, 0), (0xFD, 0)], &values),
        ])
        .await;

        assert!(content.contains("[FULLSQL] INSERT INTO t VALUES (NULL, 'ok')"));
    }

    #[tokio::test]
    async fn test_stmt_close_drops_mapping() {
        let mut values = Vec::new();
        values.extend_from_slice(&9u64.to_le_bytes());

        let content = record(vec![
            command_packet(COM_STMT_PREPARE, b"SELECT ?", 0),
            command_packet(COM_STMT_CLOSE, &1u32.to_le_bytes(), 0),
            command_packet(COM_STMT_PREPARE, b"SELECT ?+0", 0),
            execute_packet(&[0x00], &[(FIELD_TYPE_LONGLONG, 0)], &values),
        ])
        .await;

        // the execute resolves against the second prepare, not the closed one
        assert!(content.contains("[FULLSQL] SELECT 9+0"), "got: {}", content);
    }

    #[tokio::test]
    async fn test_packets_reassembled_across_chunks() {
        let framed = command_packet(COM_QUERY, b"SELECT version()", 0);
        let chunks = framed.chunks(3).map(|c| c.to_vec()).collect();

        let content = record(chunks).await;
        assert!(content.contains("[QUERY] SELECT version()"));
    }

    #[tokio::test]
    async fn test_undecodable_execute_keeps_session_going() {
        // execute with new-params-bound unset: event logged as error, no line
        let mut bad_execute = vec![COM_STMT_EXECUTE];
        bad_execute.extend_from_slice(&1u32.to_le_bytes());
        bad_execute.push(0);
        bad_execute.extend_from_slice(&1u32.to_le_bytes());
        bad_execute.push(0x00); // null bitmap
        bad_execute.push(0x00); // new-params-bound = 0

        let content = record(vec![
            command_packet(COM_STMT_PREPARE, b"SELECT ?", 0),
            wrap_packet(&bad_execute, 0),
            command_packet(COM_QUERY, b"SELECT 2", 0),
        ])
        .await;

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[PREPARE] SELECT ?"));
        assert!(lines[1].contains("[QUERY] SELECT 2"));
    }

    #[tokio::test]
    async fn test_quit_and_unknown_commands_ignored() {
        let content = record(vec![
            wrap_packet(&[0x01], 0),                    // COM_QUIT, payload < 2 bytes
            command_packet(0x0E, b"\x00", 0),           // COM_PING-ish, not inspected
            command_packet(COM_QUERY, b"SELECT 3", 0),
        ])
        .await;

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[QUERY] SELECT 3"));
    }

    #[tokio::test]
    async fn test_timestamp_prefix_shape() {
        let content = record(vec![command_packet(COM_QUERY, b"SELECT 1", 0)]).await;
        let line = content.lines().next().unwrap();

        // [YYYY-MM-DD HH:MM:SS.mmm] [TAG] sql
        assert_eq!(&line[0..1], "[");
        assert_eq!(&line[5..6], "-");
        assert_eq!(&line[11..12], " ");
        assert_eq!(&line[20..21], ".");
        assert_eq!(&line[24..26], "] ");
    }
}
