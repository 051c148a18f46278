//! Line-oriented TCP transport.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::protocol_log::ProtocolLog;
use super::message::IrcMessage;
use super::SessionError;

/// Longest line accepted from the server; IRC allows 512 bytes, tags add more.
const MAX_LINE: usize = 8 * 1024;

pub struct IrcConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    buf: Vec<u8>,
    log: ProtocolLog,
}

impl IrcConnection {
    pub async fn connect(
        server: &str,
        port: u16,
        timeout: Duration,
        log: ProtocolLog,
    ) -> Result<Self, SessionError> {
        let addr = format!("{}:{}", server, port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SessionError::Connect {
                server: addr.clone(),
                message: format!("timed out after {}s", timeout.as_secs()),
            })?
            .map_err(|e| SessionError::Connect {
                server: addr.clone(),
                message: e.to_string(),
            })?;

        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
            buf: Vec::with_capacity(512),
            log,
        })
    }

    /// Send one protocol line; CRLF is appended.
    pub async fn send(&mut self, line: &str) -> Result<(), SessionError> {
        let shown = redact(line);
        trace!(line = %shown, "irc >>");
        self.log.push(format!(">> {}", shown));
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| SessionError::Io(e.to_string()))
    }

    /// Next message from the server. `PING` is answered here and never
    /// returned. `None` on end of stream.
    pub async fn next_message(&mut self) -> Result<Option<IrcMessage>, SessionError> {
        loop {
            self.buf.clear();
            let read = (&mut self.reader)
                .take(MAX_LINE as u64)
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| SessionError::Io(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            if read == MAX_LINE && self.buf.last() != Some(&b'\n') {
                debug!(limit = MAX_LINE, "Dropping over-length line");
                self.skip_rest_of_line().await?;
                continue;
            }

            let line = String::from_utf8_lossy(&self.buf);
            trace!(line = %line.trim_end(), "irc <<");
            self.log.push(line.trim_end());

            let Some(msg) = IrcMessage::parse(&line) else {
                continue;
            };
            if msg.command == "PING" {
                let token = msg.trailing().unwrap_or_default();
                self.send(&format!("PONG :{}", token)).await?;
                continue;
            }
            return Ok(Some(msg));
        }
    }

    /// Consume input up to and including the next `\n`.
    async fn skip_rest_of_line(&mut self) -> Result<(), SessionError> {
        loop {
            let (consumed, done) = {
                let available = self
                    .reader
                    .fill_buf()
                    .await
                    .map_err(|e| SessionError::Io(e.to_string()))?;
                if available.is_empty() {
                    return Ok(());
                }
                match available.iter().position(|b| *b == b'\n') {
                    Some(i) => (i + 1, true),
                    None => (available.len(), false),
                }
            };
            self.reader.consume(consumed);
            if done {
                return Ok(());
            }
        }
    }

    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Hide NickServ passwords from protocol traces.
fn redact(line: &str) -> String {
    let upper = line.to_ascii_uppercase();
    if upper.contains("NICKSERV") && (upper.contains("IDENTIFY") || upper.contains("REGISTER")) {
        let keep = line.len().min(line.find(" :").map(|i| i + 2).unwrap_or(line.len()));
        format!("{}<redacted>", &line[..keep])
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_redact_nickserv_commands() {
        assert_eq!(
            redact("PRIVMSG NickServ :IDENTIFY hunter2"),
            "PRIVMSG NickServ :<redacted>"
        );
        assert_eq!(redact("JOIN #announce"), "JOIN #announce");
    }

    #[tokio::test]
    async fn test_ping_is_answered_and_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"PING :abc123\r\n:srv NOTICE * :hello\r\n")
                .await
                .unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let log = ProtocolLog::default();
        let mut conn = IrcConnection::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(5),
            log.clone(),
        )
        .await
        .unwrap();
        let msg = conn.next_message().await.unwrap().unwrap();
        assert_eq!(msg.command, "NOTICE");
        assert_eq!(msg.trailing(), Some("hello"));

        assert_eq!(server.await.unwrap(), "PONG :abc123\r\n");
        assert_eq!(
            log.snapshot(),
            vec!["PING :abc123", ">> PONG :abc123", ":srv NOTICE * :hello"]
        );
    }

    #[tokio::test]
    async fn test_over_length_line_is_dropped_whole() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut flood = vec![b'x'; MAX_LINE];
            flood.extend_from_slice(b" ERROR :bogus\r\n:srv NOTICE * :after\r\n");
            socket.write_all(&flood).await.unwrap();
            let mut buf = vec![0u8; 16];
            let _ = socket.read(&mut buf).await;
        });

        let mut conn = IrcConnection::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(5),
            ProtocolLog::default(),
        )
        .await
        .unwrap();
        let msg = conn.next_message().await.unwrap().unwrap();
        assert_eq!(msg.command, "NOTICE");
        assert_eq!(msg.trailing(), Some("after"));
    }

    #[tokio::test]
    async fn test_sent_passwords_are_redacted_in_log() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let _ = socket.read(&mut buf).await;
        });

        let log = ProtocolLog::default();
        let mut conn = IrcConnection::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(5),
            log.clone(),
        )
        .await
        .unwrap();
        conn.send("PRIVMSG NickServ :IDENTIFY hunter2").await.unwrap();
        assert_eq!(log.snapshot(), vec![">> PRIVMSG NickServ :<redacted>"]);
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut conn = IrcConnection::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(5),
            ProtocolLog::default(),
        )
        .await
        .unwrap();
        assert!(conn.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = IrcConnection::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(5),
            ProtocolLog::default(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Connect { .. })));
    }
}
