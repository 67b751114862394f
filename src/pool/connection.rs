//! Wire clients for the networked tiers
//!
//! Minimal client-side implementations of the two protocols the engine
//! speaks: RESP (Redis-like) and the memcache ASCII protocol. Only the
//! commands the adapters need are implemented; every exchange is bounded by
//! the configured read timeout.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Upper bound on one protocol line; anything longer is a violation
const MAX_LINE: usize = 64 * 1024;

async fn read_line(stream: &mut BufStream<TcpStream>, backend: &str) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let n = stream
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| Error::transport(backend, e))?;
    if n == 0 {
        return Err(Error::transport(backend, "connection closed"));
    }
    if line.len() > MAX_LINE {
        return Err(Error::protocol(backend, "line too long"));
    }
    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }
    Ok(line)
}

// =============================================================================
// RESP (Redis-like)
// =============================================================================

/// One parsed RESP reply
#[derive(Debug, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK` style simple string
    Simple(String),
    /// `-ERR ...` error reply
    Error(String),
    /// `:n` integer
    Integer(i64),
    /// `$len` bulk string; `None` is the null bulk (`$-1`)
    Bulk(Option<Vec<u8>>),
}

/// Client connection speaking a small RESP subset
#[derive(Debug)]
pub struct RespConnection {
    stream: BufStream<TcpStream>,
    read_timeout: Duration,
}

impl RespConnection {
    /// Connect and authenticate when a password is configured
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
        password: Option<&str>,
    ) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::transport("redis", "connect timed out"))?
            .map_err(|e| Error::transport("redis", e))?;

        let mut conn = Self {
            stream: BufStream::new(stream),
            read_timeout,
        };
        if let Some(password) = password {
            match conn.command(&[b"AUTH", password.as_bytes()]).await? {
                RespValue::Simple(_) => {}
                RespValue::Error(e) => return Err(Error::protocol("redis", e)),
                other => {
                    return Err(Error::protocol("redis", format!("AUTH reply: {other:?}")))
                }
            }
        }
        Ok(conn)
    }

    /// Issue one command as a RESP array of bulk strings and read the reply
    pub async fn command(&mut self, args: &[&[u8]]) -> Result<RespValue> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for arg in args {
            out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            out.extend_from_slice(arg);
            out.extend_from_slice(b"\r\n");
        }
        self.stream
            .write_all(&out)
            .await
            .map_err(|e| Error::transport("redis", e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::transport("redis", e))?;

        timeout(self.read_timeout, self.read_reply())
            .await
            .map_err(|_| Error::transport("redis", "read timed out"))?
    }

    async fn read_reply(&mut self) -> Result<RespValue> {
        let line = read_line(&mut self.stream, "redis").await?;
        let (kind, rest) = line
            .split_first()
            .ok_or_else(|| Error::protocol("redis", "empty reply"))?;
        let text = String::from_utf8_lossy(rest).to_string();

        match kind {
            b'+' => Ok(RespValue::Simple(text)),
            b'-' => Ok(RespValue::Error(text)),
            b':' => text
                .parse()
                .map(RespValue::Integer)
                .map_err(|_| Error::protocol("redis", "bad integer reply")),
            b'$' => {
                let len: i64 = text
                    .parse()
                    .map_err(|_| Error::protocol("redis", "bad bulk length"))?;
                if len < 0 {
                    return Ok(RespValue::Bulk(None));
                }
                let mut body = vec![0u8; len as usize + 2];
                self.stream
                    .read_exact(&mut body)
                    .await
                    .map_err(|e| Error::transport("redis", e))?;
                body.truncate(len as usize);
                Ok(RespValue::Bulk(Some(body)))
            }
            other => Err(Error::protocol(
                "redis",
                format!("unexpected reply type {:?}", *other as char),
            )),
        }
    }

    /// Protocol-level liveness probe
    pub async fn ping(&mut self) -> bool {
        matches!(
            self.command(&[b"PING"]).await,
            Ok(RespValue::Simple(s)) if s == "PONG"
        )
    }

    /// GET key
    pub async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.command(&[b"GET", key.as_bytes()]).await? {
            RespValue::Bulk(body) => Ok(body),
            RespValue::Error(e) => Err(Error::protocol("redis", e)),
            other => Err(Error::protocol("redis", format!("GET reply: {other:?}"))),
        }
    }

    /// SET key value [EX seconds]
    pub async fn set(&mut self, key: &str, value: &[u8], ttl_secs: Option<u64>) -> Result<()> {
        let expiry;
        let mut args: Vec<&[u8]> = vec![b"SET", key.as_bytes(), value];
        if let Some(secs) = ttl_secs {
            expiry = secs.to_string();
            args.push(b"EX");
            args.push(expiry.as_bytes());
        }
        match self.command(&args).await? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(e) => Err(Error::protocol("redis", e)),
            other => Err(Error::protocol("redis", format!("SET reply: {other:?}"))),
        }
    }

    /// DEL key
    pub async fn del(&mut self, key: &str) -> Result<bool> {
        match self.command(&[b"DEL", key.as_bytes()]).await? {
            RespValue::Integer(n) => Ok(n > 0),
            RespValue::Error(e) => Err(Error::protocol("redis", e)),
            other => Err(Error::protocol("redis", format!("DEL reply: {other:?}"))),
        }
    }

    /// FLUSHDB
    pub async fn flush_db(&mut self) -> Result<()> {
        match self.command(&[b"FLUSHDB"]).await? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(e) => Err(Error::protocol("redis", e)),
            other => Err(Error::protocol("redis", format!("FLUSHDB reply: {other:?}"))),
        }
    }
}

// =============================================================================
// Memcache ASCII
// =============================================================================

/// Client connection speaking the memcache ASCII protocol
pub struct AsciiConnection {
    stream: BufStream<TcpStream>,
    read_timeout: Duration,
}

impl AsciiConnection {
    /// Connect to a memcached-like store
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::transport("memcached", "connect timed out"))?
            .map_err(|e| Error::transport("memcached", e))?;
        Ok(Self {
            stream: BufStream::new(stream),
            read_timeout,
        })
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| Error::transport("memcached", e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::transport("memcached", e))
    }

    async fn read_response_line(&mut self) -> Result<Vec<u8>> {
        timeout(self.read_timeout, read_line(&mut self.stream, "memcached"))
            .await
            .map_err(|_| Error::transport("memcached", "read timed out"))?
    }

    /// Protocol-level liveness probe (`version`)
    pub async fn ping(&mut self) -> bool {
        if self.send(b"version\r\n").await.is_err() {
            return false;
        }
        matches!(self.read_response_line().await, Ok(line) if line.starts_with(b"VERSION"))
    }

    /// `get <key>` → value bytes, or `None` on a miss
    pub async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.send(format!("get {key}\r\n").as_bytes()).await?;

        let header = self.read_response_line().await?;
        if header == b"END" {
            return Ok(None);
        }
        // "VALUE <key> <flags> <bytes>"
        let header = String::from_utf8_lossy(&header).to_string();
        let mut parts = header.split_ascii_whitespace();
        if parts.next() != Some("VALUE") {
            return Err(Error::protocol("memcached", format!("get reply: {header}")));
        }
        let len: usize = parts
            .nth(2)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::protocol("memcached", "bad VALUE header"))?;

        let mut body = vec![0u8; len + 2];
        timeout(self.read_timeout, self.stream.read_exact(&mut body))
            .await
            .map_err(|_| Error::transport("memcached", "read timed out"))?
            .map_err(|e| Error::transport("memcached", e))?;
        body.truncate(len);

        let trailer = self.read_response_line().await?;
        if trailer != b"END" {
            return Err(Error::protocol("memcached", "missing END"));
        }
        Ok(Some(body))
    }

    /// `set <key> 0 <exptime> <bytes>` → STORED
    pub async fn set(&mut self, key: &str, value: &[u8], exptime: u64) -> Result<()> {
        let mut out = format!("set {key} 0 {exptime} {}\r\n", value.len()).into_bytes();
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
        self.send(&out).await?;

        match self.read_response_line().await? {
            line if line == b"STORED" => Ok(()),
            line => Err(Error::protocol(
                "memcached",
                format!("set reply: {}", String::from_utf8_lossy(&line)),
            )),
        }
    }

    /// `delete <key>` → true for DELETED or NOT_FOUND
    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        self.send(format!("delete {key}\r\n").as_bytes()).await?;
        match self.read_response_line().await? {
            line if line == b"DELETED" || line == b"NOT_FOUND" => Ok(true),
            line => Err(Error::protocol(
                "memcached",
                format!("delete reply: {}", String::from_utf8_lossy(&line)),
            )),
        }
    }

    /// `flush_all`
    pub async fn flush_all(&mut self) -> Result<()> {
        self.send(b"flush_all\r\n").await?;
        match self.read_response_line().await? {
            line if line == b"OK" => Ok(()),
            line => Err(Error::protocol(
                "memcached",
                format!("flush_all reply: {}", String::from_utf8_lossy(&line)),
            )),
        }
    }
}

/// A connection to either networked store
pub enum NetConnection {
    /// RESP client
    Redis(RespConnection),
    /// ASCII-protocol client
    Memcached(AsciiConnection),
}

impl NetConnection {
    /// Protocol-level liveness probe
    pub async fn ping(&mut self) -> bool {
        match self {
            NetConnection::Redis(c) => c.ping().await,
            NetConnection::Memcached(c) => c.ping().await,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    /// One-shot fake server: consumes whatever the client sends, answers
    /// with the next scripted reply, and closes after the last one.
    async fn fake_server(replies: Vec<Vec<u8>>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            for reply in replies {
                // Consume whatever the client sent for this exchange
                let _ = sock.read(&mut buf).await;
                sock.write_all(&reply).await.unwrap();
                sock.flush().await.unwrap();
            }
        });
        addr
    }

    fn timeouts() -> (Duration, Duration) {
        (Duration::from_millis(500), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_resp_ping_pong() {
        let addr = fake_server(vec![b"+PONG\r\n".to_vec()]).await;
        let (ct, rt) = timeouts();
        let mut conn = RespConnection::connect(&addr.to_string(), ct, rt, None)
            .await
            .unwrap();
        assert!(conn.ping().await);
    }

    #[tokio::test]
    async fn test_resp_get_bulk_and_null() {
        let addr = fake_server(vec![b"$5\r\nhello\r\n".to_vec(), b"$-1\r\n".to_vec()]).await;
        let (ct, rt) = timeouts();
        let mut conn = RespConnection::connect(&addr.to_string(), ct, rt, None)
            .await
            .unwrap();

        assert_eq!(conn.get("k").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(conn.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resp_set_del_flush() {
        let addr = fake_server(vec![
            b"+OK\r\n".to_vec(),
            b":1\r\n".to_vec(),
            b":0\r\n".to_vec(),
            b"+OK\r\n".to_vec(),
        ])
        .await;
        let (ct, rt) = timeouts();
        let mut conn = RespConnection::connect(&addr.to_string(), ct, rt, None)
            .await
            .unwrap();

        conn.set("k", b"v", Some(60)).await.unwrap();
        assert!(conn.del("k").await.unwrap());
        assert!(!conn.del("k").await.unwrap());
        conn.flush_db().await.unwrap();
    }

    #[tokio::test]
    async fn test_resp_error_reply_surfaces() {
        let addr = fake_server(vec![b"-ERR wrong type\r\n".to_vec()]).await;
        let (ct, rt) = timeouts();
        let mut conn = RespConnection::connect(&addr.to_string(), ct, rt, None)
            .await
            .unwrap();

        assert_matches!(conn.get("k").await, Err(Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_resp_connect_refused() {
        let (ct, rt) = timeouts();
        // Port 1 is never listening
        let result = RespConnection::connect("127.0.0.1:1", ct, rt, None).await;
        assert_matches!(result, Err(Error::Transport { .. }));
    }

    #[tokio::test]
    async fn test_ascii_version_ping() {
        let addr = fake_server(vec![b"VERSION 1.6.0\r\n".to_vec()]).await;
        let (ct, rt) = timeouts();
        let mut conn = AsciiConnection::connect(&addr.to_string(), ct, rt)
            .await
            .unwrap();
        assert!(conn.ping().await);
    }

    #[tokio::test]
    async fn test_ascii_get_hit_and_miss() {
        let addr = fake_server(vec![
            b"VALUE k 0 5\r\nhello\r\nEND\r\n".to_vec(),
            b"END\r\n".to_vec(),
        ])
        .await;
        let (ct, rt) = timeouts();
        let mut conn = AsciiConnection::connect(&addr.to_string(), ct, rt)
            .await
            .unwrap();

        assert_eq!(conn.get("k").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(conn.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ascii_set_delete_flush() {
        let addr = fake_server(vec![
            b"STORED\r\n".to_vec(),
            b"DELETED\r\n".to_vec(),
            b"NOT_FOUND\r\n".to_vec(),
            b"OK\r\n".to_vec(),
        ])
        .await;
        let (ct, rt) = timeouts();
        let mut conn = AsciiConnection::connect(&addr.to_string(), ct, rt)
            .await
            .unwrap();

        conn.set("k", b"v", 60).await.unwrap();
        assert!(conn.delete("k").await.unwrap());
        assert!(conn.delete("k").await.unwrap());
        conn.flush_all().await.unwrap();
    }
}
