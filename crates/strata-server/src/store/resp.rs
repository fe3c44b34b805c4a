use super::StoreError;
use bytes::{Bytes, BytesMut};
use redis_protocol::resp2::decode::decode_bytes_mut;
use redis_protocol::resp2::encode::extend_encode;
use redis_protocol::resp2::types::BytesFrame;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// One client connection plus its read buffer.
struct Connection {
    stream: TcpStream,
    buf: BytesMut,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, StoreError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(addr = %addr, "RESP store connected");
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        })
    }

    async fn send(&mut self, frame: &BytesFrame) -> Result<(), StoreError> {
        let mut out = BytesMut::new();
        // false = integers stay integers (standard RESP2)
        extend_encode(&mut out, frame, false).map_err(|e| StoreError::Protocol(e.to_string()))?;
        self.stream.write_all(&out).await?;
        Ok(())
    }

    /// Read until one complete frame is buffered.
    ///
    /// A complete frame is split off the front of `buf` without copying; a
    /// partial one leaves `buf` untouched.
    async fn read_frame(&mut self) -> Result<BytesFrame, StoreError> {
        loop {
            match decode_bytes_mut(&mut self.buf) {
                Ok(Some((frame, _, _))) => return Ok(frame),
                Ok(None) => {}
                Err(e) => return Err(StoreError::Protocol(e.to_string())),
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(StoreError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
        }
    }
}

/// Remote tier over RESP2 (`GET`, `SET .. PX`, `DEL`).
///
/// Commands share one lazily opened connection. Any failure drops it and the
/// next command reconnects.
pub struct RespStore {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl RespStore {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let reply = self.command(&[&b"GET"[..], key.as_bytes()]).await?;
        match reply {
            BytesFrame::BulkString(value) => Ok(Some(value)),
            BytesFrame::Null => Ok(None),
            other => Err(unexpected("GET", &other)),
        }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let millis = ttl.as_millis().max(1).to_string();
        let reply = self
            .command(&[&b"SET"[..], key.as_bytes(), value, &b"PX"[..], millis.as_bytes()])
            .await?;
        match reply {
            BytesFrame::SimpleString(_) => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    /// Returns the number of keys removed.
    pub async fn delete(&self, keys: &[String]) -> Result<i64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(&b"DEL"[..]);
        args.extend(keys.iter().map(|k| k.as_bytes()));

        match self.command(&args).await? {
            BytesFrame::Integer(removed) => Ok(removed),
            other => Err(unexpected("DEL", &other)),
        }
    }

    async fn command(&self, args: &[&[u8]]) -> Result<BytesFrame, StoreError> {
        let frame = BytesFrame::Array(
            args.iter()
                .map(|arg| BytesFrame::BulkString(Bytes::copy_from_slice(arg)))
                .collect(),
        );

        let mut slot = self.conn.lock().await;
        let exchange = round_trip(&mut slot, &self.addr, &frame);
        let result = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        if let Err(err) = &result {
            tracing::debug!(error = %err, addr = %self.addr, "dropping RESP store connection");
            *slot = None;
        }
        result
    }
}

async fn round_trip(
    slot: &mut Option<Connection>,
    addr: &str,
    frame: &BytesFrame,
) -> Result<BytesFrame, StoreError> {
    let conn = match slot {
        Some(conn) => conn,
        None => slot.insert(Connection::open(addr).await?),
    };
    conn.send(frame).await?;
    match conn.read_frame().await? {
        BytesFrame::Error(msg) => Err(StoreError::Remote(
            String::from_utf8_lossy(msg.as_bytes()).into_owned(),
        )),
        reply => Ok(reply),
    }
}

fn unexpected(command: &str, frame: &BytesFrame) -> StoreError {
    StoreError::Protocol(format!("unexpected {command} reply: {frame:?}"))
}
