//! Minimal in-memory RESP2 server for store tests.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use redis_protocol::resp2::decode::decode_bytes_mut;
use redis_protocol::resp2::encode::extend_encode;
use redis_protocol::resp2::types::BytesFrame;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct State {
    values: HashMap<String, (Bytes, Option<u64>)>,
    fail_next: bool,
}

pub(crate) struct FakeRedis {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl FakeRedis {
    pub(crate) async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });

        Self { addr, state }
    }

    pub(crate) fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub(crate) fn value(&self, key: &str) -> Option<Bytes> {
        self.state.lock().values.get(key).map(|(v, _)| v.clone())
    }

    pub(crate) fn px(&self, key: &str) -> Option<u64> {
        self.state.lock().values.get(key).and_then(|(_, px)| *px)
    }

    pub(crate) fn insert(&self, key: &str, value: &'static [u8]) {
        self.state
            .lock()
            .values
            .insert(key.to_string(), (Bytes::from_static(value), None));
    }

    pub(crate) fn clear(&self) {
        self.state.lock().values.clear();
    }

    /// Answer the next command with an error reply.
    pub(crate) fn fail_next(&self) {
        self.state.lock().fail_next = true;
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<State>>) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        while let Ok(Some((frame, _, _))) = decode_bytes_mut(&mut buf) {
            let reply = dispatch(&frame, &state);
            let mut out = BytesMut::new();
            if extend_encode(&mut out, &reply, false).is_err()
                || stream.write_all(&out).await.is_err()
            {
                return;
            }
        }
    }
}

fn dispatch(frame: &BytesFrame, state: &Mutex<State>) -> BytesFrame {
    let BytesFrame::Array(args) = frame else {
        return BytesFrame::Error("ERR expected array".into());
    };
    let args: Vec<Bytes> = args
        .iter()
        .filter_map(|a| match a {
            BytesFrame::BulkString(b) => Some(b.clone()),
            _ => None,
        })
        .collect();
    let text = |i: usize| String::from_utf8_lossy(&args[i]).into_owned();

    let mut state = state.lock();
    if std::mem::take(&mut state.fail_next) {
        return BytesFrame::Error("LOADING dataset in memory".into());
    }

    match text(0).to_uppercase().as_str() {
        "GET" => match state.values.get(&text(1)) {
            Some((value, _)) => BytesFrame::BulkString(value.clone()),
            None => BytesFrame::Null,
        },
        "SET" => {
            let px = (args.len() >= 5 && text(3).eq_ignore_ascii_case("PX"))
                .then(|| text(4).parse().ok())
                .flatten();
            state.values.insert(text(1), (args[2].clone(), px));
            BytesFrame::SimpleString("OK".into())
        }
        "DEL" => {
            let removed = (1..args.len())
                .filter(|&i| state.values.remove(&text(i)).is_some())
                .count();
            BytesFrame::Integer(removed as i64)
        }
        other => BytesFrame::Error(format!("ERR unknown command '{other}'").into()),
    }
}
