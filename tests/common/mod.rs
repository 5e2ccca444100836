//! Shared test infrastructure.
//!
//! `FakeRedis` is an in-process stand-in for a Redis server. It speaks enough
//! RESP2 for the stream commands the broker transport issues (`PING`,
//! `XGROUP CREATE`, `XADD`, `XREADGROUP`, `XACK`) and can drop every open
//! connection to simulate a broker outage.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, Instant};

/// How often a blocked `XREADGROUP` re-checks for new entries.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Clone)]
struct Entry {
    id: String,
    fields: Vec<(String, String)>,
}

#[derive(Default)]
struct StreamState {
    streams: HashMap<String, Vec<Entry>>,
    /// (stream, group) → index of the next entry to deliver
    groups: HashMap<(String, String), usize>,
    acked: HashMap<String, Vec<String>>,
    next_id: u64,
}

impl StreamState {
    fn append(&mut self, stream: &str, fields: Vec<(String, String)>) -> String {
        self.next_id += 1;
        let id = format!("{}-0", self.next_id);
        self.streams
            .entry(stream.to_string())
            .or_default()
            .push(Entry {
                id: id.clone(),
                fields,
            });
        id
    }

    /// Takes up to `count` undelivered entries per stream for `group`.
    fn take_new(&mut self, group: &str, keys: &[String], count: usize) -> Vec<(String, Vec<Entry>)> {
        let mut batches = Vec::new();
        for key in keys {
            let Some(cursor) = self.groups.get_mut(&(key.clone(), group.to_string())) else {
                continue;
            };
            let entries = self.streams.get(key).map(Vec::as_slice).unwrap_or_default();
            if *cursor >= entries.len() {
                continue;
            }
            let end = entries.len().min(*cursor + count);
            batches.push((key.clone(), entries[*cursor..end].to_vec()));
            *cursor = end;
        }
        batches
    }
}

/// Loopback Redis stand-in.
pub struct FakeRedis {
    addr: SocketAddr,
    state: Arc<Mutex<StreamState>>,
    connections: Arc<Mutex<Vec<AbortHandle>>>,
    accept_task: JoinHandle<()>,
}

impl FakeRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(StreamState::default()));
        let connections = Arc::new(Mutex::new(Vec::new()));

        let accept_task = tokio::spawn({
            let state = Arc::clone(&state);
            let connections = Arc::clone(&connections);
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let task = tokio::spawn(serve_connection(socket, Arc::clone(&state)));
                    connections.lock().push(task.abort_handle());
                }
            }
        });

        Self {
            addr,
            state,
            connections,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// Appends an entry directly, bypassing any client.
    pub fn append(&self, stream: &str, fields: &[(&str, &str)]) -> String {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state.lock().append(stream, fields)
    }

    pub fn entry_ids(&self, stream: &str) -> Vec<String> {
        self.state
            .lock()
            .streams
            .get(stream)
            .map(|entries| entries.iter().map(|e| e.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn acked(&self, stream: &str) -> Vec<String> {
        self.state
            .lock()
            .acked
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_group(&self, stream: &str, group: &str) -> bool {
        self.state
            .lock()
            .groups
            .contains_key(&(stream.to_string(), group.to_string()))
    }

    /// Closes every client connection. The listener stays up, so clients
    /// can reconnect.
    pub fn drop_connections(&self) {
        for connection in self.connections.lock().drain(..) {
            connection.abort();
        }
    }

    /// Polls until `stream` has `expected` acknowledged ids.
    pub async fn wait_for_acks(&self, stream: &str, expected: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let acked = self.acked(stream);
            if acked.len() >= expected {
                return acked;
            }
            assert!(
                Instant::now() < deadline,
                "expected {} acks on '{}', found {}",
                expected,
                stream,
                acked.len()
            );
            time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

// =============================================================================
// RESP
// =============================================================================

enum Reply {
    Simple(&'static str),
    Error(&'static str),
    Int(i64),
    Bulk(String),
    NilArray,
    Array(Vec<Reply>),
}

impl Reply {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => out.extend_from_slice(format!("+{}\r\n", s).as_bytes()),
            Reply::Error(s) => out.extend_from_slice(format!("-{}\r\n", s).as_bytes()),
            Reply::Int(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
            Reply::Bulk(s) => {
                out.extend_from_slice(format!("${}\r\n", s.len()).as_bytes());
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::NilArray => out.extend_from_slice(b"*-1\r\n"),
            Reply::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

async fn read_length<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    prefix: char,
) -> io::Result<Option<usize>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    line.trim_end()
        .strip_prefix(prefix)
        .and_then(|n| n.parse().ok())
        .map(Some)
        .ok_or_else(|| invalid("malformed length line"))
}

/// Reads one command (an array of bulk strings). `None` on EOF.
async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<String>>> {
    let Some(count) = read_length(reader, '*').await? else {
        return Ok(None);
    };
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_length(reader, '$')
            .await?
            .ok_or_else(|| invalid("eof inside command"))?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await?;
        buf.truncate(len);
        args.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(Some(args))
}

async fn serve_connection(socket: TcpStream, state: Arc<Mutex<StreamState>>) {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    while let Ok(Some(args)) = read_command(&mut reader).await {
        let reply = execute(&args, &state).await;
        let mut out = Vec::new();
        reply.encode(&mut out);
        if write_half.write_all(&out).await.is_err() {
            break;
        }
    }
}

fn position(args: &[String], keyword: &str) -> Option<usize> {
    args.iter().position(|a| a.eq_ignore_ascii_case(keyword))
}

async fn execute(args: &[String], state: &Mutex<StreamState>) -> Reply {
    let Some(name) = args.first() else {
        return Reply::Error("ERR empty command");
    };

    match name.to_ascii_uppercase().as_str() {
        "PING" => Reply::Simple("PONG"),
        "XGROUP" if args.len() >= 5 && args[1].eq_ignore_ascii_case("CREATE") => {
            let mut state = state.lock();
            let key = (args[2].clone(), args[3].clone());
            if state.groups.contains_key(&key) {
                return Reply::Error("BUSYGROUP Consumer Group name already exists");
            }
            let len = state.streams.entry(args[2].clone()).or_default().len();
            let cursor = if args[4] == "$" { len } else { 0 };
            state.groups.insert(key, cursor);
            Reply::Simple("OK")
        }
        "XADD" => {
            let Some(star) = args.iter().skip(2).position(|a| a == "*") else {
                return Reply::Error("ERR only auto ids are supported");
            };
            let fields = args[star + 3..]
                .chunks(2)
                .filter(|pair| pair.len() == 2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect();
            Reply::Bulk(state.lock().append(&args[1], fields))
        }
        "XACK" if args.len() >= 4 => {
            let mut state = state.lock();
            let acked = state.acked.entry(args[1].clone()).or_default();
            acked.extend(args[3..].iter().cloned());
            Reply::Int((args.len() - 3) as i64)
        }
        "XREADGROUP" => read_group(args, state).await,
        _ => Reply::Simple("OK"),
    }
}

async fn read_group(args: &[String], state: &Mutex<StreamState>) -> Reply {
    let (Some(group_at), Some(streams_at)) = (position(args, "GROUP"), position(args, "STREAMS"))
    else {
        return Reply::Error("ERR syntax error");
    };
    let group = args[group_at + 1].clone();
    let block = position(args, "BLOCK")
        .and_then(|i| args[i + 1].parse::<u64>().ok())
        .unwrap_or(0);
    let count = position(args, "COUNT")
        .and_then(|i| args[i + 1].parse::<usize>().ok())
        .unwrap_or(usize::MAX);
    let rest = &args[streams_at + 1..];
    let keys: Vec<String> = rest[..rest.len() / 2].to_vec();

    let deadline = (block > 0).then(|| Instant::now() + Duration::from_millis(block));
    loop {
        let batches = state.lock().take_new(&group, &keys, count);
        if !batches.is_empty() {
            return Reply::Array(
                batches
                    .into_iter()
                    .map(|(key, entries)| {
                        Reply::Array(vec![
                            Reply::Bulk(key),
                            Reply::Array(
                                entries
                                    .into_iter()
                                    .map(|entry| {
                                        let fields = entry
                                            .fields
                                            .into_iter()
                                            .flat_map(|(k, v)| [Reply::Bulk(k), Reply::Bulk(v)])
                                            .collect();
                                        Reply::Array(vec![Reply::Bulk(entry.id), Reply::Array(fields)])
                                    })
                                    .collect(),
                            ),
                        ])
                    })
                    .collect(),
            );
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Reply::NilArray;
        }
        time::sleep(POLL_INTERVAL).await;
    }
}
