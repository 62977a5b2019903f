//! In-process fakes shared by the integration tests
//!
//! `FakeTracker` speaks the tracker line protocol over TCP and answers
//! through a closure. `FakeStorage` is an axum server that behaves like a
//! storage node: HEAD, ranged GET, Content-Range PUT, MKCOL and MOVE.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use mogilefs::protocol::{decode_args, encode_args};
use mogilefs::{Args, Clock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

type Responder = Arc<dyn Fn(&str, &Args) -> Option<Vec<u8>> + Send + Sync>;

/// A tracker that answers each request line through a closure
///
/// Returning `None` from the closure leaves the request unanswered.
pub struct FakeTracker {
    pub addr: String,
    requests: Arc<Mutex<Vec<(String, Args)>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeTracker {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str, &Args) -> Option<String> + Send + Sync + 'static,
    {
        Self::start_on("127.0.0.1:0", responder, false).await
    }

    /// Closes every connection after answering one request
    pub async fn start_closing<F>(responder: F) -> Self
    where
        F: Fn(&str, &Args) -> Option<String> + Send + Sync + 'static,
    {
        Self::start_on("127.0.0.1:0", responder, true).await
    }

    pub async fn start_on<F>(bind: &str, responder: F, close_after_response: bool) -> Self
    where
        F: Fn(&str, &Args) -> Option<String> + Send + Sync + 'static,
    {
        let responder = move |command: &str, args: &Args| {
            responder(command, args).map(|reply| format!("{}\r\n", reply).into_bytes())
        };
        Self::start_raw_on(bind, responder, close_after_response).await
    }

    /// Answers with the exact bytes returned, terminator not added
    pub async fn start_raw<F>(responder: F) -> Self
    where
        F: Fn(&str, &Args) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        Self::start_raw_on("127.0.0.1:0", responder, false).await
    }

    async fn start_raw_on<F>(bind: &str, responder: F, close_after_response: bool) -> Self
    where
        F: Fn(&str, &Args) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(bind).await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let responder: Responder = Arc::new(responder);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let (reqs, conns) = (requests.clone(), connections.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                conns.fetch_add(1, Ordering::SeqCst);
                let (responder, reqs) = (responder.clone(), reqs.clone());
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let (command, blob) = line.split_once(' ').unwrap_or((line.as_str(), ""));
                        let args = decode_args(blob.trim());
                        let reply = responder(command, &args);
                        reqs.lock().unwrap().push((command.to_string(), args));
                        match reply {
                            Some(reply) => {
                                if write.write_all(&reply).await.is_err() {
                                    return;
                                }
                            }
                            None => {
                                tokio::time::sleep(Duration::from_secs(60)).await;
                                return;
                            }
                        }
                        if close_after_response {
                            return;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn requests_for(&self, command: &str) -> Vec<Args> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == command)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Builds an `OK` response line from `(key, value)` pairs
pub fn ok(pairs: &[(&str, String)]) -> String {
    let args: Args = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    format!("OK 1 {}", encode_args(&args))
}

/// Returns an address nothing is listening on
pub async fn closed_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Clock that only moves when told to
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

/// Mutable state of the fake storage node
#[derive(Default)]
pub struct StorageState {
    pub files: HashMap<String, Vec<u8>>,
    pub dirs: HashSet<String>,
    /// `(method, path, status)` for every request served
    pub log: Vec<(String, String, u16)>,
    /// PUT answers 403 unless the parent collection was created
    pub require_dirs: bool,
    /// PUT always answers 403
    pub forbid_puts: bool,
    /// Device directories (`dev1`) whose PUTs answer 500
    pub broken_devices: HashSet<String>,
}

type Shared = Arc<Mutex<StorageState>>;

pub struct FakeStorage {
    pub base: String,
    pub state: Shared,
}

impl FakeStorage {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(StorageState::default()));
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base, state }
    }

    /// Full URL of a fid path on this node
    pub fn url(&self, devid: u64, fid: u64) -> String {
        format!("{}{}", self.base, fid_path(devid, fid))
    }

    pub fn file(&self, devid: u64, fid: u64) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(&fid_path(devid, fid)).cloned()
    }

    pub fn put_file(&self, devid: u64, fid: u64, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(fid_path(devid, fid), data.to_vec());
    }

    pub fn log(&self) -> Vec<(String, String, u16)> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.log().into_iter().map(|(m, _, _)| m).collect()
    }

    pub fn with_state(&self, f: impl FnOnce(&mut StorageState)) {
        f(&mut self.state.lock().unwrap())
    }
}

pub fn fid_path(devid: u64, fid: u64) -> String {
    format!("/dev{}/0/000/000/{:010}.fid", devid, fid)
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let mut st = state.lock().unwrap();
    let response = match method.as_str() {
        "HEAD" => match st.files.get(&path) {
            Some(data) => (StatusCode::OK, [(CONTENT_LENGTH, data.len().to_string())]).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        "GET" => get(&st, &path, &headers),
        "PUT" => put(&mut st, &path, &headers, &body),
        "MKCOL" => {
            if st.dirs.insert(path.clone()) {
                StatusCode::CREATED.into_response()
            } else {
                StatusCode::METHOD_NOT_ALLOWED.into_response()
            }
        }
        "MOVE" => move_file(&mut st, &path, &headers),
        _ => StatusCode::NOT_IMPLEMENTED.into_response(),
    };
    st.log.push((method.to_string(), path, response.status().as_u16()));
    response
}

fn get(st: &StorageState, path: &str, headers: &HeaderMap) -> Response {
    let Some(data) = st.files.get(path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let Some(range) = headers.get(RANGE).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::OK, data.clone()).into_response();
    };

    let spec = range.trim_start_matches("bytes=");
    let (start, end) = spec.split_once('-').unwrap();
    let start: usize = start.parse().unwrap();
    if start >= data.len() {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    }
    let end = end
        .parse::<usize>()
        .map_or(data.len() - 1, |e| e.min(data.len() - 1));
    (StatusCode::PARTIAL_CONTENT, data[start..=end].to_vec()).into_response()
}

fn move_file(st: &mut StorageState, path: &str, headers: &HeaderMap) -> Response {
    let Some(dest) = headers.get("destination").and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let to = format!("/{}", dest.splitn(4, '/').nth(3).unwrap_or_default());
    match st.files.remove(path) {
        Some(data) => {
            st.files.insert(to, data);
            StatusCode::CREATED.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn put(st: &mut StorageState, path: &str, headers: &HeaderMap, body: &[u8]) -> Response {
    let device = path.split('/').nth(1).unwrap_or_default().to_string();
    if st.broken_devices.contains(&device) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if st.forbid_puts {
        return StatusCode::FORBIDDEN.into_response();
    }
    if st.require_dirs {
        let parent = &path[..=path.rfind('/').unwrap()];
        if !st.dirs.contains(parent) {
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    match headers.get(CONTENT_RANGE).and_then(|v| v.to_str().ok()) {
        Some(range) => {
            let spec = range.trim_start_matches("bytes ");
            let start: usize = spec.split('-').next().unwrap().parse().unwrap();
            let file = st.files.entry(path.to_string()).or_default();
            if file.len() < start + body.len() {
                file.resize(start + body.len(), 0);
            }
            file[start..start + body.len()].copy_from_slice(body);
        }
        None => {
            st.files.insert(path.to_string(), body.to_vec());
        }
    }
    StatusCode::CREATED.into_response()
}
