//! MogileFS Tracker Connection Management
//!
//! This module handles the TCP connection to the trackers: host selection
//! with a randomized start and dead-tracker backoff, preferred alternate IPs,
//! a single cached socket reused across requests, and one transparent
//! reconnect when the cached socket turns out to be stale.

use bytes::Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::io::ErrorKind;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::{MogileFSError, Result};
use crate::hooks::{RequestEvent, RequestObserver};
use crate::protocol::{decode_response, encode_request};
use crate::types::*;

/// Represents a TCP connection to a tracker
///
/// The stream is buffered for line reads; writes go straight to the socket.
pub struct Connection {
    stream: BufReader<TcpStream>,
    addr: TrackerAddress,
}

impl Connection {
    /// Wraps an established TCP stream
    pub fn new(stream: TcpStream, addr: TrackerAddress) -> Self {
        Self {
            stream: BufReader::new(stream),
            addr,
        }
    }

    /// Writes the request with a single send, returning the bytes accepted
    async fn send(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.stream.get_mut().write(data).await
    }

    /// Reads the raw bytes of one response line, at most `limit` of them
    ///
    /// An empty buffer means end of stream.
    async fn read_line(&mut self, limit: usize) -> std::io::Result<Vec<u8>> {
        let mut line = Vec::new();
        (&mut self.stream)
            .take(limit as u64)
            .read_until(b'\n', &mut line)
            .await?;
        Ok(line)
    }

    /// Returns the address this connection is connected to
    pub fn addr(&self) -> &TrackerAddress {
        &self.addr
    }
}

/// Result of trying a request on the cached connection
enum CachedAttempt {
    /// The tracker answered, or failed in a way that must not be retried
    Answered(Result<Args>),
    /// The cached socket is dead; fall back to host selection
    Stale,
}

/// Tracker connection manager
///
/// Owns the tracker list, the dead-tracker table and at most one cached
/// connection. Requests take `&mut self`: callers sharing a backend across
/// tasks must wrap it in a lock (the [`Client`](crate::Client) and
/// [`Admin`](crate::Admin) use `Arc<tokio::sync::Mutex<Backend>>`).
pub struct Backend {
    trackers: Vec<TrackerAddress>,
    config: BackendConfig,
    pref_ip: HashMap<String, String>,
    dead: HashMap<TrackerAddress, Instant>,
    cached: Option<Connection>,
    last_tracker: Option<TrackerAddress>,
    observers: Vec<Arc<dyn RequestObserver>>,
    clock: Arc<dyn Clock>,
}

impl Backend {
    /// Creates a backend, validating every tracker address
    pub fn new(config: BackendConfig) -> Result<Self> {
        let trackers = config.validate()?;
        let pref_ip = config.pref_ip.clone();

        Ok(Self {
            trackers,
            config,
            pref_ip,
            dead: HashMap::new(),
            cached: None,
            last_tracker: None,
            observers: Vec::new(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock used for dead-tracker bookkeeping
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the preferred alternate IP table
    ///
    /// Keys are the trackers' standard hosts, values the addresses to try
    /// first with a short connect timeout.
    pub fn set_pref_ip(&mut self, pref_ip: HashMap<String, String>) {
        self.pref_ip = pref_ip;
    }

    /// Registers a request lifecycle observer
    pub fn add_observer(&mut self, observer: Arc<dyn RequestObserver>) {
        self.observers.push(observer);
    }

    /// Returns the configured trackers
    pub fn trackers(&self) -> &[TrackerAddress] {
        &self.trackers
    }

    /// Returns the request timeout
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Returns the address of the most recent successful connection
    pub fn last_tracker_connected(&self) -> Option<&TrackerAddress> {
        self.last_tracker.as_ref()
    }

    /// Checks whether a tracker is currently being skipped as unreachable
    pub fn is_dead(&self, tracker: &TrackerAddress) -> bool {
        self.is_dead_at(tracker, self.clock.now())
    }

    /// Checks whether a connection is cached for the next request
    pub fn has_cached_connection(&self) -> bool {
        self.cached.is_some()
    }

    /// Sends a command to a tracker and returns the decoded response
    ///
    /// A cached connection is tried first. If sending on it fails, or it
    /// turns out to be closed before any response arrives, a fresh tracker
    /// is selected and the request is sent once more. Failures on the fresh
    /// connection are returned as-is.
    pub async fn do_request(&mut self, command: &str, args: &Args) -> Result<Args> {
        let req = encode_request(command, args)?;

        if let Some(conn) = self.cached.take() {
            match self.request_on_cached(conn, command, &req).await {
                CachedAttempt::Answered(result) => return result,
                CachedAttempt::Stale => {}
            }
        }

        let mut conn = self
            .open_connection()
            .await
            .ok_or_else(|| MogileFSError::NoTrackers {
                trackers: self.tracker_list(),
            })?;

        self.notify(RequestEvent::RequestStart, command);
        debug!(tracker = %conn.addr(), request = %request_text(&req), "sending tracker request");

        match conn.send(&req).await {
            Ok(sent) if sent == req.len() => {}
            Ok(sent) => {
                self.notify(RequestEvent::LengthMismatch, command);
                return Err(MogileFSError::LengthMismatch {
                    sent,
                    expected: req.len(),
                });
            }
            Err(e) => {
                self.notify(RequestEvent::SendError, command);
                return Err(MogileFSError::Send {
                    command: request_text(&req),
                    source: e,
                });
            }
        }

        match self.receive(&mut conn, command).await? {
            Some(line) => self.finish(conn, command, &line),
            None => Err(MogileFSError::ConnectionClosed {
                tracker: conn.addr().to_string(),
                command: command.to_string(),
            }),
        }
    }

    /// Attempts the request on the cached connection
    async fn request_on_cached(
        &mut self,
        mut conn: Connection,
        command: &str,
        req: &Bytes,
    ) -> CachedAttempt {
        self.notify(RequestEvent::RequestStart, command);
        debug!(tracker = %conn.addr(), request = %request_text(req), "sending tracker request on cached connection");

        match conn.send(req).await {
            Ok(sent) if sent == req.len() => {}
            Ok(sent) => {
                self.notify(RequestEvent::LengthMismatch, command);
                warn!(tracker = %conn.addr(), sent, expected = req.len(), "short send on cached tracker connection");
                return CachedAttempt::Stale;
            }
            Err(e) => {
                self.notify(RequestEvent::SendError, command);
                warn!(tracker = %conn.addr(), error = %e, "cached tracker connection failed on send");
                return CachedAttempt::Stale;
            }
        }

        match self.receive(&mut conn, command).await {
            Ok(Some(line)) => CachedAttempt::Answered(self.finish(conn, command, &line)),
            Ok(None) => {
                warn!(tracker = %conn.addr(), "cached tracker connection was closed by peer");
                CachedAttempt::Stale
            }
            Err(MogileFSError::Io(e)) if is_dropped_connection(&e) => {
                warn!(tracker = %conn.addr(), error = %e, "cached tracker connection failed on read");
                CachedAttempt::Stale
            }
            Err(err) => CachedAttempt::Answered(Err(err)),
        }
    }

    /// Waits for one response line within the request timeout
    ///
    /// `Ok(None)` means the tracker closed the connection without answering.
    /// Once any response byte has arrived, a malformed line is an
    /// `InvalidResponse`.
    async fn receive(&self, conn: &mut Connection, command: &str) -> Result<Option<String>> {
        let limit = self.config.max_response_line;
        let raw = match timeout(self.config.timeout, conn.read_line(limit)).await {
            Err(_) => {
                self.notify(RequestEvent::ReadTimeout, command);
                return Err(MogileFSError::ReadTimeout {
                    tracker: conn.addr().to_string(),
                    command: command.to_string(),
                });
            }
            Ok(Err(e)) => return Err(MogileFSError::Io(e)),
            Ok(Ok(raw)) => raw,
        };

        if raw.is_empty() {
            return Ok(None);
        }
        if raw.len() >= limit && raw.last() != Some(&b'\n') {
            return Err(MogileFSError::InvalidResponse(format!(
                "response line from {} exceeds {} bytes",
                conn.addr(),
                limit
            )));
        }

        String::from_utf8(raw).map(Some).map_err(|e| {
            MogileFSError::InvalidResponse(format!(
                "response line is not valid UTF-8: {}",
                String::from_utf8_lossy(e.as_bytes()).trim_end()
            ))
        })
    }

    /// Decodes the response line and caches the connection if the exchange
    /// was well formed
    fn finish(&mut self, conn: Connection, command: &str, line: &str) -> Result<Args> {
        self.notify(RequestEvent::RequestFinished, command);
        debug!(tracker = %conn.addr(), response = %line.trim_end(), "tracker response");

        match decode_response(line) {
            Ok(args) => {
                self.cached = Some(conn);
                Ok(args)
            }
            Err(err @ MogileFSError::Tracker { .. }) => {
                self.cached = Some(conn);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Selects a tracker and connects to it
    ///
    /// Starts at a random tracker and walks the list round-robin, skipping
    /// trackers marked dead within the backoff window. Trackers that fail to
    /// connect are marked dead.
    async fn open_connection(&mut self) -> Option<Connection> {
        let size = self.trackers.len();
        if size == 0 {
            return None;
        }

        let tries = size.min(self.config.max_tries);
        let mut idx = rand::rng().random_range(0..size);
        let now = self.clock.now();

        for _ in 0..tries {
            let tracker = self.trackers[idx % size].clone();
            idx += 1;

            if self.is_dead_at(&tracker, now) {
                debug!(%tracker, "skipping dead tracker");
                continue;
            }

            if let Some(conn) = self.connect_to(&tracker).await {
                self.dead.remove(&tracker);
                return Some(conn);
            }

            warn!(%tracker, "marking tracker dead");
            self.dead.insert(tracker, now);
        }

        None
    }

    /// Connects to a tracker, trying its preferred alternate IP first
    async fn connect_to(&mut self, tracker: &TrackerAddress) -> Option<Connection> {
        if let Some(pref) = self.pref_ip.get(&tracker.host).cloned() {
            let preferred = TrackerAddress::new(pref, tracker.port);
            debug!(%preferred, standard = %tracker, "using preferred tracker address");

            if let Some(stream) =
                connect_with_timeout(&preferred, self.config.preferred_connect_timeout).await
            {
                self.last_tracker = Some(preferred.clone());
                return Some(Connection::new(stream, preferred));
            }
            debug!(%preferred, "failed connect to preferred tracker");
        }

        let stream = connect_with_timeout(tracker, self.config.connect_timeout).await?;
        self.last_tracker = Some(tracker.clone());
        Some(Connection::new(stream, tracker.clone()))
    }

    fn is_dead_at(&self, tracker: &TrackerAddress, now: Instant) -> bool {
        match self.dead.get(tracker) {
            Some(marked) => now.saturating_duration_since(*marked) < self.config.dead_retry,
            None => false,
        }
    }

    fn notify(&self, event: RequestEvent, command: &str) {
        for observer in &self.observers {
            observer.on_event(event, command, self.last_tracker.as_ref());
        }
    }

    fn tracker_list(&self) -> String {
        self.trackers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Opens a TCP connection, giving up after `limit`
async fn connect_with_timeout(addr: &TrackerAddress, limit: Duration) -> Option<TcpStream> {
    match timeout(limit, TcpStream::connect((addr.host.as_str(), addr.port))).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%addr, error = %e, "failed to set TCP_NODELAY");
            }
            Some(stream)
        }
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "tracker connect failed");
            None
        }
        Err(_) => {
            debug!(%addr, ?limit, "tracker connect timed out");
            None
        }
    }
}

/// Transport errors that mean the peer went away before answering
fn is_dropped_connection(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

fn request_text(req: &[u8]) -> String {
    String::from_utf8_lossy(req).trim_end().to_string()
}
