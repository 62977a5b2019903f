//! MogileFS Protocol Types and Constants
//!
//! This module defines protocol-level constants, tracker addressing, storage
//! destinations and the backend configuration.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::errors::{MogileFSError, Result};

/// Default timeout for a tracker to answer a request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default timeout for connecting to a tracker's standard address
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Default timeout for connecting to a tracker's preferred alternate address
pub const DEFAULT_PREFERRED_CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// How long an unreachable tracker is skipped before being tried again
pub const DEAD_TRACKER_RETRY: Duration = Duration::from_secs(5);

/// Upper bound on trackers tried during one host selection pass
pub const MAX_TRACKER_TRIES: usize = 15;

/// Default upper bound on the length of one tracker response line
pub const DEFAULT_MAX_RESPONSE_LINE: usize = 4 * 1024 * 1024;

/// Request line terminator
pub const LINE_TERMINATOR: &str = "\r\n";

/// Request arguments and decoded response fields.
///
/// Ordered so that encoded requests are deterministic.
pub type Args = BTreeMap<String, String>;

/// Address of a tracker parsed from a `"host:port"` string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerAddress {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl TrackerAddress {
    /// Creates an address from its parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for TrackerAddress {
    type Err = MogileFSError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            MogileFSError::InvalidConfig(format!(
                "trackers argument must be of form 'tracker:port': {:?} given",
                s
            ))
        })?;

        if host.is_empty() {
            return Err(MogileFSError::InvalidConfig(format!(
                "tracker host is empty: {:?} given",
                s
            )));
        }

        let port = port.parse::<u16>().map_err(|_| {
            MogileFSError::InvalidConfig(format!("port must be an integer: {:?} given", port))
        })?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for TrackerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A storage location for a file's bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Device id assigned by the tracker, unknown for read paths
    pub devid: Option<u64>,
    /// Full storage URL, e.g. `http://host:7500/dev1/0/000/000/0000000001.fid`
    pub path: String,
}

impl Destination {
    /// Creates a destination on a known device
    pub fn new(devid: u64, path: impl Into<String>) -> Self {
        Self {
            devid: Some(devid),
            path: path.into(),
        }
    }

    /// Creates a destination from a bare URL, as returned by `get_paths`
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            devid: None,
            path: path.into(),
        }
    }
}

/// Source of the current time for dead-tracker bookkeeping
pub trait Clock: Send + Sync {
    /// Returns the current instant
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Backend configuration options
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// List of tracker addresses in format "host:port"
    pub trackers: Vec<String>,
    /// Time allowed for a tracker to answer a request
    pub timeout: Duration,
    /// Timeout for connecting to a tracker's standard address
    pub connect_timeout: Duration,
    /// Timeout for connecting to a preferred alternate address
    pub preferred_connect_timeout: Duration,
    /// How long an unreachable tracker is skipped
    pub dead_retry: Duration,
    /// Maximum trackers tried per host selection pass
    pub max_tries: usize,
    /// Longest response line accepted from a tracker, terminator included
    pub max_response_line: usize,
    /// Preferred alternate IP for a tracker's standard host
    pub pref_ip: HashMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            trackers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            preferred_connect_timeout: DEFAULT_PREFERRED_CONNECT_TIMEOUT,
            dead_retry: DEAD_TRACKER_RETRY,
            max_tries: MAX_TRACKER_TRIES,
            max_response_line: DEFAULT_MAX_RESPONSE_LINE,
            pref_ip: HashMap::new(),
        }
    }
}

impl BackendConfig {
    /// Creates a new backend configuration with tracker addresses
    pub fn new<I, S>(trackers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trackers: trackers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sets the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connect timeout for standard tracker addresses
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the connect timeout for preferred alternate addresses
    pub fn with_preferred_connect_timeout(mut self, timeout: Duration) -> Self {
        self.preferred_connect_timeout = timeout;
        self
    }

    /// Sets how long an unreachable tracker is skipped
    pub fn with_dead_retry(mut self, dead_retry: Duration) -> Self {
        self.dead_retry = dead_retry;
        self
    }

    /// Sets the maximum number of trackers tried per request
    pub fn with_max_tries(mut self, max_tries: usize) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Sets the longest response line accepted from a tracker
    pub fn with_max_response_line(mut self, max_response_line: usize) -> Self {
        self.max_response_line = max_response_line;
        self
    }

    /// Maps a tracker's standard IP to a preferred alternate IP
    pub fn with_pref_ip(mut self, standard: impl Into<String>, preferred: impl Into<String>) -> Self {
        self.pref_ip.insert(standard.into(), preferred.into());
        self
    }

    /// Parses and validates the configuration
    pub(crate) fn validate(&self) -> Result<Vec<TrackerAddress>> {
        if self.trackers.is_empty() {
            return Err(MogileFSError::InvalidConfig(
                "Tracker addresses are required".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(MogileFSError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_tries == 0 {
            return Err(MogileFSError::InvalidConfig(
                "max_tries must be at least 1".to_string(),
            ));
        }

        if self.max_response_line == 0 {
            return Err(MogileFSError::InvalidConfig(
                "max_response_line must be at least 1".to_string(),
            ));
        }

        self.trackers.iter().map(|t| t.parse()).collect()
    }
}
