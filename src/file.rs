//! File handle capability shared by the normal and large variants
//!
//! Handles are created by [`Client::new_file`](crate::Client::new_file),
//! [`Client::read_file`](crate::Client::read_file) and
//! [`Client::edit_file`](crate::Client::edit_file). Always call
//! [`FileHandle::close`]: dropping a handle cannot run the asynchronous
//! `create_close` call, so nothing is committed to the tracker.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::Backend;
use crate::errors::{Result, EMPTY_FILE};
use crate::protocol::build_args;
use crate::types::{Args, Destination};

/// Operations shared by every MogileFS file handle
#[async_trait]
pub trait FileHandle: Send {
    /// Reads up to `n` bytes, or everything remaining with `None`
    async fn read(&mut self, n: Option<usize>) -> Result<Bytes>;

    /// Reads through the next newline
    async fn readline(&mut self) -> Result<Bytes>;

    /// Reads all remaining lines
    async fn readlines(&mut self) -> Result<Vec<Bytes>>;

    /// Writes bytes at the current position
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Moves to an absolute position; negative positions clamp to 0
    fn seek(&mut self, pos: i64) -> Result<u64>;

    /// Returns the current position
    fn tell(&self) -> Result<u64>;

    /// Finalizes the file. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Checks whether the handle has been closed
    fn is_closed(&self) -> bool;
}

/// Tracker metadata needed to finalize a new file with `create_close`
pub struct FileCommit {
    backend: Arc<Mutex<Backend>>,
    fid: u64,
    domain: String,
    key: String,
    close_args: Args,
}

impl FileCommit {
    /// Creates the commit record for a file opened with `create_open`
    pub fn new(
        backend: Arc<Mutex<Backend>>,
        fid: u64,
        domain: impl Into<String>,
        key: impl Into<String>,
        close_args: Args,
    ) -> Self {
        Self {
            backend,
            fid,
            domain: domain.into(),
            key: key.into(),
            close_args,
        }
    }

    /// Returns the fid assigned by the tracker
    pub fn fid(&self) -> u64 {
        self.fid
    }

    /// Returns the key the file is stored under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reports the stored location and size to the tracker
    ///
    /// Caller-supplied close arguments override the computed fields. The
    /// tracker's `empty_file` error is accepted as success.
    pub async fn commit(&self, dest: &Destination, size: u64) -> Result<()> {
        let mut args = build_args([
            ("fid", self.fid.to_string()),
            ("domain", self.domain.clone()),
            ("key", self.key.clone()),
            ("path", dest.path.clone()),
            ("size", size.to_string()),
        ]);
        if let Some(devid) = dest.devid {
            args.insert("devid".to_string(), devid.to_string());
        }
        args.extend(self.close_args.clone());

        let mut backend = self.backend.lock().await;
        match backend.do_request("create_close", &args).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_tracker_code(EMPTY_FILE) => {
                debug!(fid = self.fid, key = %self.key, "tracker reported empty file");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
