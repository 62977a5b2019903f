//! In-memory buffered file handle
//!
//! Bytes are collected in memory and uploaded in one PUT when the handle is
//! closed, trying each destination in order.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::{Cursor, Write};
use tracing::{error, warn};

use crate::errors::{MogileFSError, Result};
use crate::file::{FileCommit, FileHandle};
use crate::storage::StorageClient;
use crate::types::Destination;

/// A new file buffered in memory until close
pub struct NormalFile {
    buffer: Cursor<Vec<u8>>,
    dests: Vec<Destination>,
    storage: StorageClient,
    commit: FileCommit,
    stored_on: Option<Destination>,
    closed: bool,
}

impl NormalFile {
    /// Creates a handle that will upload to `dests` in order
    pub fn new(storage: StorageClient, dests: Vec<Destination>, commit: FileCommit) -> Self {
        Self {
            buffer: Cursor::new(Vec::new()),
            dests,
            storage,
            commit,
            stored_on: None,
            closed: false,
        }
    }

    /// Returns the candidate destinations
    pub fn paths(&self) -> &[Destination] {
        &self.dests
    }

    /// Returns the destination that accepted the upload
    ///
    /// `None` after close means every destination rejected the upload and
    /// the file was not stored.
    pub fn stored_on(&self) -> Option<&Destination> {
        self.stored_on.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(MogileFSError::FileClosed);
        }
        Ok(())
    }

    /// Returns the unread part of the buffer, capped at `limit` bytes
    fn remaining(&self, limit: Option<usize>) -> (usize, usize) {
        let len = self.buffer.get_ref().len();
        let start = (self.buffer.position() as usize).min(len);
        let end = match limit {
            Some(n) => start.saturating_add(n).min(len),
            None => len,
        };
        (start, end)
    }

    fn take(&mut self, start: usize, end: usize) -> Bytes {
        self.buffer.set_position(end as u64);
        Bytes::copy_from_slice(&self.buffer.get_ref()[start..end])
    }
}

#[async_trait]
impl FileHandle for NormalFile {
    async fn read(&mut self, n: Option<usize>) -> Result<Bytes> {
        self.ensure_open()?;
        let (start, end) = self.remaining(n);
        Ok(self.take(start, end))
    }

    async fn readline(&mut self) -> Result<Bytes> {
        self.ensure_open()?;
        let (start, end) = self.remaining(None);
        let line_end = self.buffer.get_ref()[start..end]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(end, |i| start + i + 1);
        Ok(self.take(start, line_end))
    }

    async fn readlines(&mut self) -> Result<Vec<Bytes>> {
        let mut lines = Vec::new();
        loop {
            let line = self.readline().await?;
            if line.is_empty() {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        self.buffer.write_all(data)?;
        Ok(data.len())
    }

    fn seek(&mut self, pos: i64) -> Result<u64> {
        self.ensure_open()?;
        let pos = pos.max(0) as u64;
        self.buffer.set_position(pos);
        Ok(pos)
    }

    fn tell(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.buffer.position())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let content = Bytes::from(std::mem::take(self.buffer.get_mut()));
        let size = content.len() as u64;

        for dest in &self.dests {
            match self.storage.put(&dest.path, content.clone()).await {
                Ok(()) => {
                    self.stored_on = Some(dest.clone());
                    break;
                }
                Err(e) => {
                    warn!(path = %dest.path, error = %e, "storage destination rejected upload");
                }
            }
        }

        match &self.stored_on {
            Some(dest) => self.commit.commit(dest, size).await,
            None => {
                error!(
                    fid = self.commit.fid(),
                    key = %self.commit.key(),
                    "no storage destination accepted the upload, file not stored"
                );
                Ok(())
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for NormalFile {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                fid = self.commit.fid(),
                key = %self.commit.key(),
                "file handle dropped without close, contents discarded"
            );
        }
    }
}
