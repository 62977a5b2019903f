//! Range-addressed file handle
//!
//! Reads and writes go straight to one storage destination as partial GETs
//! and PUTs, so the file never has to fit in memory. The destination is
//! chosen when the handle is opened by probing the candidates in order.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::errors::{MogileFSError, Result};
use crate::file::{FileCommit, FileHandle};
use crate::storage::StorageClient;
use crate::types::Destination;

/// Options for opening a large file handle
#[derive(Debug, Clone, Copy, Default)]
pub struct LargeFileOptions {
    /// Truncate (or create) the object when opening
    pub overwrite: bool,
    /// Reject writes
    pub readonly: bool,
}

/// A seekable file handle streaming to one storage destination
pub struct LargeFile {
    storage: StorageClient,
    commit: Option<FileCommit>,
    dest: Destination,
    pos: u64,
    eof: bool,
    length: u64,
    overwrite: bool,
    readonly: bool,
    closed: bool,
}

impl LargeFile {
    /// Opens the first destination that answers the probe
    ///
    /// With `overwrite` the probe is a zero-length PUT that truncates the
    /// object; otherwise a HEAD that reports its current length. `commit`
    /// is `None` for handles that must not call `create_close`.
    pub async fn open(
        storage: StorageClient,
        dests: Vec<Destination>,
        options: LargeFileOptions,
        commit: Option<FileCommit>,
    ) -> Result<Self> {
        for dest in dests {
            let probe = if options.overwrite {
                storage.truncate(&dest.path).await.map(|()| 0)
            } else {
                storage.head(&dest.path).await
            };

            match probe {
                Ok(length) => {
                    debug!(path = %dest.path, length, "opened large file");
                    return Ok(Self {
                        storage,
                        commit,
                        dest,
                        pos: 0,
                        eof: false,
                        length,
                        overwrite: options.overwrite,
                        readonly: options.readonly,
                        closed: false,
                    });
                }
                Err(e) => {
                    warn!(path = %dest.path, error = %e, "storage destination unavailable");
                }
            }
        }

        Err(MogileFSError::NoStorageNode)
    }

    /// Returns the chosen destination
    pub fn destination(&self) -> &Destination {
        &self.dest
    }

    /// Returns the known file length
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Checks whether a read has reached the end of the file
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Checks whether the object was truncated on open
    pub fn is_overwrite(&self) -> bool {
        self.overwrite
    }

    /// Checks whether writes are rejected
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(MogileFSError::FileClosed);
        }
        Ok(())
    }

    fn needs_commit(&self) -> bool {
        self.commit.is_some() && self.dest.devid.is_some()
    }
}

#[async_trait]
impl FileHandle for LargeFile {
    /// Reads with a ranged GET
    ///
    /// A 416 answer marks end of file and returns no bytes. Reading with
    /// `None` fetches everything from the current position and also marks
    /// end of file.
    async fn read(&mut self, n: Option<usize>) -> Result<Bytes> {
        self.ensure_open()?;
        if self.eof || n == Some(0) {
            return Ok(Bytes::new());
        }

        let end = n.map(|n| self.pos.saturating_add(n as u64) - 1);
        let content = match self.storage.get(&self.dest.path, self.pos, end).await {
            Ok(content) => content,
            Err(e) if e.http_status() == Some(416) => {
                self.eof = true;
                return Ok(Bytes::new());
            }
            Err(e) => return Err(e),
        };

        self.pos += content.len() as u64;
        if n.is_none() || content.is_empty() {
            self.eof = true;
        }
        Ok(content)
    }

    async fn readline(&mut self) -> Result<Bytes> {
        Err(MogileFSError::NotImplemented("readline on large files"))
    }

    async fn readlines(&mut self) -> Result<Vec<Bytes>> {
        Err(MogileFSError::NotImplemented("readlines on large files"))
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if self.readonly {
            return Err(MogileFSError::ReadOnly("file"));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let len = data.len() as u64;
        self.storage
            .put_range(&self.dest.path, self.pos, Bytes::copy_from_slice(data))
            .await?;

        self.length = self.length.max(self.pos + len);
        self.pos += len;
        Ok(data.len())
    }

    fn seek(&mut self, pos: i64) -> Result<u64> {
        self.ensure_open()?;
        self.pos = pos.max(0) as u64;
        self.eof = false;
        Ok(self.pos)
    }

    fn tell(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.pos)
    }

    /// Reports the final length to the tracker; content is already stored
    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match &self.commit {
            Some(commit) if self.dest.devid.is_some() => commit.commit(&self.dest, self.length).await,
            _ => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for LargeFile {
    fn drop(&mut self) {
        if !self.closed && self.needs_commit() {
            warn!(path = %self.dest.path, "large file dropped without close, tracker not updated");
        }
    }
}
