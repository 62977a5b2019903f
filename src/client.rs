//! MogileFS Rust Client
//!
//! Domain-scoped client for storing, reading and managing keys.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::Backend;
use crate::errors::{MogileFSError, Result};
use crate::file::{FileCommit, FileHandle};
use crate::large_file::{LargeFile, LargeFileOptions};
use crate::normal_file::NormalFile;
use crate::protocol::{build_args, decode_destinations, decode_fid, field, parse_field};
use crate::records::{decode_keys, decode_paths, KeyPage};
use crate::storage::StorageClient;
use crate::types::{Args, BackendConfig, Destination, TrackerAddress};

/// Page size used when walking all keys
pub const KEY_PAGE_LIMIT: u32 = 1000;

/// Chunk size used by [`Client::store_file`]
pub const STORE_CHUNK_SIZE: usize = 8192;

/// Options for [`Client::new_file`]
#[derive(Debug, Clone, Default)]
pub struct NewFileOptions {
    /// Replication class, the domain default when `None`
    pub class: Option<String>,
    /// Stream writes to storage instead of buffering in memory
    pub largefile: bool,
    /// Extra arguments for `create_open`
    pub create_open_args: Args,
    /// Extra arguments for `create_close`
    pub create_close_args: Args,
}

impl NewFileOptions {
    /// Sets the replication class
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Selects the streaming large-file handle
    pub fn large(mut self) -> Self {
        self.largefile = true;
        self
    }
}

/// Options for [`Client::get_paths`]
#[derive(Debug, Clone)]
pub struct GetPathsOptions {
    /// Skip the tracker's path verification
    pub noverify: bool,
    /// Network zone to prefer; `None` leaves the choice to the tracker
    pub zone: Option<String>,
    /// Maximum number of paths returned
    pub pathcount: u32,
}

impl Default for GetPathsOptions {
    fn default() -> Self {
        Self {
            noverify: true,
            zone: Some("alt".to_string()),
            pathcount: 2,
        }
    }
}

/// MogileFS client bound to one domain
///
/// # Example
///
/// ```no_run
/// use mogilefs::{BackendConfig, Client, FileHandle, NewFileOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::new("photos", BackendConfig::new(["10.0.0.2:7001"]))?;
///
///     let mut file = client.new_file("cat.jpg", NewFileOptions::default()).await?;
///     file.write(b"meow").await?;
///     file.close().await?;
///
///     let data = client.get_file_data("cat.jpg").await?;
///     client.delete("cat.jpg").await?;
///     Ok(())
/// }
/// ```
pub struct Client {
    domain: String,
    backend: Arc<Mutex<Backend>>,
    storage: StorageClient,
    readonly: bool,
}

impl Client {
    /// Creates a client for `domain` talking to the configured trackers
    pub fn new(domain: impl Into<String>, config: BackendConfig) -> Result<Self> {
        let backend = Backend::new(config)?;
        Ok(Self::with_backend(domain, backend, StorageClient::new()?))
    }

    /// Creates a client from an existing backend and storage client
    pub fn with_backend(domain: impl Into<String>, backend: Backend, storage: StorageClient) -> Self {
        Self {
            domain: domain.into(),
            backend: Arc::new(Mutex::new(backend)),
            storage,
            readonly: false,
        }
    }

    /// Rejects every mutating call when set
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Returns the domain this client works in
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the shared tracker backend
    pub fn backend(&self) -> Arc<Mutex<Backend>> {
        self.backend.clone()
    }

    /// Returns the tracker most recently connected to
    pub async fn last_tracker(&self) -> Option<TrackerAddress> {
        self.backend.lock().await.last_tracker_connected().cloned()
    }

    /// Sets preferred alternate IPs for trackers
    pub async fn set_pref_ip(&self, pref_ip: HashMap<String, String>) {
        self.backend.lock().await.set_pref_ip(pref_ip);
    }

    async fn do_request(&self, command: &str, args: &Args) -> Result<Args> {
        self.backend.lock().await.do_request(command, args).await
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(MogileFSError::ReadOnly("client"));
        }
        Ok(())
    }

    /// Starts a new file under `key`
    ///
    /// Write to the returned handle, then close it: the file only exists
    /// once `close` has reported it to the tracker.
    pub async fn new_file(&self, key: &str, options: NewFileOptions) -> Result<Box<dyn FileHandle>> {
        self.check_writable()?;

        let mut args = build_args([
            ("domain", self.domain.clone()),
            ("key", key.to_string()),
            ("fid", "0".to_string()),
            ("multi_dest", "1".to_string()),
        ]);
        if let Some(class) = &options.class {
            args.insert("class".to_string(), class.clone());
        }
        args.extend(options.create_open_args);

        let res = self.do_request("create_open", &args).await?;
        let fid = decode_fid(&res)?;
        let dests = decode_destinations(&res)?;
        debug!(key, fid, destinations = dests.len(), "create_open");

        let commit = FileCommit::new(
            self.backend.clone(),
            fid,
            self.domain.clone(),
            key,
            options.create_close_args,
        );

        if options.largefile {
            let options = LargeFileOptions {
                overwrite: true,
                readonly: false,
            };
            let file = LargeFile::open(self.storage.clone(), dests, options, Some(commit)).await?;
            Ok(Box::new(file))
        } else {
            Ok(Box::new(NormalFile::new(self.storage.clone(), dests, commit)))
        }
    }

    /// Opens an existing key for reading
    pub async fn read_file(&self, key: &str) -> Result<LargeFile> {
        let paths = self.get_paths(key, GetPathsOptions::default()).await?;
        let dests = paths.into_iter().map(Destination::from_path).collect();
        let options = LargeFileOptions {
            overwrite: false,
            readonly: true,
        };
        LargeFile::open(self.storage.clone(), dests, options, None).await
    }

    /// Opens an existing key for in-place editing
    ///
    /// The storage node must support the WebDAV `MOVE` verb and partial
    /// PUT. Existing URLs for the key become invalid.
    pub async fn edit_file(&self, key: &str, overwrite: bool) -> Result<LargeFile> {
        self.check_writable()?;

        let args = build_args([("domain", self.domain.clone()), ("key", key.to_string())]);
        let res = self.do_request("edit_file", &args).await?;

        let old_path = field(&res, "oldpath")?;
        let new_path = field(&res, "newpath")?;
        self.storage.move_to(old_path, new_path).await?;

        let commit = FileCommit::new(
            self.backend.clone(),
            decode_fid(&res)?,
            self.domain.clone(),
            key,
            Args::new(),
        );
        let dest = Destination::new(parse_field(&res, "devid")?, new_path);
        let options = LargeFileOptions {
            overwrite,
            readonly: false,
        };
        LargeFile::open(self.storage.clone(), vec![dest], options, Some(commit)).await
    }

    /// Stores `content` under `key`, returning the number of bytes stored
    pub async fn store_content(&self, key: &str, class: Option<&str>, content: &[u8]) -> Result<u64> {
        let mut file = self.new_file(key, class_options(class)).await?;
        let written = file.write(content).await;
        let closed = file.close().await;
        written?;
        closed?;
        Ok(content.len() as u64)
    }

    /// Stores a local file under `key`, returning the number of bytes stored
    pub async fn store_file(&self, key: &str, class: Option<&str>, path: impl AsRef<Path>) -> Result<u64> {
        let mut source = tokio::fs::File::open(path.as_ref()).await?;
        let mut file = self.new_file(key, class_options(class)).await?;

        let copied = async {
            let mut buf = vec![0u8; STORE_CHUNK_SIZE];
            let mut total = 0u64;
            loop {
                let n = source.read(&mut buf).await?;
                if n == 0 {
                    return Ok::<u64, MogileFSError>(total);
                }
                file.write(&buf[..n]).await?;
                total += n as u64;
            }
        }
        .await;

        let closed = file.close().await;
        let total = copied?;
        closed?;
        Ok(total)
    }

    /// Returns the URLs the key has been replicated to
    pub async fn get_paths(&self, key: &str, options: GetPathsOptions) -> Result<Vec<String>> {
        let mut args = build_args([
            ("domain", self.domain.clone()),
            ("key", key.to_string()),
            ("noverify", if options.noverify { "1" } else { "0" }.to_string()),
            ("pathcount", options.pathcount.to_string()),
        ]);
        if let Some(zone) = options.zone {
            args.insert("zone".to_string(), zone);
        }

        let res = self.do_request("get_paths", &args).await?;
        decode_paths(&res)
    }

    /// Reads the complete contents of a key into memory
    pub async fn get_file_data(&self, key: &str) -> Result<Bytes> {
        let mut file = self.read_file(key).await?;
        let data = file.read(None).await;
        file.close().await?;
        data
    }

    /// Deletes a key
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        let args = build_args([("domain", self.domain.clone()), ("key", key.to_string())]);
        self.do_request("delete", &args).await?;
        Ok(())
    }

    /// Renames a key
    pub async fn rename(&self, from_key: &str, to_key: &str) -> Result<()> {
        self.check_writable()?;
        let args = build_args([
            ("domain", self.domain.clone()),
            ("from_key", from_key.to_string()),
            ("to_key", to_key.to_string()),
        ]);
        self.do_request("rename", &args).await?;
        Ok(())
    }

    /// Lists one page of keys
    ///
    /// Pass the returned `next_after` as `after` to continue.
    pub async fn list_keys(
        &self,
        prefix: Option<&str>,
        after: Option<&str>,
        limit: Option<u32>,
    ) -> Result<KeyPage> {
        let mut args = build_args([("domain", self.domain.clone())]);
        if let Some(prefix) = prefix {
            args.insert("prefix".to_string(), prefix.to_string());
        }
        if let Some(after) = after {
            args.insert("after".to_string(), after.to_string());
        }
        if let Some(limit) = limit {
            args.insert("limit".to_string(), limit.to_string());
        }

        let res = self.do_request("list_keys", &args).await?;
        decode_keys(&res)
    }

    /// Lists every key matching `prefix`, following pages
    pub async fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let page = self
                .list_keys(prefix, after.as_deref(), Some(KEY_PAGE_LIMIT))
                .await?;
            let full = page.keys.len() >= KEY_PAGE_LIMIT as usize;
            keys.extend(page.keys);

            match page.next_after {
                Some(next) if full => after = Some(next),
                _ => return Ok(keys),
            }
        }
    }

    /// Changes the replication class of a key
    pub async fn update_class(&self, key: &str, class: &str) -> Result<()> {
        self.check_writable()?;
        let args = build_args([
            ("domain", self.domain.clone()),
            ("key", key.to_string()),
            ("class", class.to_string()),
        ]);
        self.do_request("updateclass", &args).await?;
        Ok(())
    }

    /// Asks the tracker to sleep for `duration` seconds
    pub async fn sleep(&self, duration: u64) -> Result<()> {
        let args = build_args([("duration", duration.to_string())]);
        self.do_request("sleep", &args).await?;
        Ok(())
    }
}

fn class_options(class: Option<&str>) -> NewFileOptions {
    NewFileOptions {
        class: class.map(str::to_string),
        ..Default::default()
    }
}
