//! MogileFS Rust Client Library
//!
//! Async client for the MogileFS distributed file system.
//! Speaks the trackers' line protocol and moves file bytes to and from
//! storage nodes over HTTP.
//!
//! # Features
//!
//! - Tracker failover with dead-tracker backoff and preferred IPs
//! - Cached tracker connection with transparent reconnect
//! - Buffered file handles with ordered destination fallback
//! - Seekable, range-addressed large file handles
//! - Domain, class, host, device and fsck administration
//! - Typed errors, including tracker error codes
//!
//! # Example
//!
//! ```no_run
//! use mogilefs::{BackendConfig, Client};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BackendConfig::new(["192.168.1.100:7001"]);
//!     let client = Client::new("photos", config)?;
//!
//!     client.store_content("hello", None, b"Hello, MogileFS!").await?;
//!     let data = client.get_file_data("hello").await?;
//!     client.delete("hello").await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod admin;
mod client;
mod connection;
mod errors;
mod file;
mod hooks;
mod large_file;
mod normal_file;
pub mod protocol;
pub mod records;
mod storage;
pub mod types;

// Re-export public API
pub use admin::{Admin, HostUpdate};
pub use client::{Client, GetPathsOptions, NewFileOptions};
pub use connection::{Backend, Connection};
pub use errors::{MogileFSError, Result, EMPTY_FILE};
pub use file::{FileCommit, FileHandle};
pub use hooks::{RequestEvent, RequestObserver};
pub use large_file::{LargeFile, LargeFileOptions};
pub use normal_file::NormalFile;
pub use records::{KeyPage, StatsInfo};
pub use storage::StorageClient;
pub use types::{Args, BackendConfig, Clock, Destination, SystemClock, TrackerAddress};
