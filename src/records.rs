//! Structured records decoded from tracker responses
//!
//! Trackers return lists as numbered fields (`host1_hostid`,
//! `dev2_status`, `domain1class3name`, ...). The functions here turn those
//! into ordered vectors of records for the [`Client`](crate::Client) and
//! [`Admin`](crate::Admin) APIs.

use std::str::FromStr;

use crate::errors::Result;
use crate::protocol::{field, parse_field};
use crate::types::Args;

/// A storage host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Tracker-assigned host id
    pub hostid: u64,
    /// Host status, e.g. `alive` or `down`
    pub status: String,
    /// Host name as registered
    pub hostname: String,
    /// IP address storage URLs point at
    pub hostip: String,
    /// Storage HTTP port
    pub http_port: u16,
}

/// A storage device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Tracker-assigned device id
    pub devid: u64,
    /// Host the device is attached to
    pub hostid: u64,
    /// Configured state, e.g. `alive`, `down` or `dead`
    pub status: String,
    /// State last seen by the monitor
    pub observed_state: Option<String>,
    /// I/O utilization as reported by the storage node
    pub utilization: Option<String>,
    /// Capacity in megabytes
    pub mb_total: Option<u64>,
    /// Used space in megabytes
    pub mb_used: Option<u64>,
    /// Placement weight
    pub weight: Option<u64>,
}

impl DeviceInfo {
    /// Free space in megabytes, when the tracker reports usage
    pub fn mb_free(&self) -> Option<u64> {
        Some(self.mb_total?.saturating_sub(self.mb_used?))
    }
}

/// A replication class within a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    /// Class name
    pub name: String,
    /// Minimum number of devices holding each file
    pub mindevcount: u32,
}

/// A domain and its classes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
    /// Domain name
    pub name: String,
    /// Classes defined in the domain
    pub classes: Vec<ClassInfo>,
}

/// Raw information about a stored fid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FidInfo {
    /// File id
    pub fid: u64,
    /// Key the fid is stored under
    pub key: String,
    /// Size in bytes
    pub length: u64,
    /// Replication class
    pub class: String,
    /// Owning domain
    pub domain: String,
    /// Number of devices holding a copy
    pub devcount: u32,
}

/// One entry of the fsck log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsckLogRow {
    /// Log entry id, usable as `after_logid`
    pub logid: u64,
    /// Unix time of the event
    pub utime: u64,
    /// Fid the event concerns
    pub fid: u64,
    /// Fsck event code
    pub evcode: String,
    /// Device involved, if any
    pub devid: Option<u64>,
}

/// One page of `list_keys` results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    /// Keys in tracker order
    pub keys: Vec<String>,
    /// Pass as `after` to fetch the next page
    pub next_after: Option<String>,
}

/// Replica counts for one domain and class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationStat {
    /// Domain name
    pub domain: String,
    /// Class name
    pub class: String,
    /// Number of devices holding a copy
    pub devcount: Option<u32>,
    /// Files replicated onto exactly `devcount` devices
    pub files: Option<u64>,
}

/// File count for one domain and class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStat {
    /// Domain name
    pub domain: String,
    /// Class name
    pub class: String,
    /// Number of files stored
    pub files: Option<u64>,
}

/// Per-device file count
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStat {
    /// Device id
    pub devid: Option<u64>,
    /// Host the device is attached to
    pub host: Option<String>,
    /// Device status
    pub status: Option<String>,
    /// Number of files on the device
    pub files: Option<u64>,
}

/// Cluster statistics from `stats all=1`
///
/// A section the tracker leaves out decodes as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsInfo {
    /// Replica counts by domain and class
    pub replication: Vec<ReplicationStat>,
    /// File counts by domain and class
    pub files: Vec<FileStat>,
    /// File counts by device
    pub devices: Vec<DeviceStat>,
    /// Highest fid allocated so far
    pub fidmax: Option<u64>,
}

/// Decodes `count_field` and maps each 1-based index through `decode`
fn indexed<T>(res: &Args, count_field: &str, decode: impl Fn(usize) -> Result<T>) -> Result<Vec<T>> {
    let count: usize = parse_field(res, count_field)?;
    (1..=count).map(decode).collect()
}

/// Like [`indexed`], but a missing count yields no entries
fn optional_indexed<T>(res: &Args, count_field: &str, decode: impl Fn(usize) -> Result<T>) -> Result<Vec<T>> {
    if res.contains_key(count_field) {
        indexed(res, count_field, decode)
    } else {
        Ok(Vec::new())
    }
}

fn text(res: &Args, name: &str) -> String {
    res.get(name).cloned().unwrap_or_default()
}

fn optional(res: &Args, name: &str) -> Option<String> {
    res.get(name).filter(|v| !v.is_empty()).cloned()
}

fn optional_num<T: FromStr>(res: &Args, name: &str) -> Option<T> {
    res.get(name).and_then(|v| v.parse().ok())
}

/// Decodes a `get_hosts` response
pub fn decode_hosts(res: &Args) -> Result<Vec<HostInfo>> {
    indexed(res, "hosts", |i| {
        let f = |name: &str| format!("host{}_{}", i, name);
        Ok(HostInfo {
            hostid: parse_field(res, &f("hostid"))?,
            status: field(res, &f("status"))?.to_string(),
            hostname: field(res, &f("hostname"))?.to_string(),
            hostip: field(res, &f("hostip"))?.to_string(),
            http_port: parse_field(res, &f("http_port"))?,
        })
    })
}

/// Decodes a `get_devices` response
pub fn decode_devices(res: &Args) -> Result<Vec<DeviceInfo>> {
    indexed(res, "devices", |i| {
        let f = |name: &str| format!("dev{}_{}", i, name);
        Ok(DeviceInfo {
            devid: parse_field(res, &f("devid"))?,
            hostid: parse_field(res, &f("hostid"))?,
            status: field(res, &f("status"))?.to_string(),
            observed_state: optional(res, &f("observed_state")),
            utilization: optional(res, &f("utilization")),
            mb_total: optional_num(res, &f("mb_total")),
            mb_used: optional_num(res, &f("mb_used")),
            weight: optional_num(res, &f("weight")),
        })
    })
}

/// Decodes a `get_domains` response
pub fn decode_domains(res: &Args) -> Result<Vec<DomainInfo>> {
    indexed(res, "domains", |i| {
        let classes = indexed(res, &format!("domain{}classes", i), |j| {
            Ok(ClassInfo {
                name: field(res, &format!("domain{}class{}name", i, j))?.to_string(),
                mindevcount: parse_field(res, &format!("domain{}class{}mindevcount", i, j))?,
            })
        })?;
        Ok(DomainInfo {
            name: field(res, &format!("domain{}", i))?.to_string(),
            classes,
        })
    })
}

/// Decodes a `list_fids` response
pub fn decode_fids(res: &Args) -> Result<Vec<FidInfo>> {
    indexed(res, "fid_count", |i| {
        let f = |name: &str| format!("fid_{}_{}", i, name);
        Ok(FidInfo {
            fid: parse_field(res, &f("fid"))?,
            key: field(res, &f("key"))?.to_string(),
            length: parse_field(res, &f("length"))?,
            class: field(res, &f("class"))?.to_string(),
            domain: field(res, &f("domain"))?.to_string(),
            devcount: parse_field(res, &f("devcount"))?,
        })
    })
}

/// Decodes an `fsck_getlog` response
pub fn decode_fsck_rows(res: &Args) -> Result<Vec<FsckLogRow>> {
    indexed(res, "row_count", |i| {
        let f = |name: &str| format!("row_{}_{}", i, name);
        Ok(FsckLogRow {
            logid: parse_field(res, &f("logid"))?,
            utime: parse_field(res, &f("utime"))?,
            fid: parse_field(res, &f("fid"))?,
            evcode: field(res, &f("evcode"))?.to_string(),
            devid: optional_num(res, &f("devid")),
        })
    })
}

/// Decodes a `server_settings` response; a missing value is empty
pub fn decode_server_settings(res: &Args) -> Result<Vec<(String, String)>> {
    indexed(res, "key_count", |i| {
        Ok((
            field(res, &format!("key_{}", i))?.to_string(),
            res.get(&format!("value_{}", i)).cloned().unwrap_or_default(),
        ))
    })
}

/// Decodes a `list_keys` response
pub fn decode_keys(res: &Args) -> Result<KeyPage> {
    let keys = indexed(res, "key_count", |i| Ok(field(res, &format!("key_{}", i))?.to_string()))?;
    Ok(KeyPage {
        keys,
        next_after: optional(res, "next_after"),
    })
}

/// Decodes a `get_paths` response into URLs in tracker order
pub fn decode_paths(res: &Args) -> Result<Vec<String>> {
    indexed(res, "paths", |i| Ok(field(res, &format!("path{}", i))?.to_string()))
}

/// Decodes a `stats` response
pub fn decode_stats(res: &Args) -> Result<StatsInfo> {
    let replication = optional_indexed(res, "replicationcount", |i| {
        let f = |name: &str| format!("replication{}{}", i, name);
        Ok(ReplicationStat {
            domain: text(res, &f("domain")),
            class: text(res, &f("class")),
            devcount: optional_num(res, &f("devcount")),
            files: optional_num(res, &f("fields")),
        })
    })?;

    let files = optional_indexed(res, "filescount", |i| {
        let f = |name: &str| format!("files{}{}", i, name);
        Ok(FileStat {
            domain: text(res, &f("domain")),
            class: text(res, &f("class")),
            files: optional_num(res, &f("files")),
        })
    })?;

    let devices = optional_indexed(res, "devicescount", |i| {
        let f = |name: &str| format!("devices{}{}", i, name);
        Ok(DeviceStat {
            devid: optional_num(res, &f("id")),
            host: optional(res, &f("host")),
            status: optional(res, &f("status")),
            files: optional_num(res, &f("files")),
        })
    })?;

    Ok(StatsInfo {
        replication,
        files,
        devices,
        fidmax: optional_num(res, "fidmax"),
    })
}
