//! MogileFS administration API
//!
//! Cluster management over the tracker protocol: domains, classes, hosts,
//! devices, fsck and server settings.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::connection::Backend;
use crate::errors::{MogileFSError, Result};
use crate::protocol::build_args;
use crate::records::*;
use crate::types::{Args, BackendConfig};

/// Fields that may change on an existing host
#[derive(Debug, Clone, Default)]
pub struct HostUpdate {
    /// New IP address
    pub ip: Option<String>,
    /// New storage HTTP port
    pub port: Option<u16>,
    /// New status, e.g. `alive` or `down`
    pub status: Option<String>,
}

/// Administrative client for a MogileFS cluster
pub struct Admin {
    backend: Arc<Mutex<Backend>>,
    readonly: bool,
}

impl Admin {
    /// Creates an admin client talking to the configured trackers
    pub fn new(config: BackendConfig) -> Result<Self> {
        Ok(Self::with_backend(Backend::new(config)?))
    }

    /// Creates an admin client from an existing backend
    pub fn with_backend(backend: Backend) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            readonly: false,
        }
    }

    /// Rejects every mutating call when set
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Returns the shared tracker backend
    pub fn backend(&self) -> Arc<Mutex<Backend>> {
        self.backend.clone()
    }

    async fn do_request(&self, command: &str, args: &Args) -> Result<Args> {
        self.backend.lock().await.do_request(command, args).await
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(MogileFSError::ReadOnly("admin client"));
        }
        Ok(())
    }

    /// Lists storage hosts, or one host by id
    pub async fn get_hosts(&self, hostid: Option<u64>) -> Result<Vec<HostInfo>> {
        let args = build_args(hostid.map(|id| ("hostid", id.to_string())));
        decode_hosts(&self.do_request("get_hosts", &args).await?)
    }

    /// Lists storage devices, or one device by id
    pub async fn get_devices(&self, devid: Option<u64>) -> Result<Vec<DeviceInfo>> {
        let args = build_args(devid.map(|id| ("devid", id.to_string())));
        decode_devices(&self.do_request("get_devices", &args).await?)
    }

    /// Free space in megabytes across the cluster, or on one device
    pub async fn get_freespace(&self, devid: Option<u64>) -> Result<u64> {
        let devices = self.get_devices(devid).await?;
        Ok(devices.iter().filter_map(DeviceInfo::mb_free).sum())
    }

    /// Lists raw fid information in the range `[from_fid, to_fid]`
    pub async fn list_fids(&self, from_fid: u64, to_fid: u64) -> Result<Vec<FidInfo>> {
        let args = build_args([("from", from_fid.to_string()), ("to", to_fid.to_string())]);
        decode_fids(&self.do_request("list_fids", &args).await?)
    }

    /// Fetches cluster statistics: replication, file and device counts
    pub async fn get_stats(&self) -> Result<StatsInfo> {
        let args = build_args([("all", "1".to_string())]);
        decode_stats(&self.do_request("stats", &args).await?)
    }

    /// Lists domains with their classes
    pub async fn get_domains(&self) -> Result<Vec<DomainInfo>> {
        decode_domains(&self.do_request("get_domains", &Args::new()).await?)
    }

    /// Creates a domain
    pub async fn create_domain(&self, domain: &str) -> Result<()> {
        self.check_writable()?;
        let args = build_args([("domain", domain.to_string())]);
        self.do_request("create_domain", &args).await?;
        Ok(())
    }

    /// Deletes an empty domain
    pub async fn delete_domain(&self, domain: &str) -> Result<()> {
        self.check_writable()?;
        let args = build_args([("domain", domain.to_string())]);
        self.do_request("delete_domain", &args).await?;
        Ok(())
    }

    /// Creates a class with its minimum replica count
    pub async fn create_class(&self, domain: &str, class: &str, mindevcount: u32) -> Result<()> {
        self.modify_class("create", domain, class, mindevcount).await
    }

    /// Changes the minimum replica count of a class
    pub async fn update_class(&self, domain: &str, class: &str, mindevcount: u32) -> Result<()> {
        self.modify_class("update", domain, class, mindevcount).await
    }

    /// Deletes a class from a domain
    pub async fn delete_class(&self, domain: &str, class: &str) -> Result<()> {
        self.check_writable()?;
        let args = build_args([("domain", domain.to_string()), ("class", class.to_string())]);
        self.do_request("delete_class", &args).await?;
        Ok(())
    }

    async fn modify_class(&self, verb: &str, domain: &str, class: &str, mindevcount: u32) -> Result<()> {
        self.check_writable()?;
        let args = build_args([
            ("domain", domain.to_string()),
            ("class", class.to_string()),
            ("mindevcount", mindevcount.to_string()),
        ]);
        self.do_request(&format!("{}_class", verb), &args).await?;
        Ok(())
    }

    /// Registers a storage host
    pub async fn create_host(&self, host: &str, ip: &str, port: u16, status: Option<&str>) -> Result<()> {
        let update = HostUpdate {
            ip: Some(ip.to_string()),
            port: Some(port),
            status: status.map(str::to_string),
        };
        self.modify_host("create", host, update).await
    }

    /// Changes the fields of `update` that are set
    pub async fn update_host(&self, host: &str, update: HostUpdate) -> Result<()> {
        self.modify_host("update", host, update).await
    }

    /// Removes a storage host
    pub async fn delete_host(&self, host: &str) -> Result<()> {
        self.check_writable()?;
        let args = build_args([("host", host.to_string())]);
        self.do_request("delete_host", &args).await?;
        Ok(())
    }

    async fn modify_host(&self, verb: &str, host: &str, update: HostUpdate) -> Result<()> {
        self.check_writable()?;
        let mut args = build_args([("host", host.to_string())]);
        if let Some(ip) = update.ip {
            args.insert("ip".to_string(), ip);
        }
        if let Some(port) = update.port {
            args.insert("port".to_string(), port.to_string());
        }
        if let Some(status) = update.status {
            args.insert("status".to_string(), status);
        }
        self.do_request(&format!("{}_host", verb), &args).await?;
        Ok(())
    }

    /// Registers a device on a host and returns the tracker's answer
    pub async fn create_device(
        &self,
        hostname: &str,
        devid: u64,
        hostip: Option<&str>,
        state: Option<&str>,
    ) -> Result<Args> {
        self.check_writable()?;
        let mut args = build_args([("hostname", hostname.to_string()), ("devid", devid.to_string())]);
        if let Some(hostip) = hostip {
            args.insert("hostip".to_string(), hostip.to_string());
        }
        if let Some(state) = state {
            args.insert("state".to_string(), state.to_string());
        }
        self.do_request("create_device", &args).await
    }

    /// Sets a device state such as `alive`, `down` or `dead`
    pub async fn change_device_state(&self, host: &str, device: u64, state: &str) -> Result<()> {
        self.check_writable()?;
        let args = build_args([
            ("host", host.to_string()),
            ("device", device.to_string()),
            ("state", state.to_string()),
        ]);
        self.do_request("set_state", &args).await?;
        Ok(())
    }

    /// Sets a device's placement weight
    pub async fn change_device_weight(&self, host: &str, device: u64, weight: u32) -> Result<()> {
        self.check_writable()?;
        let args = build_args([
            ("host", host.to_string()),
            ("device", device.to_string()),
            ("weight", weight.to_string()),
        ]);
        self.do_request("set_weight", &args).await?;
        Ok(())
    }

    /// Applies a state change, then a weight change, skipping unset ones
    pub async fn update_device(
        &self,
        host: &str,
        device: u64,
        state: Option<&str>,
        weight: Option<u32>,
    ) -> Result<()> {
        if let Some(state) = state {
            self.change_device_state(host, device, state).await?;
        }
        if let Some(weight) = weight {
            self.change_device_weight(host, device, weight).await?;
        }
        Ok(())
    }

    /// Starts the fsck worker
    pub async fn fsck_start(&self) -> Result<()> {
        self.fsck_command("fsck_start", Args::new()).await
    }

    /// Stops the fsck worker
    pub async fn fsck_stop(&self) -> Result<()> {
        self.fsck_command("fsck_stop", Args::new()).await
    }

    /// Resets fsck progress to `startpos`
    pub async fn fsck_reset(&self, policy_only: bool, startpos: u64) -> Result<()> {
        let args = build_args([
            ("policy_only", u8::from(policy_only).to_string()),
            ("startpos", startpos.to_string()),
        ]);
        self.fsck_command("fsck_reset", args).await
    }

    /// Clears the fsck log
    pub async fn fsck_clearlog(&self) -> Result<()> {
        self.fsck_command("fsck_clearlog", Args::new()).await
    }

    async fn fsck_command(&self, command: &str, args: Args) -> Result<()> {
        self.check_writable()?;
        self.do_request(command, &args).await?;
        Ok(())
    }

    /// Returns the raw fsck status fields
    pub async fn fsck_status(&self) -> Result<Args> {
        self.do_request("fsck_status", &Args::new()).await
    }

    /// Returns fsck log rows after `after_logid`
    pub async fn fsck_log_rows(&self, after_logid: Option<u64>) -> Result<Vec<FsckLogRow>> {
        let args = build_args(after_logid.map(|id| ("after_logid", id.to_string())));
        decode_fsck_rows(&self.do_request("fsck_getlog", &args).await?)
    }

    /// Lists server settings as `(key, value)` pairs
    pub async fn server_settings(&self) -> Result<Vec<(String, String)>> {
        decode_server_settings(&self.do_request("server_settings", &Args::new()).await?)
    }

    /// Sets one server setting
    pub async fn set_server_setting(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let args = build_args([("key", key.to_string()), ("value", value.to_string())]);
        self.do_request("set_server_setting", &args).await?;
        Ok(())
    }

    /// Clears the trackers' caches
    pub async fn clear_cache(&self) -> Result<()> {
        self.do_request("clear_cache", &Args::new()).await?;
        Ok(())
    }

    /// Asks the trackers to replicate under-replicated files now
    pub async fn replicate_now(&self) -> Result<()> {
        self.check_writable()?;
        self.do_request("replicate_now", &Args::new()).await?;
        Ok(())
    }
}
