//! Remote guest API for pvectl.
//!
//! This crate provides the `GuestApi` trait the reconciler drives, an HTTP
//! implementation over the Proxmox VE REST API (`HttpBackend`), connection
//! configuration with API-token authentication (`ApiConfig`), and an in-memory
//! `MockGuestApi` used by tests.

pub mod config;
pub mod http;
pub mod mock;

pub use config::ApiConfig;
pub use http::HttpBackend;
pub use mock::{MockCall, MockGuestApi};

use pvectl_schema::{
    ConfigParams, Digest, DiskSize, GuestRef, MountSlot, PoolId, PowerState, RawConfig, StorageId,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("task {upid} failed: {status}")]
    Task { upid: String, status: String },
    #[error("timed out waiting for task {0}")]
    Timeout(String),
}

/// Operations the reconciler needs from the remote side.
///
/// Every call blocks until the remote operation has finished; task-based
/// operations (move, resize, power changes, creation) wait for their task.
pub trait GuestApi: Send + Sync {
    /// Current configuration as an untyped field map.
    fn read_config(&self, guest: &GuestRef) -> Result<RawConfig, RemoteError>;

    fn read_status(&self, guest: &GuestRef) -> Result<PowerState, RemoteError>;

    /// Partial update. `digest`, when given, is sent as a precondition.
    fn update_config(
        &self,
        guest: &GuestRef,
        params: &ConfigParams,
        digest: Option<&Digest>,
    ) -> Result<(), RemoteError>;

    fn create(&self, guest: &GuestRef, params: &ConfigParams) -> Result<(), RemoteError>;

    fn move_mount(
        &self,
        guest: &GuestRef,
        slot: MountSlot,
        target: &StorageId,
        delete_original: bool,
    ) -> Result<(), RemoteError>;

    fn resize_mount(
        &self,
        guest: &GuestRef,
        slot: MountSlot,
        size: DiskSize,
    ) -> Result<(), RemoteError>;

    fn shutdown(&self, guest: &GuestRef) -> Result<(), RemoteError>;

    fn start(&self, guest: &GuestRef) -> Result<(), RemoteError>;

    fn reboot(&self, guest: &GuestRef) -> Result<(), RemoteError>;

    /// Whether accepted changes are waiting for the next restart.
    fn has_pending_changes(&self, guest: &GuestRef) -> Result<bool, RemoteError>;

    fn assign_pool(&self, guest: &GuestRef, pool: &PoolId) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_display() {
        let e = RemoteError::Task {
            upid: "UPID:pve1:1".to_owned(),
            status: "command failed".to_owned(),
        };
        assert_eq!(e.to_string(), "task UPID:pve1:1 failed: command failed");
    }
}
