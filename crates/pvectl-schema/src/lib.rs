//! Typed configuration model and wire codecs for Proxmox VE containers.
//!
//! This crate defines the schema layer: the sparse desired record authored in
//! TOML (`DesiredConfig`), the decoded remote snapshot (`CurrentConfig`), and the
//! composite wire formats the remote API uses for sizes, digests, feature flags,
//! mount lines and network interface lines. Nothing here talks to the network.

pub mod current;
pub mod desired;
pub mod digest;
pub mod features;
pub mod mount;
pub mod network;
pub mod params;
pub mod power;
pub mod size;
pub mod types;

pub use current::{CurrentConfig, RawConfig};
pub use desired::{
    parse_desired_file, parse_desired_str, Architecture, BindMount, BootMountRequest, CpuLimits,
    DesiredConfig, Dns, MountRequest, TemplateRequest, VolumeMount,
};
pub use digest::Digest;
pub use features::{FeatureRequest, Features, MountType, Privilege};
pub use mount::{MountOptions, MountPoint, MountSlot, MountSource};
pub use network::{IpConfig, NetworkInterface};
pub use params::ConfigParams;
pub use power::PowerState;
pub use size::DiskSize;
pub use types::{GuestRef, NodeName, PoolId, SlotIndex, StorageId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read desired configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse desired configuration: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid value for '{key}': {reason}")]
    InvalidField { key: String, reason: String },
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("invalid disk size '{0}'")]
    InvalidSize(String),
    #[error("invalid digest '{0}': expected 40 hex characters")]
    InvalidDigest(String),
    #[error("invalid slot '{0}'")]
    InvalidSlot(String),
}

impl SchemaError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Render a boolean the way the remote API expects it.
pub(crate) fn wire_bool(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Parse a `0`/`1` boolean token from a composite line.
pub(crate) fn parse_wire_bool(key: &str, value: &str) -> Result<bool, SchemaError> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SchemaError::invalid(key, format!("expected 0 or 1, got '{other}'"))),
    }
}

/// Split a `key=value,key=value` line into pairs. A bare leading token without
/// `=` is returned under `default_key`.
pub(crate) fn split_property_line<'a>(
    line: &'a str,
    default_key: Option<&'a str>,
) -> Result<Vec<(&'a str, &'a str)>, SchemaError> {
    let mut pairs = Vec::new();
    for (i, part) in line.split(',').enumerate() {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((k, v)) => pairs.push((k.trim(), v.trim())),
            None => match default_key {
                Some(key) if i == 0 => pairs.push((key, part)),
                _ => {
                    return Err(SchemaError::invalid(
                        default_key.unwrap_or("line"),
                        format!("unexpected token '{part}' in '{line}'"),
                    ))
                }
            },
        }
    }
    Ok(pairs)
}
