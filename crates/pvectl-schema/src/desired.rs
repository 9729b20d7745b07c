use crate::features::FeatureRequest;
use crate::mount::MountOptions;
use crate::network::NetworkInterface;
use crate::power::PowerState;
use crate::size::DiskSize;
use crate::types::{PoolId, SlotIndex, StorageId};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Sparse description of how a container should be configured.
///
/// Every field is optional: `None` leaves the remote value untouched. For most
/// scalars an "empty" value (`""`, `0`, `false`, `[]`) asks for the key to be
/// deleted rather than set; see the differs in `pvectl-core` for which fields
/// have such a sentinel.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredConfig {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub protection: Option<bool>,
    #[serde(default)]
    pub start_on_boot: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Dedicated memory in MiB.
    #[serde(default)]
    pub memory: Option<u64>,
    /// Swap in MiB.
    #[serde(default)]
    pub swap: Option<u64>,
    #[serde(default)]
    pub cpu: Option<CpuLimits>,
    #[serde(default)]
    pub features: Option<FeatureRequest>,
    #[serde(default)]
    pub dns: Option<Dns>,
    #[serde(default)]
    pub boot_mount: Option<BootMountRequest>,
    /// Creation only.
    #[serde(default)]
    pub template: Option<TemplateRequest>,
    /// Creation only; cannot change afterwards.
    #[serde(default)]
    pub unprivileged: Option<bool>,
    #[serde(default)]
    pub power_state: Option<PowerState>,
    #[serde(default)]
    pub pool: Option<PoolId>,
    #[serde(default)]
    pub mounts: BTreeMap<SlotIndex, MountRequest>,
    #[serde(default)]
    pub networks: BTreeMap<SlotIndex, NetworkInterface>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Amd64,
    I386,
    Arm64,
    Armhf,
    Riscv32,
    Riscv64,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::I386 => "i386",
            Self::Arm64 => "arm64",
            Self::Armhf => "armhf",
            Self::Riscv32 => "riscv32",
            Self::Riscv64 => "riscv64",
        }
    }

    pub fn parse(value: &str) -> Result<Self, SchemaError> {
        match value {
            "amd64" => Ok(Self::Amd64),
            "i386" => Ok(Self::I386),
            "arm64" => Ok(Self::Arm64),
            "armhf" => Ok(Self::Armhf),
            "riscv32" => Ok(Self::Riscv32),
            "riscv64" => Ok(Self::Riscv64),
            other => Err(SchemaError::invalid(
                "arch",
                format!("unknown architecture '{other}'"),
            )),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU settings. Each field maps to its own remote key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CpuLimits {
    #[serde(default)]
    pub architecture: Option<Architecture>,
    #[serde(default)]
    pub cores: Option<u32>,
    /// Fraction of host CPU time, `0` meaning unlimited.
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub units: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Dns {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub servers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BootMountRequest {
    #[serde(default)]
    pub storage: Option<StorageId>,
    #[serde(default)]
    pub size: Option<DiskSize>,
    #[serde(default)]
    pub acl: Option<bool>,
    #[serde(default)]
    pub quota: Option<bool>,
    #[serde(default)]
    pub replicate: Option<bool>,
    #[serde(default)]
    pub read_only: Option<bool>,
    #[serde(default)]
    pub mount_options: Option<MountOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BindMount {
    pub host_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeMount {
    #[serde(default)]
    pub storage: Option<StorageId>,
    #[serde(default)]
    pub size: Option<DiskSize>,
}

/// Desired state of one mount slot. `bind` and `volume` are mutually
/// exclusive; leaving both out keeps whatever occupies the slot and only edits
/// its flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MountRequest {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub bind: Option<BindMount>,
    #[serde(default)]
    pub volume: Option<VolumeMount>,
    #[serde(default)]
    pub acl: Option<bool>,
    #[serde(default)]
    pub backup: Option<bool>,
    #[serde(default)]
    pub quota: Option<bool>,
    #[serde(default)]
    pub replicate: Option<bool>,
    #[serde(default)]
    pub read_only: Option<bool>,
    #[serde(default)]
    pub shared: Option<bool>,
    #[serde(default)]
    pub mount_options: Option<MountOptions>,
    /// Remove whatever occupies this slot.
    #[serde(default)]
    pub detach: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateRequest {
    /// Volume id of the OS template archive, e.g. `local:vztmpl/debian-12.tar.zst`.
    pub file_id: String,
    #[serde(default)]
    pub os_type: Option<String>,
}

pub fn parse_desired_str(input: &str) -> Result<DesiredConfig, SchemaError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_desired_file(path: impl AsRef<Path>) -> Result<DesiredConfig, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_desired_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::IpConfig;

    #[test]
    fn parses_full_record() {
        let input = r#"
hostname = "web01"
description = "front end"
protection = true
tags = ["prod", "web"]
memory = 2048
swap = 512
power_state = "running"
pool = "web"
unprivileged = true

[cpu]
cores = 2
limit = 1.5
architecture = "amd64"

[features]
nesting = true
keyctl = true

[dns]
domain = "example.com"
servers = ["1.1.1.1", "9.9.9.9"]

[boot_mount]
storage = "local-lvm"
size = "8G"
mount_options = { noatime = true }

[template]
file_id = "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst"
os_type = "debian"

[mounts.mp0]
path = "/data"
volume = { storage = "local-lvm", size = "16G" }
backup = true

[mounts.1]
path = "/srv"
bind = { host_path = "/tank/srv" }

[networks.net0]
name = "eth0"
bridge = "vmbr0"
ipv4 = { mode = "dhcp" }
"#;
        let cfg = parse_desired_str(input).unwrap();
        assert_eq!(cfg.hostname.as_deref(), Some("web01"));
        assert_eq!(cfg.power_state, Some(PowerState::Running));
        assert_eq!(cfg.cpu.as_ref().unwrap().cores, Some(2));
        assert_eq!(
            cfg.boot_mount.as_ref().unwrap().size,
            Some(DiskSize::from_gibibytes(8))
        );
        assert_eq!(cfg.mounts.len(), 2);
        assert!(cfg.mounts[&SlotIndex(1)].bind.is_some());
        assert_eq!(
            cfg.networks[&SlotIndex(0)].ipv4,
            Some(IpConfig::Dhcp)
        );
    }

    #[test]
    fn empty_record_is_all_none() {
        let cfg = parse_desired_str("").unwrap();
        assert_eq!(cfg, DesiredConfig::default());
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(parse_desired_str("hostnme = \"typo\"").is_err());
        assert!(parse_desired_str("[cpu]\nsockets = 2").is_err());
    }

    #[test]
    fn rejects_bad_slot_keys() {
        assert!(parse_desired_str("[mounts.disk0]\npath = \"/x\"").is_err());
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest.toml");
        fs::write(&path, "memory = 1024\n").unwrap();
        let cfg = parse_desired_file(&path).unwrap();
        assert_eq!(cfg.memory, Some(1024));
    }

    #[test]
    fn architecture_parse_roundtrip() {
        assert_eq!(Architecture::parse("arm64").unwrap(), Architecture::Arm64);
        assert_eq!(Architecture::Riscv64.to_string(), "riscv64");
        assert!(Architecture::parse("sparc").is_err());
    }
}
