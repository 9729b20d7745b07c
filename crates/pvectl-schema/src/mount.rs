//! Mount slots and their single-line wire form.
//!
//! A mount line looks like
//! `local-lvm:vm-100-disk-1,mp=/data,acl=1,backup=0,mountoptions=noatime;nodev,size=8G`.
//! The first token is either a storage volume, a host path (bind mount), or, when
//! asking the remote side to allocate a new volume, `<storage>:<GiB>`.

use crate::size::DiskSize;
use crate::types::StorageId;
use crate::{parse_wire_bool, split_property_line, wire_bool, SchemaError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// POSIX-style mount options carried by a mount line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountOptions {
    pub noatime: bool,
    pub nodev: bool,
    pub noexec: bool,
    pub nosuid: bool,
    pub lazytime: bool,
}

impl MountOptions {
    fn flags(&self) -> [(&'static str, bool); 5] {
        [
            ("noatime", self.noatime),
            ("nodev", self.nodev),
            ("noexec", self.noexec),
            ("nosuid", self.nosuid),
            ("lazytime", self.lazytime),
        ]
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `noatime;nodev` in fixed order.
    pub fn render(&self) -> String {
        self.flags()
            .iter()
            .filter(|(_, on)| *on)
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn parse(value: &str) -> Result<Self, SchemaError> {
        let mut out = Self::default();
        for opt in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match opt {
                "noatime" => out.noatime = true,
                "nodev" => out.nodev = true,
                "noexec" => out.noexec = true,
                "nosuid" => out.nosuid = true,
                "lazytime" => out.lazytime = true,
                other => {
                    return Err(SchemaError::invalid(
                        "mountoptions",
                        format!("unknown mount option '{other}'"),
                    ))
                }
            }
        }
        Ok(out)
    }
}

/// Addressable mount slot: the boot mount (`rootfs`) or a data slot (`mpN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MountSlot {
    Boot,
    Data(u8),
}

impl MountSlot {
    pub fn key(self) -> String {
        match self {
            Self::Boot => "rootfs".to_owned(),
            Self::Data(n) => format!("mp{n}"),
        }
    }
}

impl fmt::Display for MountSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// What occupies a mount slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MountSource {
    /// Host directory passed through to the guest.
    Bind { host_path: String },
    /// Existing volume on a storage backend (`storage:volume-name`).
    Volume { volume: String },
    /// New volume for the remote side to allocate.
    Allocate { storage: StorageId, size: DiskSize },
}

impl MountSource {
    pub fn is_bind(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }

    /// Storage backend holding the volume, if this is a volume mount.
    pub fn storage(&self) -> Option<&str> {
        match self {
            Self::Bind { .. } => None,
            Self::Volume { volume } => volume.split_once(':').map(|(storage, _)| storage),
            Self::Allocate { storage, .. } => Some(storage.as_str()),
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Bind { host_path } => host_path.clone(),
            Self::Volume { volume } => volume.clone(),
            Self::Allocate { storage, size } => {
                format!("{storage}:{}", size.to_gibibyte_string())
            }
        }
    }

    fn parse(token: &str) -> Self {
        if token.starts_with('/') {
            Self::Bind {
                host_path: token.to_owned(),
            }
        } else {
            Self::Volume {
                volume: token.to_owned(),
            }
        }
    }
}

/// A decoded mount line. Optional flags are `None` when absent from the line,
/// which the remote side treats as "default" rather than "off".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub source: MountSource,
    pub path: Option<String>,
    pub size: Option<DiskSize>,
    pub acl: Option<bool>,
    pub backup: Option<bool>,
    pub quota: Option<bool>,
    pub replicate: Option<bool>,
    pub read_only: Option<bool>,
    pub shared: Option<bool>,
    pub mount_options: Option<MountOptions>,
}

impl MountPoint {
    pub fn new(source: MountSource) -> Self {
        Self {
            source,
            path: None,
            size: None,
            acl: None,
            backup: None,
            quota: None,
            replicate: None,
            read_only: None,
            shared: None,
            mount_options: None,
        }
    }

    pub fn storage(&self) -> Option<&str> {
        self.source.storage()
    }

    pub fn render(&self) -> String {
        let mut parts = vec![self.source.render()];
        if let Some(path) = &self.path {
            parts.push(format!("mp={path}"));
        }
        let flags = [
            ("acl", self.acl),
            ("backup", self.backup),
            ("quota", self.quota),
            ("replicate", self.replicate),
            ("ro", self.read_only),
            ("shared", self.shared),
        ];
        for (key, value) in flags {
            if let Some(v) = value {
                parts.push(format!("{key}={}", wire_bool(v)));
            }
        }
        if let Some(opts) = self.mount_options.filter(|o| !o.is_empty()) {
            parts.push(format!("mountoptions={}", opts.render()));
        }
        if !matches!(self.source, MountSource::Allocate { .. }) {
            if let Some(size) = self.size {
                parts.push(format!("size={}", size.to_wire()));
            }
        }
        parts.join(",")
    }

    pub fn parse(key: &str, line: &str) -> Result<Self, SchemaError> {
        let mut source = None;
        let mut mount = Self::new(MountSource::Bind {
            host_path: String::new(),
        });
        for (k, v) in split_property_line(line, Some("volume"))? {
            let flag = |name: &str| parse_wire_bool(&format!("{key}.{name}"), v);
            match k {
                "volume" => source = Some(MountSource::parse(v)),
                "mp" => mount.path = Some(v.to_owned()),
                "size" => mount.size = Some(v.parse()?),
                "acl" => mount.acl = Some(flag("acl")?),
                "backup" => mount.backup = Some(flag("backup")?),
                "quota" => mount.quota = Some(flag("quota")?),
                "replicate" => mount.replicate = Some(flag("replicate")?),
                "ro" => mount.read_only = Some(flag("ro")?),
                "shared" => mount.shared = Some(flag("shared")?),
                "mountoptions" => mount.mount_options = Some(MountOptions::parse(v)?),
                other => {
                    return Err(SchemaError::invalid(
                        key,
                        format!("unknown mount property '{other}'"),
                    ))
                }
            }
        }
        mount.source = source.ok_or_else(|| SchemaError::invalid(key, "missing volume"))?;
        Ok(mount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_options_roundtrip_in_fixed_order() {
        let opts = MountOptions::parse("nosuid;noatime").unwrap();
        assert_eq!(opts.render(), "noatime;nosuid");
    }

    #[test]
    fn mount_options_reject_unknown() {
        assert!(MountOptions::parse("noatime;sync").is_err());
    }

    #[test]
    fn slot_keys() {
        assert_eq!(MountSlot::Boot.key(), "rootfs");
        assert_eq!(MountSlot::Data(4).to_string(), "mp4");
    }

    #[test]
    fn parses_volume_line() {
        let mp = MountPoint::parse(
            "mp0",
            "local-lvm:vm-100-disk-1,mp=/data,acl=1,backup=0,mountoptions=noatime,size=8G",
        )
        .unwrap();
        assert_eq!(mp.storage(), Some("local-lvm"));
        assert_eq!(mp.path.as_deref(), Some("/data"));
        assert_eq!(mp.size, Some(DiskSize::from_gibibytes(8)));
        assert_eq!(mp.acl, Some(true));
        assert_eq!(mp.backup, Some(false));
        assert_eq!(mp.quota, None);
        assert!(mp.mount_options.unwrap().noatime);
    }

    #[test]
    fn parses_bind_line() {
        let mp = MountPoint::parse("mp1", "/srv/share,mp=/mnt/share,ro=1").unwrap();
        assert!(mp.source.is_bind());
        assert_eq!(mp.storage(), None);
        assert_eq!(mp.read_only, Some(true));
    }

    #[test]
    fn parses_explicit_volume_key() {
        let mp = MountPoint::parse("rootfs", "volume=local:100/vm-100-disk-0.raw,size=4G").unwrap();
        assert_eq!(mp.storage(), Some("local"));
    }

    #[test]
    fn render_keeps_explicit_false() {
        let mut mp = MountPoint::new(MountSource::Volume {
            volume: "local-lvm:vm-100-disk-1".to_owned(),
        });
        mp.path = Some("/data".to_owned());
        mp.backup = Some(false);
        mp.size = Some(DiskSize::from_gibibytes(1));
        assert_eq!(mp.render(), "local-lvm:vm-100-disk-1,mp=/data,backup=0,size=1G");
    }

    #[test]
    fn allocate_renders_gibibytes_without_size_key() {
        let mut mp = MountPoint::new(MountSource::Allocate {
            storage: StorageId::new("local-zfs"),
            size: DiskSize::from_kibibytes(917_504),
        });
        mp.path = Some("/scratch".to_owned());
        assert_eq!(mp.render(), "local-zfs:0.875,mp=/scratch");
    }

    #[test]
    fn parse_rejects_unknown_property() {
        assert!(MountPoint::parse("mp0", "local:vol,mp=/x,turbo=1").is_err());
        assert!(MountPoint::parse("mp0", "mp=/x").is_err());
    }
}
