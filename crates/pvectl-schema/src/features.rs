//! Container feature flags.
//!
//! The remote API stores all flags in one composite `features` key. The flags
//! themselves are modelled as a fixed set of booleans; `render`/`parse` are the
//! only places that know the string form.

use crate::{parse_wire_bool, split_property_line, SchemaError};
use serde::{Deserialize, Serialize};

/// Filesystem types a privileged container may be allowed to mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Nfs,
    Cifs,
}

impl MountType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nfs => "nfs",
            Self::Cifs => "cifs",
        }
    }
}

/// Whether a container maps its root user to an unprivileged host user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Privileged,
    Unprivileged,
}

impl Privilege {
    pub fn from_unprivileged_flag(unprivileged: Option<bool>) -> Self {
        if unprivileged.unwrap_or(false) {
            Self::Unprivileged
        } else {
            Self::Privileged
        }
    }
}

/// Effective feature flags of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    pub nesting: bool,
    pub keyctl: bool,
    pub fuse: bool,
    pub mknod: bool,
    pub mount_nfs: bool,
    pub mount_cifs: bool,
}

impl Features {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn mount_types(&self) -> Vec<MountType> {
        let mut types = Vec::new();
        if self.mount_nfs {
            types.push(MountType::Nfs);
        }
        if self.mount_cifs {
            types.push(MountType::Cifs);
        }
        types
    }

    /// Drop flags the given privilege mode cannot carry: `keyctl` only exists
    /// for unprivileged containers, mount types only for privileged ones.
    #[must_use]
    pub fn restricted_to(mut self, privilege: Privilege) -> Self {
        match privilege {
            Privilege::Privileged => self.keyctl = false,
            Privilege::Unprivileged => {
                self.mount_nfs = false;
                self.mount_cifs = false;
            }
        }
        self
    }

    /// Render as `nesting=1,keyctl=1,fuse=1,mknod=1,mount=nfs;cifs`, omitting
    /// disabled flags. An empty set renders as an empty string.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        for (name, enabled) in [
            ("nesting", self.nesting),
            ("keyctl", self.keyctl),
            ("fuse", self.fuse),
            ("mknod", self.mknod),
        ] {
            if enabled {
                parts.push(format!("{name}=1"));
            }
        }
        let types = self.mount_types();
        if !types.is_empty() {
            let joined: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
            parts.push(format!("mount={}", joined.join(";")));
        }
        parts.join(",")
    }

    pub fn parse(line: &str) -> Result<Self, SchemaError> {
        let mut features = Self::default();
        for (key, value) in split_property_line(line, None)? {
            match key {
                "nesting" => features.nesting = parse_wire_bool("features.nesting", value)?,
                "keyctl" => features.keyctl = parse_wire_bool("features.keyctl", value)?,
                "fuse" => features.fuse = parse_wire_bool("features.fuse", value)?,
                "mknod" => features.mknod = parse_wire_bool("features.mknod", value)?,
                "mount" => {
                    for fs in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                        match fs {
                            "nfs" => features.mount_nfs = true,
                            "cifs" => features.mount_cifs = true,
                            other => {
                                return Err(SchemaError::invalid(
                                    "features.mount",
                                    format!("unsupported filesystem type '{other}'"),
                                ))
                            }
                        }
                    }
                }
                other => {
                    return Err(SchemaError::invalid(
                        "features",
                        format!("unknown feature '{other}'"),
                    ))
                }
            }
        }
        Ok(features)
    }
}

/// Requested feature flags; `None` leaves the current flag as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureRequest {
    #[serde(default)]
    pub nesting: Option<bool>,
    #[serde(default)]
    pub keyctl: Option<bool>,
    #[serde(default)]
    pub fuse: Option<bool>,
    #[serde(default)]
    pub mknod: Option<bool>,
    #[serde(default)]
    pub mount: Option<Vec<MountType>>,
}

impl FeatureRequest {
    /// Overlay the requested flags on `current` and restrict the result to
    /// what `privilege` allows.
    pub fn resolve(&self, current: Features, privilege: Privilege) -> Features {
        let mut out = current;
        if let Some(v) = self.nesting {
            out.nesting = v;
        }
        if let Some(v) = self.keyctl {
            out.keyctl = v;
        }
        if let Some(v) = self.fuse {
            out.fuse = v;
        }
        if let Some(v) = self.mknod {
            out.mknod = v;
        }
        if let Some(types) = &self.mount {
            out.mount_nfs = types.contains(&MountType::Nfs);
            out.mount_cifs = types.contains(&MountType::Cifs);
        }
        out.restricted_to(privilege)
    }

    /// Whether any flag that needs a privileged container is switched on.
    pub fn requests_mount_types(&self) -> bool {
        self.mount.as_ref().is_some_and(|t| !t.is_empty())
    }
}
