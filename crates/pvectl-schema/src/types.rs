//! Newtype wrappers for remote identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Cluster node name hosting a guest (e.g. `pve1`).
    NodeName
);

string_newtype!(
    /// Storage backend identifier (e.g. `local-lvm`).
    StorageId
);

string_newtype!(
    /// Resource pool identifier.
    PoolId
);

/// A guest addressed by its node and numeric VMID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestRef {
    pub node: NodeName,
    pub vmid: u32,
}

impl GuestRef {
    pub fn new(node: impl Into<NodeName>, vmid: u32) -> Self {
        Self {
            node: node.into(),
            vmid,
        }
    }
}

impl fmt::Display for GuestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.vmid)
    }
}

/// Index of a mount or network slot.
///
/// Accepts `"3"`, `"mp3"` or `"net3"` when deserialized, so TOML tables can be
/// keyed either way. Serializes as the bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotIndex(pub u8);

impl FromStr for SlotIndex {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .trim_start_matches("mp")
            .trim_start_matches("net");
        digits
            .parse::<u8>()
            .map(SlotIndex)
            .map_err(|_| SchemaError::InvalidSlot(s.to_owned()))
    }
}

impl TryFrom<String> for SlotIndex {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SlotIndex> for String {
    fn from(value: SlotIndex) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_id_display_and_compare() {
        let id = StorageId::new("local-lvm");
        assert_eq!(id.to_string(), "local-lvm");
        assert_eq!(id, "local-lvm");
    }

    #[test]
    fn storage_id_serde_is_transparent() {
        let id = StorageId::new("local-zfs");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"local-zfs\"");
        let back: StorageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn guest_ref_display() {
        assert_eq!(GuestRef::new("pve1", 101).to_string(), "pve1/101");
    }

    #[test]
    fn slot_index_accepts_prefixes() {
        assert_eq!("3".parse::<SlotIndex>().unwrap(), SlotIndex(3));
        assert_eq!("mp7".parse::<SlotIndex>().unwrap(), SlotIndex(7));
        assert_eq!("net0".parse::<SlotIndex>().unwrap(), SlotIndex(0));
        assert!("disk1".parse::<SlotIndex>().is_err());
        assert!("300".parse::<SlotIndex>().is_err());
    }
}
