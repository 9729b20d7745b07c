use crate::desired::{Architecture, CpuLimits, Dns};
use crate::digest::Digest;
use crate::features::{Features, Privilege};
use crate::mount::MountPoint;
use crate::network::NetworkInterface;
use crate::SchemaError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Untyped configuration map as returned by the remote API. A key is present
/// if and only if the setting is currently set.
pub type RawConfig = serde_json::Map<String, Value>;

/// Typed snapshot of a container's remote configuration at one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurrentConfig {
    pub digest: Digest,
    pub hostname: Option<String>,
    pub description: Option<String>,
    pub protection: Option<bool>,
    pub start_on_boot: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub memory: Option<u64>,
    pub swap: Option<u64>,
    pub cpu: CpuLimits,
    pub features: Option<Features>,
    pub dns: Dns,
    pub unprivileged: Option<bool>,
    pub os_type: Option<String>,
    pub boot_mount: Option<MountPoint>,
    pub mounts: BTreeMap<u8, MountPoint>,
    pub networks: BTreeMap<u8, NetworkInterface>,
}

impl CurrentConfig {
    pub fn privilege(&self) -> Privilege {
        Privilege::from_unprivileged_flag(self.unprivileged)
    }

    /// Decode the raw field map. Fails on missing digest and on any known key
    /// whose value does not have the expected shape; unknown keys are ignored.
    pub fn decode(raw: &RawConfig) -> Result<Self, SchemaError> {
        let digest: Digest = get_str(raw, "digest")?
            .ok_or_else(|| SchemaError::MissingField("digest".to_owned()))?
            .parse()?;

        let mut mounts = BTreeMap::new();
        let mut networks = BTreeMap::new();
        for (key, value) in raw {
            if let Some(n) = slot_number(key, "mp") {
                let line = expect_str(key, value)?;
                mounts.insert(n, MountPoint::parse(key, line)?);
            } else if let Some(n) = slot_number(key, "net") {
                let line = expect_str(key, value)?;
                networks.insert(n, NetworkInterface::parse(key, line)?);
            }
        }

        let boot_mount = match get_str(raw, "rootfs")? {
            Some(line) => Some(MountPoint::parse("rootfs", line)?),
            None => None,
        };
        let features = match get_str(raw, "features")? {
            Some(line) => Some(Features::parse(line)?),
            None => None,
        };
        let architecture = match get_str(raw, "arch")? {
            Some(a) => Some(Architecture::parse(a)?),
            None => None,
        };
        let tags = get_str(raw, "tags")?.map(|t| {
            t.split([';', ',', ' '])
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        });
        let servers = get_str(raw, "nameserver")?.map(|s| {
            s.split_whitespace().map(str::to_owned).collect::<Vec<_>>()
        });

        Ok(Self {
            digest,
            hostname: get_str(raw, "hostname")?.map(str::to_owned),
            description: get_str(raw, "description")?.map(str::to_owned),
            protection: get_bool(raw, "protection")?,
            start_on_boot: get_bool(raw, "onboot")?,
            tags,
            memory: get_u64(raw, "memory")?,
            swap: get_u64(raw, "swap")?,
            cpu: CpuLimits {
                architecture,
                cores: get_u64(raw, "cores")?
                    .map(|v| u32::try_from(v).map_err(|_| SchemaError::invalid("cores", "out of range")))
                    .transpose()?,
                limit: get_f64(raw, "cpulimit")?,
                units: get_u64(raw, "cpuunits")?
                    .map(|v| {
                        u32::try_from(v).map_err(|_| SchemaError::invalid("cpuunits", "out of range"))
                    })
                    .transpose()?,
            },
            features,
            dns: Dns {
                domain: get_str(raw, "searchdomain")?.map(str::to_owned),
                servers,
            },
            unprivileged: get_bool(raw, "unprivileged")?,
            os_type: get_str(raw, "ostype")?.map(str::to_owned),
            boot_mount,
            mounts,
            networks,
        })
    }
}

fn slot_number(key: &str, prefix: &str) -> Option<u8> {
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

fn expect_str<'a>(key: &str, value: &'a Value) -> Result<&'a str, SchemaError> {
    value
        .as_str()
        .ok_or_else(|| SchemaError::invalid(key, format!("expected string, got {value}")))
}

fn get_str<'a>(raw: &'a RawConfig, key: &str) -> Result<Option<&'a str>, SchemaError> {
    raw.get(key).map(|v| expect_str(key, v)).transpose()
}

fn get_u64(raw: &RawConfig, key: &str) -> Result<Option<u64>, SchemaError> {
    let Some(value) = raw.get(key) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| SchemaError::invalid(key, format!("expected unsigned integer, got {value}")))
}

fn get_f64(raw: &RawConfig, key: &str) -> Result<Option<f64>, SchemaError> {
    let Some(value) = raw.get(key) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| SchemaError::invalid(key, format!("expected number, got {value}")))
}

fn get_bool(raw: &RawConfig, key: &str) -> Result<Option<bool>, SchemaError> {
    let Some(value) = raw.get(key) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim() {
            "0" => Some(false),
            "1" => Some(true),
            _ => None,
        },
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| SchemaError::invalid(key, format!("expected 0 or 1, got {value}")))
}
