//! Network interface descriptors and their `netN` line.
//!
//! The remote API replaces a whole interface line on every write, so a
//! descriptor always renders every field it carries in one canonical order:
//! `name,bridge,firewall,gw,gw6,hwaddr,ip,ip6,link_down,mtu,rate,tag,trunks,type`.

use crate::{parse_wire_bool, split_property_line, SchemaError};
use serde::{Deserialize, Serialize};

/// Address configuration for one IP family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase", deny_unknown_fields)]
pub enum IpConfig {
    Static {
        address: String,
        #[serde(default)]
        gateway: Option<String>,
    },
    Dhcp,
    /// Stateless autoconfiguration; IPv6 only.
    Slaac,
    Manual,
}

impl IpConfig {
    fn address_token(&self) -> &str {
        match self {
            Self::Static { address, .. } => address,
            Self::Dhcp => "dhcp",
            Self::Slaac => "auto",
            Self::Manual => "manual",
        }
    }

    fn gateway(&self) -> Option<&str> {
        match self {
            Self::Static { gateway, .. } => gateway.as_deref(),
            _ => None,
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "dhcp" => Self::Dhcp,
            "auto" => Self::Slaac,
            "manual" => Self::Manual,
            address => Self::Static {
                address: address.to_owned(),
                gateway: None,
            },
        }
    }
}

/// Network interface descriptor. Every field is optional: in a desired record an
/// absent field inherits the current value; in a decoded snapshot it means the
/// line does not carry it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkInterface {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bridge: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub firewall: Option<bool>,
    #[serde(default)]
    pub vlan_tag: Option<u16>,
    #[serde(default)]
    pub trunks: Option<Vec<u16>>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub mtu: Option<u16>,
    /// Rate limit in MB/s.
    #[serde(default)]
    pub rate_limit: Option<f64>,
    #[serde(default)]
    pub ipv4: Option<IpConfig>,
    #[serde(default)]
    pub ipv6: Option<IpConfig>,
    /// Remove whatever interface occupies this slot.
    #[serde(default)]
    pub delete: bool,
}

impl NetworkInterface {
    /// Flags at their remote default (firewall off, link up) are omitted, so an
    /// explicit `firewall=0` or `link_down=0` does not survive a re-render.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(format!("name={name}"));
        }
        if let Some(bridge) = &self.bridge {
            parts.push(format!("bridge={bridge}"));
        }
        if self.firewall == Some(true) {
            parts.push("firewall=1".to_owned());
        }
        if let Some(gw) = self.ipv4.as_ref().and_then(IpConfig::gateway) {
            parts.push(format!("gw={gw}"));
        }
        if let Some(gw) = self.ipv6.as_ref().and_then(IpConfig::gateway) {
            parts.push(format!("gw6={gw}"));
        }
        if let Some(mac) = &self.mac_address {
            parts.push(format!("hwaddr={mac}"));
        }
        if let Some(ip) = &self.ipv4 {
            parts.push(format!("ip={}", ip.address_token()));
        }
        if let Some(ip) = &self.ipv6 {
            parts.push(format!("ip6={}", ip.address_token()));
        }
        if self.enabled == Some(false) {
            parts.push("link_down=1".to_owned());
        }
        if let Some(mtu) = self.mtu {
            parts.push(format!("mtu={mtu}"));
        }
        if let Some(rate) = self.rate_limit.filter(|r| *r > 0.0) {
            parts.push(format!("rate={rate}"));
        }
        if let Some(tag) = self.vlan_tag {
            parts.push(format!("tag={tag}"));
        }
        if let Some(trunks) = self.trunks.as_ref().filter(|t| !t.is_empty()) {
            let joined: Vec<String> = trunks.iter().map(u16::to_string).collect();
            parts.push(format!("trunks={}", joined.join(";")));
        }
        parts.push("type=veth".to_owned());
        parts.join(",")
    }

    pub fn parse(key: &str, line: &str) -> Result<Self, SchemaError> {
        let mut iface = Self::default();
        let mut gw = None;
        let mut gw6 = None;
        let field = |name: &str| format!("{key}.{name}");
        for (k, v) in split_property_line(line, None)? {
            match k {
                "name" => iface.name = Some(v.to_owned()),
                "bridge" => iface.bridge = Some(v.to_owned()),
                "firewall" => iface.firewall = Some(parse_wire_bool(&field(k), v)?),
                "link_down" => iface.enabled = Some(!parse_wire_bool(&field(k), v)?),
                "hwaddr" => iface.mac_address = Some(v.to_owned()),
                "ip" => iface.ipv4 = Some(IpConfig::parse(v)),
                "ip6" => iface.ipv6 = Some(IpConfig::parse(v)),
                "gw" => gw = Some(v.to_owned()),
                "gw6" => gw6 = Some(v.to_owned()),
                "mtu" => {
                    iface.mtu = Some(
                        v.parse()
                            .map_err(|_| SchemaError::invalid(&field(k), format!("bad mtu '{v}'")))?,
                    );
                }
                "rate" => {
                    iface.rate_limit = Some(
                        v.parse()
                            .map_err(|_| SchemaError::invalid(&field(k), format!("bad rate '{v}'")))?,
                    );
                }
                "tag" => {
                    iface.vlan_tag = Some(
                        v.parse()
                            .map_err(|_| SchemaError::invalid(&field(k), format!("bad tag '{v}'")))?,
                    );
                }
                "trunks" => {
                    let mut trunks = Vec::new();
                    for t in v.split(';').filter(|s| !s.is_empty()) {
                        trunks.push(t.parse().map_err(|_| {
                            SchemaError::invalid(&field(k), format!("bad trunk '{t}'"))
                        })?);
                    }
                    iface.trunks = Some(trunks);
                }
                // Only veth exists for containers; host-managed keys are ignored.
                "type" | "hwaddr_auto" => {}
                other => {
                    return Err(SchemaError::invalid(
                        key,
                        format!("unknown interface property '{other}'"),
                    ))
                }
            }
        }
        attach_gateway(&mut iface.ipv4, gw);
        attach_gateway(&mut iface.ipv6, gw6);
        Ok(iface)
    }
}

fn attach_gateway(ip: &mut Option<IpConfig>, gw: Option<String>) {
    if let (Some(IpConfig::Static { gateway, .. }), Some(gw)) = (ip.as_mut(), gw) {
        *gateway = Some(gw);
    }
}
