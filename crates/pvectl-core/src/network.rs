use pvectl_schema::NetworkInterface;

/// Outcome of diffing one network slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkChange {
    /// Replace the slot with this complete interface line.
    Set(String),
    Delete,
    Unchanged,
}

/// Compose the full interface line for a slot.
///
/// The remote side replaces an interface wholesale, so every field the desired
/// descriptor omits is inherited from the current one. IP configurations are
/// taken as a whole: a desired `ipv4` replaces the current address and gateway
/// together.
pub fn diff_network(
    desired: &NetworkInterface,
    current: Option<&NetworkInterface>,
) -> NetworkChange {
    if desired.delete {
        return match current {
            Some(_) => NetworkChange::Delete,
            None => NetworkChange::Unchanged,
        };
    }

    let base = current.cloned().unwrap_or_default();
    let merged = NetworkInterface {
        name: desired.name.clone().or(base.name),
        bridge: desired.bridge.clone().or(base.bridge),
        enabled: desired.enabled.or(base.enabled),
        firewall: desired.firewall.or(base.firewall),
        vlan_tag: desired.vlan_tag.or(base.vlan_tag),
        trunks: desired.trunks.clone().or(base.trunks),
        mac_address: merge_mac(
            desired.mac_address.as_deref(),
            base.mac_address.as_deref(),
        ),
        mtu: desired.mtu.or(base.mtu),
        rate_limit: desired.rate_limit.or(base.rate_limit),
        ipv4: desired.ipv4.clone().or(base.ipv4),
        ipv6: desired.ipv6.clone().or(base.ipv6),
        delete: false,
    };

    let line = merged.render();
    match current {
        Some(existing) if existing.render() == line => NetworkChange::Unchanged,
        _ => NetworkChange::Set(line),
    }
}

/// Keep the stored casing when the address is unchanged; re-sending the same
/// MAC with different casing reconnects the interface.
fn merge_mac(desired: Option<&str>, current: Option<&str>) -> Option<String> {
    match (desired, current) {
        (Some(want), Some(have)) if want.eq_ignore_ascii_case(have) => Some(have.to_owned()),
        (Some(want), _) => Some(want.to_ascii_uppercase()),
        (None, have) => have.map(str::to_owned),
    }
}
