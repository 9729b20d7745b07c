//! Per-domain field differs.
//!
//! Every differ follows one rule: an absent desired field changes nothing; a
//! present field that differs from the current value is set; a present field
//! equal to its domain's empty sentinel deletes the key if it is currently set.

use crate::mounts::diff_mounts;
use crate::network::{diff_network, NetworkChange};
use pvectl_schema::{
    ConfigParams, CpuLimits, CurrentConfig, DesiredConfig, Dns, FeatureRequest, Features,
    Privilege,
};

/// Complete parameter delta of `desired` against `current`, across every
/// domain including mount and network slots.
pub fn diff_config(desired: &DesiredConfig, current: &CurrentConfig) -> ConfigParams {
    let mut params = ConfigParams::new();
    params.extend(diff_identity(desired, current));
    params.extend(diff_tags(desired.tags.as_deref(), current.tags.as_deref()));
    params.extend(diff_memory(desired, current));
    params.extend(diff_cpu(desired.cpu.as_ref(), &current.cpu));
    params.extend(diff_features(
        desired.features.as_ref(),
        current.features,
        current.privilege(),
    ));
    params.extend(diff_dns(desired.dns.as_ref(), &current.dns));
    params.extend(diff_mounts(desired, current));
    for (slot, iface) in &desired.networks {
        let key = format!("net{slot}");
        match diff_network(iface, current.networks.get(&slot.0)) {
            NetworkChange::Set(line) => params.set(key, line),
            NetworkChange::Delete => params.delete(key),
            NetworkChange::Unchanged => {}
        }
    }
    params
}

/// Apply the set/delete/leave rule to a single key.
fn diff_field<T, E, R>(
    params: &mut ConfigParams,
    key: &str,
    desired: Option<&T>,
    current: Option<&T>,
    is_empty: E,
    render: R,
) where
    T: PartialEq + ?Sized,
    E: Fn(&T) -> bool,
    R: Fn(&T) -> String,
{
    let Some(want) = desired else {
        return;
    };
    if is_empty(want) {
        if current.is_some_and(|have| !is_empty(have)) {
            params.delete(key);
        }
        return;
    }
    if current != Some(want) {
        params.set(key, render(want));
    }
}

fn never_empty<T: ?Sized>(_: &T) -> bool {
    false
}

fn wire_flag(value: &bool) -> String {
    if *value { "1" } else { "0" }.to_owned()
}

/// Hostname, description, protection and start-on-boot.
pub fn diff_identity(desired: &DesiredConfig, current: &CurrentConfig) -> ConfigParams {
    let mut params = ConfigParams::new();
    diff_field(
        &mut params,
        "hostname",
        desired.hostname.as_deref(),
        current.hostname.as_deref(),
        str::is_empty,
        str::to_owned,
    );
    diff_field(
        &mut params,
        "description",
        desired.description.as_deref(),
        current.description.as_deref(),
        str::is_empty,
        str::to_owned,
    );
    diff_field(
        &mut params,
        "protection",
        desired.protection.as_ref(),
        current.protection.as_ref(),
        |v: &bool| !*v,
        wire_flag,
    );
    diff_field(
        &mut params,
        "onboot",
        desired.start_on_boot.as_ref(),
        current.start_on_boot.as_ref(),
        |v: &bool| !*v,
        wire_flag,
    );
    params
}

/// Tags are compared as a sorted set and rendered `;`-joined.
pub fn diff_tags(desired: Option<&[String]>, current: Option<&[String]>) -> ConfigParams {
    let mut params = ConfigParams::new();
    let normalize = |tags: &[String]| {
        let mut out: Vec<String> = tags
            .iter()
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .collect();
        out.sort();
        out.dedup();
        out
    };
    let want = desired.map(normalize);
    let have = current.map(normalize);
    diff_field(
        &mut params,
        "tags",
        want.as_ref(),
        have.as_ref(),
        Vec::is_empty,
        |tags: &Vec<String>| tags.join(";"),
    );
    params
}

/// Memory and swap have no delete sentinel: zero swap is a real setting.
pub fn diff_memory(desired: &DesiredConfig, current: &CurrentConfig) -> ConfigParams {
    let mut params = ConfigParams::new();
    diff_field(
        &mut params,
        "memory",
        desired.memory.as_ref(),
        current.memory.as_ref(),
        never_empty,
        u64::to_string,
    );
    diff_field(
        &mut params,
        "swap",
        desired.swap.as_ref(),
        current.swap.as_ref(),
        never_empty,
        u64::to_string,
    );
    params
}

pub fn diff_cpu(desired: Option<&CpuLimits>, current: &CpuLimits) -> ConfigParams {
    let mut params = ConfigParams::new();
    let Some(desired) = desired else {
        return params;
    };
    diff_field(
        &mut params,
        "arch",
        desired.architecture.as_ref(),
        current.architecture.as_ref(),
        never_empty,
        ToString::to_string,
    );
    diff_field(
        &mut params,
        "cores",
        desired.cores.as_ref(),
        current.cores.as_ref(),
        |v: &u32| *v == 0,
        u32::to_string,
    );
    diff_field(
        &mut params,
        "cpulimit",
        desired.limit.as_ref(),
        current.limit.as_ref(),
        |v: &f64| *v == 0.0,
        f64::to_string,
    );
    diff_field(
        &mut params,
        "cpuunits",
        desired.units.as_ref(),
        current.units.as_ref(),
        |v: &u32| *v == 0,
        u32::to_string,
    );
    params
}

/// Feature flags share one composite key. The request is overlaid on the
/// current flags and restricted to what `privilege` allows; an empty result
/// deletes the key.
pub fn diff_features(
    desired: Option<&FeatureRequest>,
    current: Option<Features>,
    privilege: Privilege,
) -> ConfigParams {
    let mut params = ConfigParams::new();
    let Some(request) = desired else {
        return params;
    };
    let have = current.unwrap_or_default();
    let want = request.resolve(have, privilege);
    if want == have {
        return params;
    }
    if want.is_empty() {
        if current.is_some() {
            params.delete("features");
        }
    } else {
        params.set("features", want.render());
    }
    params
}

pub fn diff_dns(desired: Option<&Dns>, current: &Dns) -> ConfigParams {
    let mut params = ConfigParams::new();
    let Some(desired) = desired else {
        return params;
    };
    diff_field(
        &mut params,
        "searchdomain",
        desired.domain.as_deref(),
        current.domain.as_deref(),
        str::is_empty,
        str::to_owned,
    );
    diff_field(
        &mut params,
        "nameserver",
        desired.servers.as_ref(),
        current.servers.as_ref(),
        Vec::is_empty,
        |servers: &Vec<String>| servers.join(" "),
    );
    params
}
