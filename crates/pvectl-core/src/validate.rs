use crate::CoreError;
use pvectl_schema::{
    CurrentConfig, DesiredConfig, IpConfig, MountRequest, NetworkInterface, PowerState, Privilege,
};

const MIN_MEMORY_MIB: u64 = 16;
const MAX_CORES: u32 = 8192;
const MAX_CPU_LIMIT: f64 = 8192.0;
const MAX_CPU_UNITS: u32 = 500_000;

/// Check a desired record before anything is diffed or sent.
///
/// With `current == None` the creation rules apply: a boot mount with storage
/// and size and an OS template are mandatory. With a snapshot the update rules
/// apply. Every violation is collected and reported together.
pub fn validate(desired: &DesiredConfig, current: Option<&CurrentConfig>) -> Result<(), CoreError> {
    let mut errors = Vec::new();

    let privilege = match current {
        Some(c) => c.privilege(),
        None => Privilege::from_unprivileged_flag(desired.unprivileged),
    };

    check_scalars(desired, &mut errors);
    check_features(desired, privilege, &mut errors);
    for (slot, iface) in &desired.networks {
        let existing = current.and_then(|c| c.networks.get(&slot.0));
        check_network(&format!("net{slot}"), iface, existing, &mut errors);
    }

    match current {
        None => check_create(desired, &mut errors),
        Some(current) => check_update(desired, current, &mut errors),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation(errors))
    }
}

fn check_scalars(desired: &DesiredConfig, errors: &mut Vec<String>) {
    if let Some(memory) = desired.memory {
        if memory < MIN_MEMORY_MIB {
            errors.push(format!("memory must be at least {MIN_MEMORY_MIB} MiB, got {memory}"));
        }
    }
    if let Some(hostname) = desired.hostname.as_deref().filter(|h| !h.is_empty()) {
        if !valid_hostname(hostname) {
            errors.push(format!("invalid hostname '{hostname}'"));
        }
    }
    if let Some(tags) = &desired.tags {
        for tag in tags {
            if !valid_tag(tag) {
                errors.push(format!("invalid tag '{tag}'"));
            }
        }
    }
    if let Some(cpu) = &desired.cpu {
        if cpu.cores.is_some_and(|c| c > MAX_CORES) {
            errors.push(format!("cpu.cores must be at most {MAX_CORES}"));
        }
        if let Some(limit) = cpu.limit {
            if !(0.0..=MAX_CPU_LIMIT).contains(&limit) {
                errors.push(format!("cpu.limit must be between 0 and {MAX_CPU_LIMIT}"));
            }
        }
        if cpu.units.is_some_and(|u| u > MAX_CPU_UNITS) {
            errors.push(format!("cpu.units must be at most {MAX_CPU_UNITS}"));
        }
    }
    if let Some(servers) = desired.dns.as_ref().and_then(|d| d.servers.as_ref()) {
        for server in servers {
            if server.parse::<std::net::IpAddr>().is_err() {
                errors.push(format!("dns server '{server}' is not an IP address"));
            }
        }
    }
    if desired.power_state == Some(PowerState::Unknown) {
        errors.push("power_state must be 'running' or 'stopped'".to_owned());
    }
}

fn check_features(desired: &DesiredConfig, privilege: Privilege, errors: &mut Vec<String>) {
    let Some(features) = &desired.features else {
        return;
    };
    match privilege {
        Privilege::Privileged if features.keyctl == Some(true) => {
            errors.push("features.keyctl is only available for unprivileged containers".to_owned());
        }
        Privilege::Unprivileged if features.requests_mount_types() => {
            errors.push("features.mount is only available for privileged containers".to_owned());
        }
        _ => {}
    }
}

fn check_network(
    key: &str,
    iface: &NetworkInterface,
    existing: Option<&NetworkInterface>,
    errors: &mut Vec<String>,
) {
    if iface.delete {
        return;
    }
    if existing.is_none() {
        if iface.name.as_deref().is_none_or(str::is_empty) {
            errors.push(format!("{key}: a new interface needs a name"));
        }
        if iface.bridge.as_deref().is_none_or(str::is_empty) {
            errors.push(format!("{key}: a new interface needs a bridge"));
        }
    }
    if let Some(tag) = iface.vlan_tag {
        if !(1..=4094).contains(&tag) {
            errors.push(format!("{key}: vlan_tag must be between 1 and 4094"));
        }
    }
    if let Some(trunks) = &iface.trunks {
        if trunks.iter().any(|t| !(1..=4094).contains(t)) {
            errors.push(format!("{key}: trunks must be between 1 and 4094"));
        }
    }
    if iface.mtu.is_some_and(|m| m < 64) {
        errors.push(format!("{key}: mtu must be at least 64"));
    }
    if iface.rate_limit.is_some_and(|r| r.is_nan() || r < 0.0) {
        errors.push(format!("{key}: rate_limit must not be negative"));
    }
    if let Some(mac) = &iface.mac_address {
        if !valid_mac(mac) {
            errors.push(format!("{key}: invalid mac_address '{mac}'"));
        }
    }
    if iface.ipv4 == Some(IpConfig::Slaac) {
        errors.push(format!("{key}: slaac is only available for ipv6"));
    }
}

fn check_create(desired: &DesiredConfig, errors: &mut Vec<String>) {
    match &desired.boot_mount {
        Some(boot) => {
            if boot.storage.is_none() {
                errors.push("boot_mount.storage is required on creation".to_owned());
            }
            if boot.size.is_none_or(|s| s.kibibytes() == 0) {
                errors.push("boot_mount.size is required on creation".to_owned());
            }
        }
        None => errors.push("boot_mount is required on creation".to_owned()),
    }
    if desired.template.is_none() {
        errors.push("template is required on creation".to_owned());
    }
    for (slot, mount) in &desired.mounts {
        check_mount_shape(&format!("mp{slot}"), mount, errors);
        if !mount.detach {
            check_new_mount(&format!("mp{slot}"), mount, errors);
        }
    }
}

fn check_update(desired: &DesiredConfig, current: &CurrentConfig, errors: &mut Vec<String>) {
    if let Some(unprivileged) = desired.unprivileged {
        if unprivileged != current.unprivileged.unwrap_or(false) {
            errors.push("unprivileged cannot be changed on an existing container".to_owned());
        }
    }

    if let (Some(boot), Some(existing)) = (&desired.boot_mount, &current.boot_mount) {
        if let (Some(want), Some(have)) = (boot.size, existing.size) {
            if want < have {
                errors.push(format!("rootfs: cannot shrink from {have} to {want}"));
            }
        }
    }

    for (slot, mount) in &desired.mounts {
        let key = format!("mp{slot}");
        check_mount_shape(&key, mount, errors);
        if mount.detach {
            continue;
        }
        let Some(existing) = current.mounts.get(&slot.0) else {
            check_new_mount(&key, mount, errors);
            continue;
        };
        let Some(volume) = &mount.volume else {
            continue;
        };
        if existing.source.is_bind() {
            if volume.storage.is_none() || volume.size.is_none() {
                errors.push(format!(
                    "{key}: replacing a bind mount with a volume needs storage and size"
                ));
            }
        } else if let (Some(want), Some(have)) = (volume.size, existing.size) {
            if want < have {
                errors.push(format!("{key}: cannot shrink from {have} to {want}"));
            }
        }
    }
}

/// Invariants that hold for a mount request in every mode.
fn check_mount_shape(key: &str, mount: &MountRequest, errors: &mut Vec<String>) {
    if mount.bind.is_some() && mount.volume.is_some() {
        errors.push(format!("{key}: bind and volume are mutually exclusive"));
    }
    if mount.detach && (mount.bind.is_some() || mount.volume.is_some()) {
        errors.push(format!("{key}: detach cannot be combined with bind or volume"));
    }
    if let Some(bind) = &mount.bind {
        if !bind.host_path.starts_with('/') {
            errors.push(format!("{key}: bind host_path must be absolute"));
        }
    }
    if let Some(path) = &mount.path {
        if !path.starts_with('/') {
            errors.push(format!("{key}: path must be absolute"));
        }
    }
}

/// A mount on an empty slot must fully describe what goes there.
fn check_new_mount(key: &str, mount: &MountRequest, errors: &mut Vec<String>) {
    if mount.path.is_none() {
        errors.push(format!("{key}: path is required for a new mount"));
    }
    match (&mount.bind, &mount.volume) {
        (None, None) => errors.push(format!("{key}: a new mount needs bind or volume")),
        (None, Some(volume)) => {
            if volume.storage.is_none() || volume.size.is_none_or(|s| s.kibibytes() == 0) {
                errors.push(format!("{key}: a new volume needs storage and size"));
            }
        }
        _ => {}
    }
}

fn valid_hostname(name: &str) -> bool {
    name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.'))
}

fn valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvectl_schema::{
        parse_desired_str, BindMount, DiskSize, MountRequest, RawConfig, SlotIndex, VolumeMount,
    };
    use serde_json::json;

    fn current() -> CurrentConfig {
        let raw: RawConfig = json!({
            "digest": "0123456789abcdef0123456789abcdef01234567",
            "unprivileged": 1,
            "rootfs": "local-lvm:vm-100-disk-0,size=8G",
            "mp0": "local-lvm:vm-100-disk-1,mp=/data,size=4G",
            "mp1": "/tank,mp=/tank",
            "net0": "name=eth0,bridge=vmbr0,ip=dhcp,type=veth",
        })
        .as_object()
        .unwrap()
        .clone();
        CurrentConfig::decode(&raw).unwrap()
    }

    fn create_base() -> DesiredConfig {
        parse_desired_str(
            r#"
[boot_mount]
storage = "local-lvm"
size = "8G"

[template]
file_id = "local:vztmpl/debian-12.tar.zst"
"#,
        )
        .unwrap()
    }

    fn errors(result: Result<(), CoreError>) -> Vec<String> {
        match result {
            Err(CoreError::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    fn both_variants() -> MountRequest {
        MountRequest {
            path: Some("/data".to_owned()),
            bind: Some(BindMount {
                host_path: "/srv".to_owned(),
            }),
            volume: Some(VolumeMount {
                storage: Some("local-lvm".into()),
                size: Some(DiskSize::from_gibibytes(1)),
            }),
            ..MountRequest::default()
        }
    }

    #[test]
    fn create_requires_boot_mount_and_template() {
        let errs = errors(validate(&DesiredConfig::default(), None));
        assert!(errs.iter().any(|e| e.contains("boot_mount is required")));
        assert!(errs.iter().any(|e| e.contains("template is required")));

        assert!(validate(&create_base(), None).is_ok());
    }

    #[test]
    fn update_does_not_require_creation_fields() {
        assert!(validate(&DesiredConfig::default(), Some(&current())).is_ok());
    }

    #[test]
    fn bind_and_volume_are_exclusive_in_both_modes() {
        let mut desired = create_base();
        desired.mounts.insert(SlotIndex(2), both_variants());
        let errs = errors(validate(&desired, None));
        assert!(errs.iter().any(|e| e.contains("mutually exclusive")));

        let mut desired = DesiredConfig::default();
        desired.mounts.insert(SlotIndex(0), both_variants());
        let errs = errors(validate(&desired, Some(&current())));
        assert!(errs.iter().any(|e| e.contains("mutually exclusive")));
    }

    #[test]
    fn reports_all_violations_at_once() {
        let desired = parse_desired_str(
            r#"
memory = 8
tags = ["ok", "bad tag"]
[cpu]
cores = 9000
"#,
        )
        .unwrap();
        let errs = errors(validate(&desired, Some(&current())));
        assert_eq!(errs.len(), 3);
    }

    #[test]
    fn feature_privilege_mismatch() {
        // current() is unprivileged
        let desired = parse_desired_str("[features]\nmount = [\"nfs\"]").unwrap();
        assert!(validate(&desired, Some(&current())).is_err());

        let desired = parse_desired_str("[features]\nkeyctl = true").unwrap();
        assert!(validate(&desired, Some(&current())).is_ok());

        let mut create = create_base();
        create.features = desired.features;
        create.unprivileged = Some(false);
        assert!(validate(&create, None).is_err());
    }

    #[test]
    fn privilege_mode_is_fixed_after_creation() {
        let desired = DesiredConfig {
            unprivileged: Some(false),
            ..DesiredConfig::default()
        };
        let errs = errors(validate(&desired, Some(&current())));
        assert!(errs[0].contains("unprivileged"));
    }

    #[test]
    fn shrinking_a_volume_is_rejected() {
        let desired = parse_desired_str(
            "[mounts.mp0]\nvolume = { size = \"2G\" }\n[boot_mount]\nsize = \"4G\"",
        )
        .unwrap();
        let errs = errors(validate(&desired, Some(&current())));
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn replacing_bind_with_volume_needs_storage_and_size() {
        let desired = parse_desired_str("[mounts.mp1]\nvolume = { storage = \"local-lvm\" }").unwrap();
        assert!(validate(&desired, Some(&current())).is_err());

        let desired = parse_desired_str(
            "[mounts.mp1]\nvolume = { storage = \"local-lvm\", size = \"1G\" }",
        )
        .unwrap();
        assert!(validate(&desired, Some(&current())).is_ok());
    }

    #[test]
    fn new_slots_must_be_complete() {
        let desired = parse_desired_str("[mounts.mp5]\nread_only = true").unwrap();
        let errs = errors(validate(&desired, Some(&current())));
        assert!(errs.iter().any(|e| e.contains("path is required")));
        assert!(errs.iter().any(|e| e.contains("needs bind or volume")));

        let desired = parse_desired_str("[networks.net3]\nfirewall = true").unwrap();
        let errs = errors(validate(&desired, Some(&current())));
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn detach_of_absent_slot_is_allowed() {
        let desired = parse_desired_str("[mounts.mp9]\ndetach = true").unwrap();
        assert!(validate(&desired, Some(&current())).is_ok());
    }

    #[test]
    fn network_ranges_and_formats() {
        let desired = parse_desired_str(
            r#"
[networks.net0]
vlan_tag = 5000
mtu = 10
mac_address = "bc:24:11:zz:00:01"
ipv4 = { mode = "slaac" }
"#,
        )
        .unwrap();
        let errs = errors(validate(&desired, Some(&current())));
        assert_eq!(errs.len(), 4);
    }

    #[test]
    fn hostname_and_tag_rules() {
        assert!(valid_hostname("web-01.example.com"));
        assert!(!valid_hostname("-web"));
        assert!(!valid_hostname("web_01"));
        assert!(valid_tag("prod"));
        assert!(valid_tag("_x.y+z"));
        assert!(!valid_tag("-lead"));
        assert!(valid_mac("BC:24:11:aa:00:01"));
        assert!(!valid_mac("BC24:11:aa:00:01"));
    }
}
