//! Mount change planning.
//!
//! Storage moves and resizes are separate remote calls issued before the
//! configuration update. Everything else about a mount slot (path, flags,
//! options, replacing its occupant) travels in the ordinary parameter diff,
//! which keeps the current volume and size so the two never conflict.

use pvectl_schema::{
    BootMountRequest, ConfigParams, CurrentConfig, DesiredConfig, DiskSize, MountPoint,
    MountRequest, MountSlot, MountSource, StorageId,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountMove {
    pub slot: MountSlot,
    pub storage: StorageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountResize {
    pub slot: MountSlot,
    pub size: DiskSize,
}

/// Remote volume operations a desired record needs, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountPlan {
    pub moves: Vec<MountMove>,
    pub resizes: Vec<MountResize>,
    /// The guest must be powered off before the plan (or the parameter update
    /// that replaces or detaches a mount) is applied.
    pub requires_off_state: bool,
}

impl MountPlan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty() && self.resizes.is_empty() && !self.requires_off_state
    }

    /// Whether any remote volume operation will run.
    pub fn has_volume_ops(&self) -> bool {
        !self.moves.is_empty() || !self.resizes.is_empty()
    }

    fn plan_volume(
        &mut self,
        slot: MountSlot,
        storage: Option<&StorageId>,
        size: Option<DiskSize>,
        current: &MountPoint,
    ) {
        if let Some(target) = storage {
            if current.storage() != Some(target.as_str()) {
                self.moves.push(MountMove {
                    slot,
                    storage: target.clone(),
                });
                self.requires_off_state = true;
            }
        }
        if let Some(size) = size {
            if current.size.is_none_or(|have| size > have) {
                self.resizes.push(MountResize { slot, size });
            }
        }
    }
}

/// Classify every mount slot the desired record touches against the snapshot.
pub fn plan_mounts(desired: &DesiredConfig, current: &CurrentConfig) -> MountPlan {
    let mut plan = MountPlan::default();

    if let (Some(request), Some(existing)) = (&desired.boot_mount, &current.boot_mount) {
        if !existing.source.is_bind() {
            plan.plan_volume(
                MountSlot::Boot,
                request.storage.as_ref(),
                request.size,
                existing,
            );
        }
    }

    for (slot, request) in &desired.mounts {
        let Some(existing) = current.mounts.get(&slot.0) else {
            continue;
        };
        if request.detach {
            plan.requires_off_state = true;
            continue;
        }
        match (&request.bind, &request.volume, existing.source.is_bind()) {
            (Some(_), _, false) | (None, Some(_), true) => plan.requires_off_state = true,
            (None, Some(volume), false) => plan.plan_volume(
                MountSlot::Data(slot.0),
                volume.storage.as_ref(),
                volume.size,
                existing,
            ),
            _ => {}
        }
    }

    tracing::debug!(
        "mount plan: {} move(s), {} resize(s), off state required: {}",
        plan.moves.len(),
        plan.resizes.len(),
        plan.requires_off_state
    );
    plan
}

/// Parameter delta for `rootfs` and every `mpN` slot in the desired record.
pub fn diff_mounts(desired: &DesiredConfig, current: &CurrentConfig) -> ConfigParams {
    let mut params = ConfigParams::new();

    if let Some(request) = &desired.boot_mount {
        let line = match &current.boot_mount {
            Some(existing) => {
                let mut mount = existing.clone();
                overlay_boot_flags(&mut mount, request);
                changed_line(&mount, Some(existing))
            }
            None => match (&request.storage, request.size) {
                (Some(storage), Some(size)) => {
                    let mut mount = MountPoint::new(MountSource::Allocate {
                        storage: storage.clone(),
                        size,
                    });
                    overlay_boot_flags(&mut mount, request);
                    Some(mount.render())
                }
                _ => None,
            },
        };
        if let Some(line) = line {
            params.set("rootfs", line);
        }
    }

    for (slot, request) in &desired.mounts {
        let key = format!("mp{slot}");
        let existing = current.mounts.get(&slot.0);
        if request.detach {
            if existing.is_some() {
                params.delete(key);
            }
            continue;
        }
        let mount = match existing {
            Some(existing) => recompose(request, existing),
            None => compose_new(request),
        };
        if let Some(line) = mount.and_then(|m| changed_line(&m, existing)) {
            params.set(key, line);
        }
    }

    params
}

fn changed_line(mount: &MountPoint, existing: Option<&MountPoint>) -> Option<String> {
    let line = mount.render();
    match existing {
        Some(existing) if existing.render() == line => None,
        _ => Some(line),
    }
}

fn overlay_boot_flags(mount: &mut MountPoint, request: &BootMountRequest) {
    overlay(&mut mount.acl, request.acl);
    overlay(&mut mount.quota, request.quota);
    overlay(&mut mount.replicate, request.replicate);
    overlay(&mut mount.read_only, request.read_only);
    if request.mount_options.is_some() {
        mount.mount_options = request.mount_options;
    }
}

fn overlay_flags(mount: &mut MountPoint, request: &MountRequest) {
    if let Some(path) = &request.path {
        mount.path = Some(path.clone());
    }
    overlay(&mut mount.acl, request.acl);
    overlay(&mut mount.backup, request.backup);
    overlay(&mut mount.quota, request.quota);
    overlay(&mut mount.replicate, request.replicate);
    overlay(&mut mount.read_only, request.read_only);
    overlay(&mut mount.shared, request.shared);
    if request.mount_options.is_some() {
        mount.mount_options = request.mount_options;
    }
}

fn overlay(slot: &mut Option<bool>, value: Option<bool>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Mount for an empty slot. `None` when the request does not say what goes
/// there; validation rejects that before any diff runs.
fn compose_new(request: &MountRequest) -> Option<MountPoint> {
    let source = match (&request.bind, &request.volume) {
        (Some(bind), _) => MountSource::Bind {
            host_path: bind.host_path.clone(),
        },
        (None, Some(volume)) => MountSource::Allocate {
            storage: volume.storage.clone()?,
            size: volume.size?,
        },
        (None, None) => return None,
    };
    let mut mount = MountPoint::new(source);
    overlay_flags(&mut mount, request);
    Some(mount)
}

/// Occupied slot: keep the current volume and size unless the variant
/// changes, in which case the slot is rebuilt around the new source.
fn recompose(request: &MountRequest, existing: &MountPoint) -> Option<MountPoint> {
    let mut mount = existing.clone();
    match (&request.bind, &request.volume) {
        (Some(bind), _) => {
            mount.source = MountSource::Bind {
                host_path: bind.host_path.clone(),
            };
            mount.size = None;
        }
        (None, Some(volume)) if existing.source.is_bind() => {
            mount.source = MountSource::Allocate {
                storage: volume.storage.clone()?,
                size: volume.size?,
            };
            mount.size = None;
        }
        _ => {}
    }
    overlay_flags(&mut mount, request);
    Some(mount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvectl_schema::{parse_desired_str, RawConfig};
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> CurrentConfig {
        let mut raw: RawConfig = value.as_object().unwrap().clone();
        raw.insert(
            "digest".to_owned(),
            json!("0123456789abcdef0123456789abcdef01234567"),
        );
        CurrentConfig::decode(&raw).unwrap()
    }

    fn current() -> CurrentConfig {
        snapshot(json!({
            "rootfs": "local-ext4:vm-100-disk-0,size=1G",
            "mp0": "local-ext4:vm-100-disk-1,mp=/data,backup=1,size=1G",
            "mp1": "/tank/share,mp=/share",
        }))
    }

    #[test]
    fn storage_change_is_one_move() {
        let desired = parse_desired_str(
            "[mounts.mp0]\nvolume = { storage = \"local-zfs\", size = \"1G\" }",
        )
        .unwrap();
        let plan = plan_mounts(&desired, &current());
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].slot, MountSlot::Data(0));
        assert_eq!(plan.moves[0].storage, "local-zfs");
        assert!(plan.resizes.is_empty());
        assert!(plan.requires_off_state);
    }

    #[test]
    fn size_growth_is_one_resize_without_off_state() {
        let desired = parse_desired_str(
            "[mounts.mp0]\nvolume = { storage = \"local-ext4\", size = \"2G\" }",
        )
        .unwrap();
        let plan = plan_mounts(&desired, &current());
        assert!(plan.moves.is_empty());
        assert_eq!(
            plan.resizes,
            vec![MountResize {
                slot: MountSlot::Data(0),
                size: DiskSize::from_kibibytes(2_097_152),
            }]
        );
        assert!(!plan.requires_off_state);
    }

    #[test]
    fn storage_and_size_change_move_then_resize() {
        let desired = parse_desired_str(
            "[boot_mount]\nstorage = \"local-zfs\"\nsize = \"2G\"",
        )
        .unwrap();
        let plan = plan_mounts(&desired, &current());
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.resizes.len(), 1);
        assert_eq!(plan.resizes[0].slot, MountSlot::Boot);
        assert!(plan.requires_off_state);
    }

    #[test]
    fn volume_ops_do_not_leak_into_parameters() {
        let desired = parse_desired_str(
            "[boot_mount]\nstorage = \"local-zfs\"\nsize = \"2G\"",
        )
        .unwrap();
        assert!(diff_mounts(&desired, &current()).is_empty());
    }

    #[test]
    fn flag_edit_is_in_place() {
        let desired = parse_desired_str("[mounts.mp0]\nbackup = false\nread_only = true").unwrap();
        assert!(plan_mounts(&desired, &current()).is_empty());
        let params = diff_mounts(&desired, &current());
        assert_eq!(
            params.get("mp0"),
            Some("local-ext4:vm-100-disk-1,mp=/data,backup=0,ro=1,size=1G")
        );
    }

    #[test]
    fn detach_forces_off_state_only_when_occupied() {
        let desired = parse_desired_str("[mounts.mp1]\ndetach = true").unwrap();
        let plan = plan_mounts(&desired, &current());
        assert!(plan.requires_off_state);
        assert!(diff_mounts(&desired, &current()).is_deleted("mp1"));

        let desired = parse_desired_str("[mounts.mp7]\ndetach = true").unwrap();
        assert!(plan_mounts(&desired, &current()).is_empty());
        assert!(diff_mounts(&desired, &current()).is_empty());
    }

    #[test]
    fn variant_switch_recreates_slot() {
        let desired = parse_desired_str(
            "[mounts.mp1]\nvolume = { storage = \"local-zfs\", size = \"4G\" }",
        )
        .unwrap();
        let plan = plan_mounts(&desired, &current());
        assert!(plan.requires_off_state);
        assert!(plan.moves.is_empty());
        assert_eq!(
            diff_mounts(&desired, &current()).get("mp1"),
            Some("local-zfs:4,mp=/share")
        );
    }

    #[test]
    fn new_slot_allocates_in_gibibytes() {
        let desired = parse_desired_str(
            "[mounts.mp2]\npath = \"/scratch\"\nvolume = { storage = \"local-zfs\", size = \"896M\" }",
        )
        .unwrap();
        assert!(plan_mounts(&desired, &current()).is_empty());
        assert_eq!(
            diff_mounts(&desired, &current()).get("mp2"),
            Some("local-zfs:0.875,mp=/scratch")
        );
    }

    #[test]
    fn matching_mounts_are_idempotent() {
        let desired = parse_desired_str(
            r#"
[boot_mount]
storage = "local-ext4"
size = "1G"
[mounts.mp0]
path = "/data"
backup = true
volume = { storage = "local-ext4", size = "1G" }
[mounts.mp1]
path = "/share"
bind = { host_path = "/tank/share" }
"#,
        )
        .unwrap();
        assert!(plan_mounts(&desired, &current()).is_empty());
        assert!(diff_mounts(&desired, &current()).is_empty());
    }

    #[test]
    fn boot_mount_on_create_uses_allocation_syntax() {
        let desired = parse_desired_str(
            "[boot_mount]\nstorage = \"local-lvm\"\nsize = \"8G\"\nacl = true",
        )
        .unwrap();
        let params = diff_mounts(&desired, &CurrentConfig::default());
        assert_eq!(params.get("rootfs"), Some("local-lvm:8,acl=1"));
    }
}
