use crate::{GuestApi, RemoteError};
use pvectl_schema::{
    ConfigParams, Digest, DiskSize, GuestRef, MountPoint, MountSlot, MountSource, PoolId,
    PowerState, RawConfig, StorageId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Keys the mock applies immediately to a running guest. Anything else is
/// parked as a pending change until the next start or reboot.
const HOT_KEYS: &[&str] = &[
    "description",
    "tags",
    "protection",
    "onboot",
    "memory",
    "swap",
    "cores",
    "cpulimit",
    "cpuunits",
    "hostname",
    "nameserver",
    "searchdomain",
];

/// One call observed by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ReadConfig,
    ReadStatus,
    UpdateConfig {
        params: ConfigParams,
        digest: Option<Digest>,
    },
    Create {
        params: ConfigParams,
    },
    MoveMount {
        slot: MountSlot,
        storage: StorageId,
    },
    ResizeMount {
        slot: MountSlot,
        size: DiskSize,
    },
    Shutdown,
    Start,
    Reboot,
    PendingQuery,
    AssignPool(PoolId),
}

impl MockCall {
    fn op(&self) -> &'static str {
        match self {
            Self::ReadConfig => "read_config",
            Self::ReadStatus => "read_status",
            Self::UpdateConfig { .. } => "update_config",
            Self::Create { .. } => "create",
            Self::MoveMount { .. } => "move_mount",
            Self::ResizeMount { .. } => "resize_mount",
            Self::Shutdown => "shutdown",
            Self::Start => "start",
            Self::Reboot => "reboot",
            Self::PendingQuery => "pending",
            Self::AssignPool(_) => "assign_pool",
        }
    }

    /// Whether this call changes remote state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::ReadConfig | Self::ReadStatus | Self::PendingQuery)
    }
}

struct MockGuest {
    config: RawConfig,
    pending: ConfigParams,
    power: PowerState,
    pool: Option<PoolId>,
}

impl MockGuest {
    fn digest(&self) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(Value::Object(self.config.clone()).to_string().as_bytes());
        for (k, v) in self.pending.values() {
            hasher.update(format!("pending:{k}={v}").as_bytes());
        }
        for k in self.pending.deletes() {
            hasher.update(format!("pending-delete:{k}").as_bytes());
        }
        let hash = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash.as_bytes()[..20]);
        Digest::from_bytes(bytes)
    }

    fn apply_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (k, v) in pending.values() {
            self.config.insert(k.clone(), Value::String(v.clone()));
        }
        for k in pending.deletes() {
            self.config.remove(k);
        }
    }
}

#[derive(Default)]
struct MockState {
    guests: HashMap<u32, MockGuest>,
    calls: Vec<MockCall>,
    fail_on: Option<String>,
    next_disk: u32,
}

impl MockState {
    fn guest(&mut self, guest: &GuestRef) -> Result<&mut MockGuest, RemoteError> {
        self.guests
            .get_mut(&guest.vmid)
            .ok_or_else(|| RemoteError::NotFound(format!("guest {guest}")))
    }

    /// Turn `<storage>:<GiB>` allocation syntax on a mount key into a named
    /// volume, the way the remote side does when it allocates.
    fn materialize(&mut self, vmid: u32, key: &str, value: &str) -> Result<String, RemoteError> {
        if key != "rootfs" && !key.starts_with("mp") {
            return Ok(value.to_owned());
        }
        let mut mount = MountPoint::parse(key, value)
            .map_err(|e| RemoteError::Http(format!("invalid {key}: {e}")))?;
        let MountSource::Volume { volume } = &mount.source else {
            return Ok(value.to_owned());
        };
        let Some((storage, rest)) = volume.split_once(':') else {
            return Ok(value.to_owned());
        };
        let Ok(size) = rest.parse::<DiskSize>() else {
            return Ok(value.to_owned());
        };
        self.next_disk += 1;
        mount.source = MountSource::Volume {
            volume: format!("{storage}:vm-{vmid}-disk-{}", self.next_disk),
        };
        mount.size = Some(size);
        Ok(mount.render())
    }
}

/// In-memory `GuestApi` for tests.
///
/// Models the remote behaviors the reconciler depends on: the digest changes on
/// every mutation and is checked on update, non-hot changes to a running guest
/// become pending until restart, moves allocate a new volume id and require a
/// stopped guest, resizes never shrink.
pub struct MockGuestApi {
    state: Mutex<MockState>,
}

impl Default for MockGuestApi {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_disk: 100,
                ..MockState::default()
            }),
        }
    }
}

impl MockGuestApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, RemoteError> {
        self.state
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))
    }

    /// Record the call and fail it if a failure was injected for its operation.
    fn record(state: &mut MockState, call: MockCall) -> Result<(), RemoteError> {
        let op = call.op();
        state.calls.push(call);
        if state.fail_on.as_deref() == Some(op) {
            return Err(RemoteError::Http(format!("injected failure in {op}")));
        }
        Ok(())
    }

    /// Seed a guest. Any `digest` key in `config` is ignored; the mock derives
    /// its own.
    pub fn insert_guest(&self, guest: &GuestRef, mut config: RawConfig, power: PowerState) {
        config.remove("digest");
        if let Ok(mut state) = self.state.lock() {
            state.guests.insert(
                guest.vmid,
                MockGuest {
                    config,
                    pending: ConfigParams::new(),
                    power,
                    pool: None,
                },
            );
        }
    }

    /// Stored configuration without the digest.
    pub fn config(&self, vmid: u32) -> Option<RawConfig> {
        let state = self.state.lock().ok()?;
        state.guests.get(&vmid).map(|g| g.config.clone())
    }

    pub fn power(&self, vmid: u32) -> Option<PowerState> {
        let state = self.state.lock().ok()?;
        state.guests.get(&vmid).map(|g| g.power)
    }

    pub fn pool(&self, vmid: u32) -> Option<PoolId> {
        let state = self.state.lock().ok()?;
        state.guests.get(&vmid).and_then(|g| g.pool.clone())
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.clear();
        }
    }

    /// Make every later call of `op` (e.g. `"resize_mount"`) fail.
    pub fn fail_on(&self, op: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_on = Some(op.to_owned());
        }
    }
}

impl GuestApi for MockGuestApi {
    fn read_config(&self, guest: &GuestRef) -> Result<RawConfig, RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, MockCall::ReadConfig)?;
        let g = state.guest(guest)?;
        let mut config = g.config.clone();
        config.insert("digest".to_owned(), Value::String(g.digest().to_hex()));
        Ok(config)
    }

    fn read_status(&self, guest: &GuestRef) -> Result<PowerState, RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, MockCall::ReadStatus)?;
        Ok(state.guest(guest)?.power)
    }

    fn update_config(
        &self,
        guest: &GuestRef,
        params: &ConfigParams,
        digest: Option<&Digest>,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(
            &mut state,
            MockCall::UpdateConfig {
                params: params.clone(),
                digest: digest.copied(),
            },
        )?;

        let current = state.guest(guest)?.digest();
        if let Some(expected) = digest {
            if *expected != current {
                return Err(RemoteError::Http(format!(
                    "HTTP 500: configuration file has been modified by another user \
                     (expected {expected}, found {current})"
                )));
            }
        }

        let mut values = Vec::new();
        for (k, v) in params.values() {
            values.push((k.clone(), state.materialize(guest.vmid, k, v)?));
        }

        let g = state.guest(guest)?;
        let running = g.power == PowerState::Running;
        for (k, v) in values {
            if running && !HOT_KEYS.contains(&k.as_str()) {
                g.pending.set(k, v);
            } else {
                g.config.insert(k, Value::String(v));
            }
        }
        for k in params.deletes() {
            if running && !HOT_KEYS.contains(&k.as_str()) {
                g.pending.delete(k.clone());
            } else {
                g.config.remove(k);
            }
        }
        Ok(())
    }

    fn create(&self, guest: &GuestRef, params: &ConfigParams) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(
            &mut state,
            MockCall::Create {
                params: params.clone(),
            },
        )?;
        if state.guests.contains_key(&guest.vmid) {
            return Err(RemoteError::Http(format!(
                "HTTP 500: CT {} already exists",
                guest.vmid
            )));
        }

        let mut config = RawConfig::new();
        let mut pool = None;
        for (k, v) in params.values() {
            match k.as_str() {
                "ostemplate" | "vmid" => {}
                "pool" => pool = Some(PoolId::new(v.clone())),
                _ => {
                    let value = state.materialize(guest.vmid, k, v)?;
                    config.insert(k.clone(), Value::String(value));
                }
            }
        }
        state.guests.insert(
            guest.vmid,
            MockGuest {
                config,
                pending: ConfigParams::new(),
                power: PowerState::Stopped,
                pool,
            },
        );
        Ok(())
    }

    fn move_mount(
        &self,
        guest: &GuestRef,
        slot: MountSlot,
        target: &StorageId,
        _delete_original: bool,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(
            &mut state,
            MockCall::MoveMount {
                slot,
                storage: target.clone(),
            },
        )?;
        state.next_disk += 1;
        let disk = state.next_disk;

        let g = state.guest(guest)?;
        if g.power != PowerState::Stopped {
            return Err(RemoteError::Http(
                "HTTP 500: cannot move volumes of a running container".to_owned(),
            ));
        }
        let key = slot.key();
        let line = g
            .config
            .get(&key)
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::NotFound(format!("{key} of guest {guest}")))?;
        let mut mount = MountPoint::parse(&key, line)
            .map_err(|e| RemoteError::Http(format!("invalid {key}: {e}")))?;
        if mount.source.is_bind() {
            return Err(RemoteError::Http(format!(
                "HTTP 500: {key} is a bind mount and cannot be moved"
            )));
        }
        mount.source = MountSource::Volume {
            volume: format!("{target}:vm-{}-disk-{disk}", guest.vmid),
        };
        g.config.insert(key, Value::String(mount.render()));
        Ok(())
    }

    fn resize_mount(
        &self,
        guest: &GuestRef,
        slot: MountSlot,
        size: DiskSize,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, MockCall::ResizeMount { slot, size })?;

        let g = state.guest(guest)?;
        let key = slot.key();
        let line = g
            .config
            .get(&key)
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::NotFound(format!("{key} of guest {guest}")))?;
        let mut mount = MountPoint::parse(&key, line)
            .map_err(|e| RemoteError::Http(format!("invalid {key}: {e}")))?;
        if mount.size.is_some_and(|current| size < current) {
            return Err(RemoteError::Http(format!(
                "HTTP 500: shrinking {key} is not supported"
            )));
        }
        mount.size = Some(size);
        g.config.insert(key, Value::String(mount.render()));
        Ok(())
    }

    fn shutdown(&self, guest: &GuestRef) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, MockCall::Shutdown)?;
        let g = state.guest(guest)?;
        if g.power == PowerState::Stopped {
            return Err(RemoteError::Http(format!(
                "HTTP 500: CT {} not running",
                guest.vmid
            )));
        }
        g.power = PowerState::Stopped;
        Ok(())
    }

    fn start(&self, guest: &GuestRef) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, MockCall::Start)?;
        let g = state.guest(guest)?;
        if g.power == PowerState::Running {
            return Err(RemoteError::Http(format!(
                "HTTP 500: CT {} already running",
                guest.vmid
            )));
        }
        g.apply_pending();
        g.power = PowerState::Running;
        Ok(())
    }

    fn reboot(&self, guest: &GuestRef) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, MockCall::Reboot)?;
        let g = state.guest(guest)?;
        if g.power == PowerState::Stopped {
            return Err(RemoteError::Http(format!(
                "HTTP 500: CT {} not running",
                guest.vmid
            )));
        }
        g.apply_pending();
        g.power = PowerState::Running;
        Ok(())
    }

    fn has_pending_changes(&self, guest: &GuestRef) -> Result<bool, RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, MockCall::PendingQuery)?;
        Ok(!state.guest(guest)?.pending.is_empty())
    }

    fn assign_pool(&self, guest: &GuestRef, pool: &PoolId) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, MockCall::AssignPool(pool.clone()))?;
        state.guest(guest)?.pool = Some(pool.clone());
        Ok(())
    }
}
