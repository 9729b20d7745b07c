use crate::diff::diff_config;
use crate::mounts::{plan_mounts, MountPlan};
use crate::validate::validate;
use crate::CoreError;
use pvectl_remote::{GuestApi, RemoteError};
use pvectl_schema::{
    ConfigParams, CurrentConfig, DesiredConfig, DiskSize, GuestRef, MountSlot, PoolId, PowerState,
    StorageId,
};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Permissions the caller grants the reconciler.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Allow shutting down or rebooting a running guest when a change needs it.
    pub allow_restart: bool,
    /// Remove the source volume after a storage move.
    pub delete_original_on_move: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            allow_restart: false,
            delete_original_on_move: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// The desired power state is stopped.
    Requested,
    /// A storage move, detach or mount replacement needs the guest off.
    DiskSafety,
}

/// One remote mutation, issued or planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Create { params: ConfigParams },
    Shutdown { reason: ShutdownReason },
    Move { slot: MountSlot, storage: StorageId },
    Resize { slot: MountSlot, size: DiskSize },
    Update { params: ConfigParams },
    Reboot,
    Start,
    AssignPool { pool: PoolId },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { params } => write!(f, "create guest with {}", summarize(params)),
            Self::Shutdown {
                reason: ShutdownReason::Requested,
            } => write!(f, "shut down guest"),
            Self::Shutdown {
                reason: ShutdownReason::DiskSafety,
            } => write!(f, "shut down guest (required for mount changes)"),
            Self::Move { slot, storage } => write!(f, "move {slot} to storage {storage}"),
            Self::Resize { slot, size } => write!(f, "resize {slot} to {size}"),
            Self::Update { params } => write!(f, "update configuration: {}", summarize(params)),
            Self::Reboot => write!(f, "reboot guest to apply pending changes"),
            Self::Start => write!(f, "start guest"),
            Self::AssignPool { pool } => write!(f, "add guest to pool {pool}"),
        }
    }
}

fn summarize(params: &ConfigParams) -> String {
    let mut parts = Vec::new();
    if !params.values().is_empty() {
        let keys: Vec<&str> = params.values().keys().map(String::as_str).collect();
        parts.push(format!("set {}", keys.join(", ")));
    }
    if let Some(list) = params.delete_list() {
        parts.push(format!("delete {list}"));
    }
    parts.join("; ")
}

/// Mutations that were carried out, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub guest: GuestRef,
    pub actions: Vec<Action>,
}

impl UpdateReport {
    fn new(guest: &GuestRef) -> Self {
        Self {
            guest: guest.clone(),
            actions: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// What `update` would do, computed without mutating anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub guest: GuestRef,
    pub power: PowerState,
    pub target: PowerState,
    pub mounts: MountPlan,
    pub params: ConfigParams,
    pub actions: Vec<Action>,
    /// The update may leave pending changes that need a reboot; only the
    /// remote side can tell after the update is applied.
    pub restart_may_be_required: bool,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

fn step(what: &str) -> impl FnOnce(RemoteError) -> CoreError + '_ {
    move |source| CoreError::Step {
        step: what.to_owned(),
        source,
    }
}

/// Drives a guest from its current configuration to a desired one.
///
/// Each call reads a fresh snapshot, validates, and issues one blocking remote
/// call at a time. A failure stops the sequence; completed steps are not
/// reverted.
pub struct Reconciler<'a> {
    api: &'a dyn GuestApi,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(api: &'a dyn GuestApi) -> Self {
        Self {
            api,
            options: ReconcileOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    fn read_snapshot(&self, guest: &GuestRef) -> Result<CurrentConfig, CoreError> {
        let raw = self.api.read_config(guest)?;
        let current = CurrentConfig::decode(&raw)?;
        debug!("read configuration of {guest} at digest {}", current.digest);
        Ok(current)
    }

    /// Create a new guest from a complete desired record.
    pub fn create(
        &self,
        guest: &GuestRef,
        desired: &DesiredConfig,
    ) -> Result<UpdateReport, CoreError> {
        validate(desired, None)?;
        let params = create_params(desired);
        let mut report = UpdateReport::new(guest);

        info!("creating guest {guest}");
        self.api.create(guest, &params).map_err(step("creating guest"))?;
        report.actions.push(Action::Create { params });

        if desired.power_state == Some(PowerState::Running) {
            info!("starting guest {guest}");
            let started = self.api.start(guest).map_err(step("starting guest"));
            if let Err(e) = started {
                log_partial(guest, &report);
                return Err(e);
            }
            report.actions.push(Action::Start);
        }
        Ok(report)
    }

    /// Reconcile an existing guest against `desired`.
    pub fn update(
        &self,
        guest: &GuestRef,
        desired: &DesiredConfig,
    ) -> Result<UpdateReport, CoreError> {
        let current = self.read_snapshot(guest)?;
        validate(desired, Some(&current))?;
        let power = self.api.read_status(guest)?;
        let target = desired.power_state.unwrap_or(power);
        debug!("guest {guest} is {power}, target {target}");

        let mut report = UpdateReport::new(guest);
        let result = self.run_update(guest, desired, current, power, target, &mut report);
        if result.is_err() {
            log_partial(guest, &report);
        }
        result.map(|()| report)
    }

    fn run_update(
        &self,
        guest: &GuestRef,
        desired: &DesiredConfig,
        mut current: CurrentConfig,
        mut power: PowerState,
        target: PowerState,
        report: &mut UpdateReport,
    ) -> Result<(), CoreError> {
        if target == PowerState::Stopped && power.may_be_running() {
            self.shutdown(guest, ShutdownReason::Requested, report)?;
            power = PowerState::Stopped;
        }

        let mounts = plan_mounts(desired, &current);
        if (mounts.requires_off_state || !mounts.moves.is_empty()) && power.may_be_running() {
            if !self.options.allow_restart {
                return Err(CoreError::StopRequired);
            }
            self.shutdown(guest, ShutdownReason::DiskSafety, report)?;
            power = PowerState::Stopped;
        }

        for mv in &mounts.moves {
            info!("moving {} of {guest} to storage {}", mv.slot, mv.storage);
            self.api
                .move_mount(
                    guest,
                    mv.slot,
                    &mv.storage,
                    self.options.delete_original_on_move,
                )
                .map_err(step(&format!("moving {} to {}", mv.slot, mv.storage)))?;
            report.actions.push(Action::Move {
                slot: mv.slot,
                storage: mv.storage.clone(),
            });
        }
        for rs in &mounts.resizes {
            info!("resizing {} of {guest} to {}", rs.slot, rs.size);
            self.api
                .resize_mount(guest, rs.slot, rs.size)
                .map_err(step(&format!("resizing {}", rs.slot)))?;
            report.actions.push(Action::Resize {
                slot: rs.slot,
                size: rs.size,
            });
        }

        // Moves and resizes rewrite the mount lines and the digest.
        if mounts.has_volume_ops() {
            current = self.read_snapshot(guest)?;
        }

        let params = diff_config(desired, &current);
        let updated = !params.is_empty();
        if updated {
            info!("updating configuration of {guest}: {}", summarize(&params));
            self.api
                .update_config(guest, &params, Some(&current.digest))
                .map_err(step("updating configuration"))?;
            report.actions.push(Action::Update { params });
        } else {
            debug!("configuration of {guest} already up to date");
        }

        if updated && power.may_be_running() {
            let pending = self
                .api
                .has_pending_changes(guest)
                .map_err(step("checking pending changes"))?;
            if pending {
                if !self.options.allow_restart {
                    return Err(CoreError::RestartRequired);
                }
                info!("rebooting {guest} to apply pending changes");
                self.api.reboot(guest).map_err(step("restarting guest"))?;
                report.actions.push(Action::Reboot);
                power = PowerState::Running;
            }
        }

        if target == PowerState::Running && power != PowerState::Running {
            info!("starting guest {guest}");
            self.api.start(guest).map_err(step("starting guest"))?;
            report.actions.push(Action::Start);
        }

        if let Some(pool) = &desired.pool {
            info!("adding {guest} to pool {pool}");
            self.api
                .assign_pool(guest, pool)
                .map_err(step("assigning pool"))?;
            report.actions.push(Action::AssignPool { pool: pool.clone() });
        }
        Ok(())
    }

    fn shutdown(
        &self,
        guest: &GuestRef,
        reason: ShutdownReason,
        report: &mut UpdateReport,
    ) -> Result<(), CoreError> {
        info!("shutting down {guest} ({reason:?})");
        self.api.shutdown(guest).map_err(step("shutting down guest"))?;
        report.actions.push(Action::Shutdown { reason });
        Ok(())
    }

    /// Compute what `update` would do without issuing any mutation. Fails the
    /// same way `update` does when a disk operation needs a shutdown the
    /// options do not permit.
    pub fn plan(&self, guest: &GuestRef, desired: &DesiredConfig) -> Result<Plan, CoreError> {
        let current = self.read_snapshot(guest)?;
        validate(desired, Some(&current))?;
        let power = self.api.read_status(guest)?;
        let target = desired.power_state.unwrap_or(power);

        let mut actions = Vec::new();
        let mut may_run = power.may_be_running();
        let mut running = power == PowerState::Running;

        if target == PowerState::Stopped && may_run {
            actions.push(Action::Shutdown {
                reason: ShutdownReason::Requested,
            });
            may_run = false;
            running = false;
        }

        let mounts = plan_mounts(desired, &current);
        if (mounts.requires_off_state || !mounts.moves.is_empty()) && may_run {
            if !self.options.allow_restart {
                return Err(CoreError::StopRequired);
            }
            actions.push(Action::Shutdown {
                reason: ShutdownReason::DiskSafety,
            });
            may_run = false;
            running = false;
        }
        for mv in &mounts.moves {
            actions.push(Action::Move {
                slot: mv.slot,
                storage: mv.storage.clone(),
            });
        }
        for rs in &mounts.resizes {
            actions.push(Action::Resize {
                slot: rs.slot,
                size: rs.size,
            });
        }

        let params = diff_config(desired, &current);
        if !params.is_empty() {
            actions.push(Action::Update {
                params: params.clone(),
            });
        }
        let restart_may_be_required = !params.is_empty() && may_run;

        if target == PowerState::Running && !running {
            actions.push(Action::Start);
        }
        if let Some(pool) = &desired.pool {
            actions.push(Action::AssignPool { pool: pool.clone() });
        }

        Ok(Plan {
            guest: guest.clone(),
            power,
            target,
            mounts,
            params,
            actions,
            restart_may_be_required,
        })
    }
}

/// Completed mutations are left in place when a later step fails.
fn log_partial(guest: &GuestRef, report: &UpdateReport) {
    if report.actions.is_empty() {
        return;
    }
    let done: Vec<String> = report.actions.iter().map(ToString::to_string).collect();
    warn!(
        "guest {guest} left partially updated; completed: {}",
        done.join(", ")
    );
}

/// Full parameter set for creation: every domain rendered against an empty
/// configuration, plus the creation-only keys.
fn create_params(desired: &DesiredConfig) -> ConfigParams {
    let blank = CurrentConfig {
        unprivileged: desired.unprivileged,
        ..CurrentConfig::default()
    };
    let mut params = diff_config(desired, &blank);
    if let Some(template) = &desired.template {
        params.set("ostemplate", template.file_id.clone());
        if let Some(os_type) = &template.os_type {
            params.set("ostype", os_type.clone());
        }
    }
    if let Some(unprivileged) = desired.unprivileged {
        params.set("unprivileged", if unprivileged { "1" } else { "0" });
    }
    if let Some(pool) = &desired.pool {
        params.set("pool", pool.to_string());
    }
    params
}
