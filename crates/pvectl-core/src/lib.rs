//! Container configuration reconciler for pvectl.
//!
//! This crate turns a sparse desired configuration record into the minimal,
//! correctly ordered sequence of remote calls against a live guest. The
//! validator gates every operation; the field, mount and network differs compute
//! the parameter delta; the mount planner decides storage moves, resizes and
//! whether the guest must be off; the `Reconciler` sequences power changes
//! around all of it.

pub mod diff;
pub mod mounts;
pub mod network;
pub mod reconcile;
pub mod validate;

pub use diff::diff_config;
pub use mounts::{plan_mounts, MountMove, MountPlan, MountResize};
pub use network::{diff_network, NetworkChange};
pub use reconcile::{Action, Plan, ReconcileOptions, Reconciler, ShutdownReason, UpdateReport};
pub use validate::validate;

use pvectl_remote::RemoteError;
use pvectl_schema::SchemaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("error {step}: {source}")]
    Step {
        step: String,
        #[source]
        source: RemoteError,
    },
    #[error("guest has to be restarted to apply changes")]
    RestartRequired,
    #[error("guest has to be stopped before applying changes")]
    StopRequired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_problem() {
        let e = CoreError::Validation(vec![
            "memory must be at least 16 MiB".to_owned(),
            "mp0: bind and volume are mutually exclusive".to_owned(),
        ]);
        assert_eq!(
            e.to_string(),
            "invalid configuration: memory must be at least 16 MiB; \
             mp0: bind and volume are mutually exclusive"
        );
    }

    #[test]
    fn step_error_carries_context() {
        let e = CoreError::Step {
            step: "shutting down guest".to_owned(),
            source: RemoteError::Http("HTTP 500".to_owned()),
        };
        assert_eq!(e.to_string(), "error shutting down guest: HTTP error: HTTP 500");
    }
}
