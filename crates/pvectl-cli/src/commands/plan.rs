use super::{
    colorize_power, json_pretty, load_desired, make_backend, print_actions, Connection,
    EXIT_SUCCESS,
};
use pvectl_core::{ReconcileOptions, Reconciler};
use pvectl_schema::GuestRef;
use std::path::Path;

/// Plans are computed under the same restart permission `apply` would get.
pub fn run(
    conn: &Connection<'_>,
    guest: &GuestRef,
    file: &Path,
    options: ReconcileOptions,
    json: bool,
) -> Result<u8, String> {
    let desired = load_desired(file)?;
    let backend = make_backend(conn)?;
    let plan = Reconciler::new(&backend)
        .with_options(options)
        .plan(guest, &desired)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&plan)?);
        return Ok(EXIT_SUCCESS);
    }

    println!(
        "guest {guest}: {} -> {}",
        colorize_power(plan.power),
        colorize_power(plan.target)
    );
    if plan.is_noop() {
        println!("no changes");
    } else {
        print_actions(&plan.actions);
    }
    if plan.mounts.requires_off_state && plan.power.may_be_running() {
        println!("mount changes need the guest stopped: it will be shut down first");
    }
    if plan.restart_may_be_required {
        println!("some changes may only take effect after a restart");
    }
    Ok(EXIT_SUCCESS)
}
