use super::{
    json_pretty, load_desired, make_backend, print_actions, spin_fail, spin_ok, spinner,
    Connection, EXIT_SUCCESS,
};
use pvectl_core::{ReconcileOptions, Reconciler};
use pvectl_schema::GuestRef;
use std::path::Path;

pub fn run(
    conn: &Connection<'_>,
    guest: &GuestRef,
    file: &Path,
    options: ReconcileOptions,
    json: bool,
) -> Result<u8, String> {
    let desired = load_desired(file)?;
    let backend = make_backend(conn)?;

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("reconciling {guest}...")))
    };
    let report = match Reconciler::new(&backend)
        .with_options(options)
        .update(guest, &desired)
    {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "guest reconciled");
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "reconcile failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
    } else if report.is_noop() {
        println!("guest {guest} already up to date");
    } else {
        println!("guest {guest}: {} action(s)", report.actions.len());
        print_actions(&report.actions);
    }
    Ok(EXIT_SUCCESS)
}
