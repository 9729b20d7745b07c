use super::{
    json_pretty, load_desired, make_backend, print_actions, spin_fail, spin_ok, spinner,
    Connection, EXIT_SUCCESS,
};
use pvectl_core::Reconciler;
use pvectl_schema::GuestRef;
use std::path::Path;

pub fn run(conn: &Connection<'_>, guest: &GuestRef, file: &Path, json: bool) -> Result<u8, String> {
    let desired = load_desired(file)?;
    let backend = make_backend(conn)?;

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("creating {guest}...")))
    };
    let report = Reconciler::new(&backend)
        .create(guest, &desired)
        .map_err(|e| {
            if let Some(ref pb) = pb {
                spin_fail(pb, "create failed");
            }
            e.to_string()
        })?;
    if let Some(ref pb) = pb {
        spin_ok(pb, "guest created");
    }

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_actions(&report.actions);
    }
    Ok(EXIT_SUCCESS)
}
