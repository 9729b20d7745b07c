use super::{colorize_power, json_pretty, make_backend, Connection, EXIT_SUCCESS};
use pvectl_remote::GuestApi;
use pvectl_schema::{CurrentConfig, GuestRef};

pub fn run(conn: &Connection<'_>, guest: &GuestRef, json: bool) -> Result<u8, String> {
    let backend = make_backend(conn)?;
    let power = backend
        .read_status(guest)
        .map_err(|e| format!("remote error: {e}"))?;
    let raw = backend
        .read_config(guest)
        .map_err(|e| format!("remote error: {e}"))?;
    let current = CurrentConfig::decode(&raw).map_err(|e| format!("schema error: {e}"))?;

    if json {
        let payload = serde_json::json!({
            "guest": guest,
            "power": power,
            "config": current,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("guest:      {guest}");
    println!("power:      {}", colorize_power(power));
    println!(
        "hostname:   {}",
        current.hostname.as_deref().unwrap_or("(none)")
    );
    println!("privilege:  {:?}", current.privilege());
    if let Some(memory) = current.memory {
        println!("memory:     {memory} MiB");
    }
    if let Some(cores) = current.cpu.cores {
        println!("cores:      {cores}");
    }
    if let Some(boot) = &current.boot_mount {
        println!("rootfs:     {}", boot.render());
    }
    for (n, mount) in &current.mounts {
        println!("mp{n}:        {}", mount.render());
    }
    for (n, iface) in &current.networks {
        println!("net{n}:       {}", iface.render());
    }
    println!("digest:     {}", current.digest);
    Ok(EXIT_SUCCESS)
}
