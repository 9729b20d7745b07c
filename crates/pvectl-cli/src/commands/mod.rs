pub mod apply;
pub mod completions;
pub mod create;
pub mod plan;
pub mod status;

use indicatif::{ProgressBar, ProgressStyle};
use pvectl_core::Action;
use pvectl_remote::{ApiConfig, HttpBackend};
use pvectl_schema::{DesiredConfig, PowerState};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_REMOTE_ERROR: u8 = 3;
pub const EXIT_STATE_ERROR: u8 = 4;

/// Where to find the API: an explicit config file, an endpoint override, or
/// both.
pub struct Connection<'a> {
    pub config: Option<&'a Path>,
    pub endpoint: Option<&'a str>,
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(finish_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(finish_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_power(state: PowerState) -> String {
    use console::Style;
    let text = state.to_string();
    match state {
        PowerState::Running => Style::new().green().bold().apply_to(text).to_string(),
        PowerState::Stopped => Style::new().yellow().apply_to(text).to_string(),
        PowerState::Unknown => Style::new().dim().apply_to(text).to_string(),
    }
}

pub fn print_actions(actions: &[Action]) {
    for (i, action) in actions.iter().enumerate() {
        println!("  {}. {action}", i + 1);
    }
}

pub fn load_desired(path: &Path) -> Result<DesiredConfig, String> {
    pvectl_schema::parse_desired_file(path).map_err(|e| e.to_string())
}

/// Resolve the API config: `--config` wins over the default file, and
/// `--endpoint` overrides whichever endpoint was loaded. With only
/// `--endpoint` and no default file, connect without a token.
pub fn load_api_config(conn: &Connection<'_>) -> Result<ApiConfig, String> {
    let loaded = match conn.config {
        Some(path) => Some(ApiConfig::load(path).map_err(|e| format!("api config: {e}"))?),
        None => {
            let path = pvectl_remote::config::default_config_path()
                .map_err(|e| format!("api config: {e}"))?;
            if path.exists() {
                Some(ApiConfig::load(&path).map_err(|e| format!("api config: {e}"))?)
            } else {
                None
            }
        }
    };
    match (loaded, conn.endpoint) {
        (Some(config), Some(url)) => Ok(config.with_endpoint(url)),
        (Some(config), None) => Ok(config),
        (None, Some(url)) => Ok(ApiConfig::new(url)),
        (None, None) => Err(
            "api config: no --endpoint given and no ~/.config/pvectl/api.json found".to_owned(),
        ),
    }
}

pub fn make_backend(conn: &Connection<'_>) -> Result<HttpBackend, String> {
    let config = load_api_config(conn)?;
    tracing::debug!("using API endpoint {}", config.endpoint);
    Ok(HttpBackend::new(config))
}

/// Map an error message to the process exit code.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("invalid configuration:")
        || msg.starts_with("failed to read desired configuration")
        || msg.starts_with("failed to parse desired configuration")
        || msg.starts_with("api config:")
    {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("guest has to be") {
        EXIT_STATE_ERROR
    } else if msg.starts_with("remote error:")
        || msg.starts_with("schema error:")
        || msg.starts_with("error ")
    {
        EXIT_REMOTE_ERROR
    } else {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvectl_schema::{MountSlot, StorageId};

    #[test]
    fn json_pretty_serializes_action() {
        let action = Action::Move {
            slot: MountSlot::Data(1),
            storage: StorageId::new("local-zfs"),
        };
        let result = json_pretty(&action).unwrap();
        assert!(result.contains("\"action\": \"move\""));
        assert!(result.contains("\"local-zfs\""));
    }

    #[test]
    fn colorize_power_keeps_text() {
        assert!(colorize_power(PowerState::Running).contains("running"));
        assert!(colorize_power(PowerState::Stopped).contains("stopped"));
        assert!(colorize_power(PowerState::Unknown).contains("unknown"));
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_CONFIG_ERROR,
            EXIT_REMOTE_ERROR,
            EXIT_STATE_ERROR,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn exit_code_classification() {
        assert_eq!(
            exit_code_for("invalid configuration: memory must be at least 16 MiB"),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(
            exit_code_for("failed to parse desired configuration: expected `=`"),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(
            exit_code_for("guest has to be stopped before applying changes"),
            EXIT_STATE_ERROR
        );
        assert_eq!(
            exit_code_for("error shutting down guest: HTTP error: HTTP 500"),
            EXIT_REMOTE_ERROR
        );
        assert_eq!(exit_code_for("something else"), EXIT_FAILURE);
    }

    #[test]
    fn explicit_config_with_endpoint_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.json");
        ApiConfig::new("https://pve1:8006")
            .with_token("ci@pve!deploy", "secret")
            .save(&path)
            .unwrap();

        let conn = Connection {
            config: Some(&path),
            endpoint: Some("https://pve2:8006/"),
        };
        let config = load_api_config(&conn).unwrap();
        assert_eq!(config.endpoint, "https://pve2:8006");
        assert_eq!(config.token_id.as_deref(), Some("ci@pve!deploy"));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let conn = Connection {
            config: Some(&path),
            endpoint: None,
        };
        let err = load_api_config(&conn).unwrap_err();
        assert!(err.starts_with("api config:"));
    }

    #[test]
    fn load_desired_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest.toml");
        std::fs::write(&path, "memory = \"lots\"").unwrap();
        let err = load_desired(&path).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_ERROR);

        std::fs::write(&path, "memory = 512\n[cpu]\ncores = 2").unwrap();
        let desired = load_desired(&path).unwrap();
        assert_eq!(desired.memory, Some(512));
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
