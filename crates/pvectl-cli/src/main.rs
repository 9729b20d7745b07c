mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::exit_code_for;
use pvectl_core::ReconcileOptions;
use pvectl_schema::GuestRef;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "pvectl",
    version,
    about = "Declarative container configuration for Proxmox VE"
)]
struct Cli {
    /// Path to the API config file (default: ~/.config/pvectl/api.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API endpoint URL (overrides the config file).
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct GuestArgs {
    /// Node hosting the container.
    #[arg(long)]
    node: String,
    /// Container VMID.
    #[arg(long)]
    vmid: u32,
}

impl GuestArgs {
    fn guest(&self) -> GuestRef {
        GuestRef::new(self.node.as_str(), self.vmid)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show what `apply` would change, without changing anything.
    Plan {
        /// Desired configuration TOML file.
        file: PathBuf,
        #[command(flatten)]
        target: GuestArgs,
        /// Plan as if `apply --allow-restart` were given.
        #[arg(long, default_value_t = false)]
        allow_restart: bool,
    },
    /// Reconcile an existing container with a desired configuration.
    Apply {
        /// Desired configuration TOML file.
        file: PathBuf,
        #[command(flatten)]
        target: GuestArgs,
        /// Allow shutting down or rebooting the container when a change needs it.
        #[arg(long, default_value_t = false)]
        allow_restart: bool,
        /// Keep the source volume after a storage move.
        #[arg(long, default_value_t = false)]
        keep_original: bool,
    },
    /// Create a new container from a desired configuration.
    Create {
        /// Desired configuration TOML file.
        file: PathBuf,
        #[command(flatten)]
        target: GuestArgs,
    },
    /// Show the power state and decoded configuration of a container.
    Status {
        #[command(flatten)]
        target: GuestArgs,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PVECTL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json;
    let connection = commands::Connection {
        config: cli.config.as_deref(),
        endpoint: cli.endpoint.as_deref(),
    };

    let result = match cli.command {
        Commands::Plan {
            file,
            target,
            allow_restart,
        } => commands::plan::run(
            &connection,
            &target.guest(),
            &file,
            ReconcileOptions {
                allow_restart,
                ..ReconcileOptions::default()
            },
            json_output,
        ),
        Commands::Apply {
            file,
            target,
            allow_restart,
            keep_original,
        } => commands::apply::run(
            &connection,
            &target.guest(),
            &file,
            ReconcileOptions {
                allow_restart,
                delete_original_on_move: !keep_original,
            },
            json_output,
        ),
        Commands::Create { file, target } => {
            commands::create::run(&connection, &target.guest(), &file, json_output)
        }
        Commands::Status { target } => {
            commands::status::run(&connection, &target.guest(), json_output)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
