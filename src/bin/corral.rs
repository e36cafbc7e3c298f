//! corral - OCI container runtime CLI.
//!
//! Follows the OCI runtime-spec command surface like runc/crun:
//!
//! ```sh
//! corral create <container-id> --bundle <path>
//! corral start <container-id>
//! corral state <container-id>
//! corral kill <container-id> [signal]
//! corral delete <container-id>
//! corral run <container-id> --bundle <path>
//! ```
//!
//! The hidden `init` verb is the internal argv marker of the two-process
//! launch: it is this same binary re-exec'd inside the new namespaces,
//! and is never meant to be invoked by users.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, error};

use corral::{
    init_container, init_logging, parse_signal, write_pid_file, CgroupPolicy, LogConfig, Runtime,
    DEFAULT_STATE_ROOT,
};

#[derive(Debug, Parser)]
#[command(name = "corral", version, about = "OCI container runtime")]
struct Cli {
    /// Root directory for container state (should live on tmpfs).
    #[arg(long, global = true, default_value = DEFAULT_STATE_ROOT)]
    root: PathBuf,

    /// Write runtime logs to this file instead of stderr.
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Log format: 'text' or 'json'.
    #[arg(long = "log-format", global = true, default_value = "text")]
    log_format: String,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Ignore cgroup permission errors: 'true', 'false', or 'auto'.
    #[arg(long, global = true, default_value = "auto")]
    rootless: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a container from an OCI bundle.
    Create {
        /// Path to the container's bundle directory.
        #[arg(long, short = 'b', default_value = ".")]
        bundle: PathBuf,

        /// Write the container's pid to this file.
        #[arg(long = "pid-file")]
        pid_file: Option<PathBuf>,

        id: String,
    },

    /// Execute the user-defined process in a created container.
    Start { id: String },

    /// Query container state as JSON.
    State { id: String },

    /// Send a signal (default SIGTERM) to the container's init process.
    Kill {
        id: String,
        signal: Option<String>,
    },

    /// Delete a stopped container.
    Delete { id: String },

    /// Create and start a container, waiting for it to exit.
    Run {
        /// Path to the container's bundle directory.
        #[arg(long, short = 'b', default_value = ".")]
        bundle: PathBuf,

        /// Write the container's pid to this file.
        #[arg(long = "pid-file")]
        pid_file: Option<PathBuf>,

        id: String,
    },

    /// List registered containers.
    List,

    /// Internal: post-namespace container bring-up.
    #[command(hide = true)]
    Init {
        #[arg(long)]
        bundle: PathBuf,

        id: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig {
        debug: cli.debug,
        file: cli.log.clone(),
        format: cli.log_format.clone(),
    };
    if let Err(e) = init_logging(&log_config) {
        eprintln!("corral: {e}");
        return ExitCode::FAILURE;
    }

    debug!(args = ?std::env::args().collect::<Vec<_>>(), "invoked");

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("corral: {e}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> corral::Result<()> {
    // The init verb runs inside the new namespaces and never touches
    // the state store; handle it before opening the runtime.
    if let Command::Init { bundle, id } = &cli.command {
        init_container(bundle, id)?;
        unreachable!("exec returned without error");
    }

    let policy = CgroupPolicy::from_rootless_flag(&cli.rootless)?;
    let runtime = Runtime::new(cli.root, policy)?;

    match cli.command {
        Command::Create {
            bundle,
            pid_file,
            id,
        } => {
            let state = runtime.create(&id, &bundle)?;
            if let Some(path) = pid_file {
                write_pid_file(&path, state.pid)?;
            }
            Ok(())
        }
        Command::Start { id } => {
            runtime.start(&id)?;
            Ok(())
        }
        Command::State { id } => {
            let state = runtime.state(&id)?;
            let json = serde_json::to_string_pretty(&state)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            println!("{json}");
            Ok(())
        }
        Command::Kill { id, signal } => {
            let signal = parse_signal(signal.as_deref().unwrap_or("SIGTERM"))?;
            runtime.kill(&id, signal)
        }
        Command::Delete { id } => runtime.delete(&id),
        Command::Run {
            bundle,
            pid_file,
            id,
        } => {
            let state = runtime.run(&id, &bundle)?;
            if let Some(path) = pid_file {
                write_pid_file(&path, state.pid)?;
            }
            Ok(())
        }
        Command::List => {
            println!("{:<24} {:<10} {:>8}  {}", "ID", "STATUS", "PID", "BUNDLE");
            for state in runtime.list()? {
                println!(
                    "{:<24} {:<10} {:>8}  {}",
                    state.id, state.status, state.pid, state.bundle
                );
            }
            Ok(())
        }
        Command::Init { .. } => unreachable!("handled above"),
    }
}
