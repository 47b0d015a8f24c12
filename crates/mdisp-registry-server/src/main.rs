// SPDX-License-Identifier: Apache-2.0 OR MIT

//! mdisp protocol-registry server.
//!
//! Tracks which client implements which protocol command, on behalf of the
//! whole display-server family. Talks to the master over the rendezvous
//! socket and supports in-place upgrade: on `SIGUSR1` the server suspends
//! its state to disk and re-execs its own (possibly replaced) binary, which
//! resumes from that state without dropping a registration.
//!
//! # Usage
//!
//! ```bash
//! # Connect to the default rendezvous socket
//! mdisp-registry-server
//!
//! # Custom socket and config
//! mdisp-registry-server --socket /tmp/mdisp.sock --config registry.json
//!
//! # Trigger a live upgrade
//! kill -USR1 $(pidof mdisp-registry-server)
//! ```

use std::fs;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mdisp::registry::{ControlFlags, Outcome, RegistryService};

mod config;
mod transport;

pub use config::ServerConfig;
use transport::RendezvousTransport;

/// mdisp registry server - protocol command registration service
#[derive(Parser, Debug)]
#[command(name = "mdisp-registry-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rendezvous socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resume from a suspended-state file (set by the re-exec itself)
    #[arg(long, hide = true)]
    resume_from: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!("loading config from {:?}", path);
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }

    let flags = Arc::new(ControlFlags::new());
    ctrlc::set_handler({
        let flags = Arc::clone(&flags);
        move || flags.request_terminate()
    })
    .context("installing termination handler")?;
    // SAFETY: the handler only stores to an atomic flag, which is
    // async-signal-safe.
    unsafe {
        let flags = Arc::clone(&flags);
        signal_hook::low_level::register(signal_hook::consts::SIGUSR1, move || {
            flags.request_reexec();
        })
        .context("installing re-exec handler")?;
    }

    let mut service = match &args.resume_from {
        Some(path) => resume_or_abort(path),
        None => RegistryService::new(),
    };

    let mut transport = RendezvousTransport::connect(&config)
        .with_context(|| format!("connecting to {:?}", config.socket_path))?;

    match service.run(&mut transport, &flags)? {
        Outcome::Terminated => {
            info!("termination requested, shutting down");
            Ok(())
        }
        Outcome::Reexec => {
            info!("re-exec requested, suspending state");
            let blob = match service.suspend() {
                Ok(blob) => blob,
                // Inconsistent state must not be carried into the next
                // image; die and let the supervisor respawn us cold.
                Err(e) => {
                    error!("suspend failed: {}", e);
                    std::process::abort();
                }
            };
            fs::write(&config.state_path, blob)
                .with_context(|| format!("writing state to {:?}", config.state_path))?;

            let exe = std::env::current_exe().context("resolving own executable")?;
            info!("replacing process image with {:?}", exe);
            let mut command = Command::new(exe);
            command.arg("--resume-from").arg(&config.state_path);
            if let Some(path) = &args.config {
                command.arg("--config").arg(path);
            }
            command.arg("--log-level").arg(&args.log_level);
            // exec only returns on failure.
            Err(command.exec()).context("re-exec failed")
        }
    }
}

/// Reconstruct the service from a suspend blob. Any failure here means the
/// transplanted state cannot be trusted; abort rather than continue.
fn resume_or_abort(path: &std::path::Path) -> RegistryService {
    info!("resuming from {:?}", path);
    let blob = match fs::read(path) {
        Ok(blob) => blob,
        Err(e) => {
            error!("cannot read state file {:?}: {}", path, e);
            std::process::abort();
        }
    };
    let service = match RegistryService::resume(&blob) {
        Ok(service) => service,
        Err(e) => {
            error!("state transplant failed: {}", e);
            std::process::abort();
        }
    };
    // The blob is one-shot; a stale file must not resurrect old state.
    if let Err(e) = fs::remove_file(path) {
        error!("cannot remove consumed state file {:?}: {}", path, e);
    }
    service
}
