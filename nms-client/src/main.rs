// NMS client daemon: register with the NMS server over UDP, then keep the session alive.

mod config;
mod udp;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nms_core::{shutdown_channel, Client, ClientError};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "nms-client",
    version,
    about = "Register with an NMS server and keep the session alive"
)]
struct Cli {
    /// Client configuration file (line format, or TOML if it ends in .toml)
    #[arg(short = 'c', long = "config", default_value = "client.cfg")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short = 'd', long)]
    debug: bool,

    /// Equipment configuration file; must exist
    #[arg(short = 'f', long = "equipment", default_value = "boot.cfg")]
    equipment: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG wins over `-d`.
fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    if !cli.equipment.exists() {
        bail!("equipment file {} does not exist", cli.equipment.display());
    }
    let cfg = config::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let identity = cfg.identity()?;
    let endpoint = cfg.endpoint();
    tracing::debug!(
        id = %identity.id,
        mac = %identity.mac,
        server = %endpoint,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    rt.block_on(async move {
        let transport = udp::UdpTransport::connect(&endpoint)
            .await
            .with_context(|| format!("opening UDP socket to {endpoint}"))?;
        let client = Client::new(identity, Arc::new(transport), cfg.timing);
        let (trigger, shutdown) = shutdown_channel();

        let run = client.run(shutdown, |r| {
            tracing::info!(
                server = %endpoint,
                server_id = %r.server.id,
                tcp_port = ?r.tcp_port,
                rounds = r.rounds,
                "registered"
            );
        });
        tokio::pin!(run);

        let result = tokio::select! {
            res = &mut run => res,
            signal = shutdown_signal() => {
                match signal {
                    Ok(()) => tracing::info!("shutdown requested"),
                    Err(e) => tracing::warn!(error = %e, "signal handler failed, shutting down"),
                }
                trigger.trigger();
                run.await
            }
        };

        Ok::<_, anyhow::Error>(match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e @ ClientError::NotAccepted(_)) => {
                tracing::info!(reason = %e, "registration not accepted");
                ExitCode::from(e.exit_code())
            }
            Err(e) => {
                tracing::error!(error = %e, "client stopped");
                ExitCode::from(e.exit_code())
            }
        })
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
