//! The `siren` command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use orchestrator::{SimConfig, Simulation};

/// Lagrangian astrophysical fluid + gravity simulator.
#[derive(Parser)]
#[command(name = "siren", version, about)]
struct Args {
    /// Simulation parameter file (JSON).
    paramfile: PathBuf,

    /// Directory for snapshot output.
    #[arg(long, default_value = ".")]
    snapshot_dir: PathBuf,

    /// Override the end time from the parameter file.
    #[arg(long)]
    tend: Option<f64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match SimConfig::load(&args.paramfile) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            return ExitCode::from(err.exit_code() as u8);
        }
    };
    if let Some(tend) = args.tend {
        config.tend = tend;
    }

    let result = Simulation::new(config)
        .and_then(|mut sim| {
            sim.snap_dir = Some(args.snapshot_dir.clone());
            sim.setup()?;
            sim.run()
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            if code != 0 {
                tracing::error!(%err, code, "simulation aborted");
            }
            ExitCode::from(code as u8)
        }
    }
}
