//! Cowherd - Btrfs maintenance helper.
//!
//! Invoked periodically (typically hourly, via a systemd timer) to run
//! due maintenance actions on all mounted Btrfs filesystems. Keeps
//! per-filesystem state between invocations, so each action runs at
//! its configured interval even though the process itself is
//! short-lived.

use anyhow::Result;
use clap::Parser;

use cowherd_common::logging;
use cowherdd::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "cowherdd")]
#[command(about = "Btrfs maintenance helper", long_about = None)]
#[command(version)]
struct Cli {
    /// Show extra debugging information
    #[arg(short, long)]
    verbose: bool,

    /// Display the maintenance status of all mounted Btrfs filesystems
    #[arg(long)]
    status: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose);

    let mut scheduler = Scheduler::new();

    if cli.status {
        let all_ok = scheduler.print_status()?;
        if !all_ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    scheduler.run()?;
    Ok(())
}
