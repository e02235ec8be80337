use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use metawear_rs::discovery::discover_devices;
use metawear_rs::protocol::{DEFAULT_SCAN_TIMEOUT, METAWEAR_NAME_FILTER};

/// Scan for MetaWear boards and print their addresses.
#[derive(Parser, Debug)]
#[command(name = "metawear-scan", version, about, long_about = None)]
struct Cli {
    /// Scan duration in seconds
    #[arg(short, long, default_value_t = DEFAULT_SCAN_TIMEOUT.as_secs_f64())]
    timeout: f64,

    /// List every advertising peripheral, not only MetaWear boards
    #[arg(short, long)]
    all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG=metawear_rs=debug for per-peripheral output.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let timeout = Duration::try_from_secs_f64(cli.timeout)
        .with_context(|| format!("--timeout expects a non-negative number of seconds, got {}", cli.timeout))?;
    let filter = (!cli.all).then_some(METAWEAR_NAME_FILTER);

    let devices = discover_devices(timeout, filter).await?;
    for device in &devices {
        println!("{}  {}", device.address, device.name);
    }
    info!(
        "{} {}device(s) found",
        devices.len(),
        if cli.all { "" } else { "MetaWear " }
    );
    Ok(())
}
