mod logging;

use std::path::PathBuf;

use altlink::{AltLink, Config, Configs, ConnectionType, Device};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use crate::logging::setup_logging;

#[derive(clap::Parser)]
#[clap(name = "altlink", about = "Talk to ARM targets through a CMSIS-DAP probe")]
struct Cli {
    /// Configuration file, TOML or JSON
    #[clap(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration and RUST_LOG
    #[clap(long, global = true, help_heading = "LOG CONFIGURATION")]
    log_level: Option<String>,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// List all attached CMSIS-DAP probes
    List,
    /// Show what the probe reports about itself
    Info(ProbeOptions),
    /// Power up the target's debug domain and discover its components
    Scan(TargetOptions),
    /// Print every access port and its ROM table
    ApTable(TargetOptions),
    /// Halt every core, dump its registers and resume it
    TestHaltAndRun(TargetOptions),
    /// Read back the levels of the debug pins
    Pins(ProbeOptions),
}

#[derive(clap::Parser)]
struct ProbeOptions {
    /// Index of the probe in the output of `list`
    #[clap(long, default_value = "0")]
    probe: usize,
}

#[derive(clap::Parser)]
struct TargetOptions {
    #[clap(flatten)]
    probe: ProbeOptions,

    /// Connection to the debug port, defaults to the configured one
    #[clap(long, value_enum)]
    connection: Option<ConnectionType>,

    /// SWJ clock in Hz, defaults to the configured one
    #[clap(long)]
    speed: Option<u32>,
}

#[derive(Serialize)]
struct ScanSummary<'a> {
    connection: Option<ConnectionType>,
    jtag_devices: usize,
    memory_access_ports: usize,
    probe: &'a altlink::DebugProbeInfo,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut configs = Configs::new();
    if let Some(path) = path {
        configs.merge(path)?;
    }
    Ok(configs.extract()?)
}

fn open<'a>(altlink: &'a mut AltLink, options: &ProbeOptions) -> Result<&'a mut Device> {
    let found = altlink.enumerate()?.len();
    anyhow::ensure!(found > 0, "No CMSIS-DAP probe found");
    altlink
        .open(options.probe)
        .with_context(|| format!("Failed to open probe {} of {}", options.probe, found))
}

/// Open the probe, connect as requested and scan the target.
fn attach<'a>(
    altlink: &'a mut AltLink,
    config: &Config,
    options: &TargetOptions,
) -> Result<&'a mut Device> {
    let device = open(altlink, &options.probe)?;

    if let Some(speed) = options.speed {
        device.set_speed(speed)?;
    }
    let connection = options
        .connection
        .unwrap_or(config.connection.connection_type);
    if device.connection_type() != Some(connection) {
        device
            .set_connection_type(connection)
            .with_context(|| format!("Failed to switch to {connection}"))?;
    }
    device.scan().context("Failed to scan the target")?;
    Ok(device)
}

impl Cli {
    fn run(self, config: Config) -> Result<()> {
        let mut altlink = AltLink::new(config.clone())?;

        match self.subcommand {
            Subcommand::List => {
                altlink.enumerate()?;
                let probes: Vec<_> = altlink.devices().iter().map(|d| d.info()).collect();
                print_json(&probes)
            }
            Subcommand::Info(options) => {
                let device = open(&mut altlink, &options)?;
                print_json(device.dap_info()?)?;
                Ok(device.close()?)
            }
            Subcommand::Scan(options) => {
                let device = attach(&mut altlink, &config, &options)?;
                print_json(&ScanSummary {
                    connection: device.connection_type(),
                    jtag_devices: device.jtag_devices().len(),
                    memory_access_ports: device.memory_ap_count()?,
                    probe: device.info(),
                })?;
                Ok(device.close()?)
            }
            Subcommand::ApTable(options) => {
                let device = attach(&mut altlink, &config, &options)?;
                print_json(&device.ap_table()?)?;
                Ok(device.close()?)
            }
            Subcommand::TestHaltAndRun(options) => {
                let device = attach(&mut altlink, &config, &options)?;
                let report = device.ti()?.test_halt_and_run()?;
                print_json(&report)?;
                Ok(device.close()?)
            }
            Subcommand::Pins(options) => {
                let device = open(&mut altlink, &options)?;
                print_json(&device.pin_status()?)?;
                Ok(device.close()?)
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref()).context("Failed to load configuration.")?;
    let log_level = cli.log_level.as_deref().or(config.log_level.as_deref());
    setup_logging(log_level)?;

    cli.run(config)
}
