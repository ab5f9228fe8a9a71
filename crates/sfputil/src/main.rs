//! sfputil: transceiver presence, LPMode, reset and EEPROM inspection for
//! SONiC platforms.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sonic_sfp::{PlatformConfig, PortEvents, SysfsSfpUtil, DEFAULT_CONFIG_PATH};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// SONiC transceiver utility
#[derive(Parser, Debug)]
#[command(name = "sfputil")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Built-in platform name (see `sfputil platforms`)
    #[arg(short = 'p', long, conflicts_with = "config")]
    platform: Option<String>,

    /// Platform description file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Resolve sysfs paths under this directory instead of /
    #[arg(long)]
    sysfs_root: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// List built-in platforms
    Platforms,

    /// Show module presence
    Presence {
        /// Port; all ports when omitted
        port: Option<u32>,
    },

    /// Get or set low-power mode
    Lpmode {
        #[command(subcommand)]
        action: LpmodeAction,
    },

    /// Reset a QSFP module
    Reset { port: u32 },

    /// Dump EEPROM bytes
    Eeprom {
        port: u32,

        #[arg(long, default_value = "0")]
        offset: u64,

        /// Bytes to read; the addressable page is 256 bytes
        #[arg(long, default_value = "128", value_parser = clap::value_parser!(u16).range(1..=256))]
        len: u16,
    },

    /// Show temperature and supply voltage
    Dom { port: u32 },

    /// Wait for presence changes
    Watch {
        /// Per-poll timeout in milliseconds; 0 blocks until a change
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        timeout_ms: i64,

        /// Stop after this many polls; 0 runs forever
        #[arg(long, default_value = "0")]
        count: u64,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum LpmodeAction {
    Get { port: u32 },
    Set { port: u32, mode: Switch },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum Switch {
    On,
    Off,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set logger: {}", e))
}

fn load_platform(args: &Args) -> Result<PlatformConfig> {
    if let Some(name) = &args.platform {
        return Ok(PlatformConfig::builtin(name)?);
    }
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    if args.config.is_none() && !Path::new(&path).exists() {
        bail!(
            "no platform selected: pass --platform or --config (default {} not found)",
            DEFAULT_CONFIG_PATH
        );
    }
    PlatformConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn print<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn hex_dump(offset: u64, bytes: &[u8]) -> String {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, row)| {
            let hex: Vec<String> = row.iter().map(|b| format!("{:02x}", b)).collect();
            format!("{:08x}  {}", offset + (i as u64) * 16, hex.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_events(events: &PortEvents) -> String {
    events
        .iter()
        .map(|(port, state)| format!("Port {}: {}", port, state))
        .collect::<Vec<_>>()
        .join("\n")
}

fn run(args: Args) -> Result<()> {
    if args.command == Command::Platforms {
        let names = PlatformConfig::builtin_names();
        return print(args.json, &names, || names.join("\n"));
    }

    let config = load_platform(&args)?;
    let mut sfp = SysfsSfpUtil::sysfs(config, args.sysfs_root.clone())?;
    let json = args.json;

    match args.command {
        Command::Platforms => Ok(()),
        Command::Presence { port: Some(port) } => {
            let present = sfp.get_presence(port)?;
            print(json, &present, || {
                format!("{}: {}", port, if present { "Present" } else { "Not present" })
            })
        }
        Command::Presence { port: None } => {
            let table: BTreeMap<u32, bool> = sfp
                .ports()
                .ports()
                .map(|port| (port, sfp.is_present(port)))
                .collect();
            print(json, &table, || {
                table
                    .iter()
                    .map(|(p, present)| {
                        format!("{}: {}", p, if *present { "Present" } else { "Not present" })
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Command::Lpmode {
            action: LpmodeAction::Get { port },
        } => {
            let low_power = sfp.get_low_power_mode(port)?;
            print(json, &low_power, || {
                format!("{}: {}", port, if low_power { "On" } else { "Off" })
            })
        }
        Command::Lpmode {
            action: LpmodeAction::Set { port, mode },
        } => {
            sfp.set_low_power_mode(port, mode == Switch::On)?;
            info!(port, ?mode, "lpmode updated");
            print(json, &true, || "OK".to_string())
        }
        Command::Reset { port } => {
            sfp.reset(port)?;
            print(json, &true, || "OK".to_string())
        }
        Command::Eeprom { port, offset, len } => {
            let bytes = sfp.read_eeprom(port, offset, usize::from(len))?;
            print(json, &bytes, || hex_dump(offset, &bytes))
        }
        Command::Dom { port } => {
            let dom = sfp.get_dom(port)?;
            print(json, &dom, || {
                format!(
                    "Temperature: {:.2} C\nVoltage: {:.4} V",
                    dom.temperature_c, dom.voltage_v
                )
            })
        }
        Command::Watch { timeout_ms, count } => {
            let mut polls = 0u64;
            while count == 0 || polls < count {
                polls += 1;
                let events = sfp.poll_for_change_paced(timeout_ms)?;
                if events.is_empty() {
                    debug!(polls, "no presence change");
                    continue;
                }
                print(json, &events, || format_events(&events))?;
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("sfputil: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use sonic_sfp::PortState;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_lpmode_set() {
        let args = Args::parse_from([
            "sfputil",
            "--platform",
            "accton_as7716_32x",
            "lpmode",
            "set",
            "5",
            "on",
        ]);
        assert_eq!(args.platform.as_deref(), Some("accton_as7716_32x"));
        assert_eq!(
            args.command,
            Command::Lpmode {
                action: LpmodeAction::Set {
                    port: 5,
                    mode: Switch::On
                }
            }
        );
    }

    #[test]
    fn test_parse_watch_defaults() {
        let args = Args::parse_from(["sfputil", "-c", "/tmp/p.toml", "watch"]);
        assert_eq!(
            args.command,
            Command::Watch {
                timeout_ms: 0,
                count: 0
            }
        );
        assert_eq!(args.log_level, "warn");
    }

    #[test]
    fn test_parse_eeprom_len_bounds() {
        let args = Args::parse_from(["sfputil", "eeprom", "5", "--offset", "128"]);
        assert_eq!(
            args.command,
            Command::Eeprom {
                port: 5,
                offset: 128,
                len: 128
            }
        );
        let args = Args::parse_from(["sfputil", "eeprom", "5", "--len", "256"]);
        assert!(matches!(args.command, Command::Eeprom { len: 256, .. }));

        assert!(Args::try_parse_from(["sfputil", "eeprom", "5", "--len", "4096"]).is_err());
        assert!(Args::try_parse_from(["sfputil", "eeprom", "5", "--len", "0"]).is_err());
    }

    #[test]
    fn test_platform_and_config_conflict() {
        let result = Args::try_parse_from([
            "sfputil",
            "--platform",
            "accton_as7712_32x",
            "--config",
            "/tmp/p.toml",
            "platforms",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_builtin_platform() {
        let args = Args::parse_from(["sfputil", "-p", "accton_as5835_54x", "presence"]);
        let config = load_platform(&args).unwrap();
        assert_eq!(config.ports.port_end, 72);

        let args = Args::parse_from(["sfputil", "-p", "nope", "presence"]);
        assert!(load_platform(&args).is_err());
    }

    #[test]
    fn test_hex_dump() {
        let bytes: Vec<u8> = (0..20).collect();
        assert_eq!(
            hex_dump(0x80, &bytes),
            "00000080  00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f\n\
             00000090  10 11 12 13"
        );
    }

    #[test]
    fn test_format_events() {
        let events = PortEvents::from([(1, PortState::Inserted), (7, PortState::Removed)]);
        assert_eq!(
            format_events(&events),
            "Port 1: inserted\nPort 7: removed"
        );
    }
}
