//! Binary entrypoint for the xbmesh CLI.
//!
//! Commands:
//! - `listen [--port <path>]` - print every message received over the link
//! - `send <dest> (-m <text> | -f <file>) [--port <path>]` - transmit a
//!   message and report whether the remote acknowledged it
//! - `check-device --port <path> [-b <baud>]` - open the port, probe the
//!   radio, and print a JSON status line
//! - `init` - write a commented default config.toml

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use xbmesh::config::Config;

#[derive(Parser)]
#[command(name = "xbmesh")]
#[command(about = "Reliable messaging over XBee DigiMesh radios")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every message received over the link
    Listen {
        /// Serial port (overrides the config file)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Send a message to a 64-bit node address and wait for delivery
    Send {
        /// Destination address in hex, e.g. 0013a20040001234 or 0xFFFF for
        /// broadcast
        dest: String,

        /// Message text to send
        #[arg(short, long, conflicts_with = "file")]
        message: Option<String>,

        /// File whose bytes become the message body
        #[arg(short, long)]
        file: Option<String>,

        /// Serial port (overrides the config file)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Check radio connectivity over serial and print a JSON status line
    CheckDevice {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
    },
    /// Write a default config.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = Config::load(&cli.config).await.ok();
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Listen { port } => {
            #[cfg(not(feature = "serial"))]
            {
                let _ = port;
                eprintln!("Error: listen requires the 'serial' feature");
                std::process::exit(2);
            }
            #[cfg(feature = "serial")]
            {
                let config = match pre_config {
                    Some(config) => config,
                    None => Config::load(&cli.config).await?,
                };
                let port = resolve_port(port, &config)?;
                let link =
                    xbmesh::link::MeshLink::connect(&port, config.serial.baud_rate, &config.protocol)
                        .await?;
                info!(
                    "listening on {} as {:#018x}",
                    port,
                    link.local_address()
                );
                let mut messages = match link.take_messages() {
                    Some(messages) => messages,
                    None => anyhow::bail!("message stream already taken"),
                };
                loop {
                    tokio::select! {
                        received = messages.recv() => match received {
                            Some(msg) => print_message(&msg),
                            None => break,
                        },
                        _ = tokio::signal::ctrl_c() => {
                            info!("interrupted, shutting down");
                            break;
                        }
                    }
                }
                link.disconnect().await;
            }
        }
        Commands::Send {
            dest,
            message,
            file,
            port,
        } => {
            #[cfg(not(feature = "serial"))]
            {
                let _ = (dest, message, file, port);
                eprintln!("Error: send requires the 'serial' feature");
                std::process::exit(2);
            }
            #[cfg(feature = "serial")]
            {
                let config = match pre_config {
                    Some(config) => config,
                    None => Config::load(&cli.config).await?,
                };
                let port = resolve_port(port, &config)?;
                let dest = parse_addr64(&dest)?;
                let data = match (message, file) {
                    (Some(text), _) => text.into_bytes(),
                    (None, Some(path)) => tokio::fs::read(&path).await?,
                    (None, None) => anyhow::bail!("one of --message or --file is required"),
                };
                let link =
                    xbmesh::link::MeshLink::connect(&port, config.serial.baud_rate, &config.protocol)
                        .await?;
                let delivered = link.send_message(&data, dest).await?;
                let stats = link.stats();
                link.disconnect().await;
                if delivered {
                    println!(
                        "delivered {} bytes to {:#018x} ({} fragments, {} retransmitted)",
                        data.len(),
                        dest,
                        stats.fragments_sent,
                        stats.fragments_retransmitted
                    );
                } else {
                    eprintln!("delivery to {:#018x} failed", dest);
                    std::process::exit(1);
                }
            }
        }
        Commands::CheckDevice { port, baud } => {
            #[cfg(not(feature = "serial"))]
            {
                let _ = (port, baud);
                eprintln!("Error: check-device requires the 'serial' feature");
                std::process::exit(2);
            }
            #[cfg(feature = "serial")]
            {
                use std::time::Duration;
                let (device, _rf) = xbmesh::xbee::XBeeDevice::connect(&port, baud).await?;
                let firmware = device
                    .at_command(*b"VR", &[], Duration::from_secs(1))
                    .await
                    .ok()
                    .filter(|r| r.ok())
                    .map(|r| format!("{:#06x}", r.as_u64()));
                let addr = device.local_address();
                device.close().await;
                let status_ok = addr != 0;
                let payload = serde_json::json!({
                    "status": if status_ok { "ok" } else { "no-address" },
                    "port": port,
                    "baud": baud,
                    "local_addr": format!("{:#018x}", addr),
                    "firmware": firmware,
                });
                println!("{}", payload);
                std::process::exit(if status_ok { 0 } else { 1 });
            }
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("wrote {}", cli.config);
        }
    }

    Ok(())
}

#[cfg(feature = "serial")]
fn resolve_port(cli_port: Option<String>, config: &Config) -> Result<String> {
    match cli_port {
        Some(port) => Ok(port),
        None if !config.serial.port.is_empty() => Ok(config.serial.port.clone()),
        None => anyhow::bail!("no serial port: pass --port or set serial.port in the config"),
    }
}

#[cfg(feature = "serial")]
fn print_message(msg: &xbmesh::protocol::ReceivedMessage) {
    match std::str::from_utf8(&msg.data) {
        Ok(text) => println!("{:#018x}: {}", msg.source, text),
        Err(_) => println!(
            "{:#018x}: [{} binary bytes] {}",
            msg.source,
            msg.data.len(),
            xbmesh::logutil::hex_snippet(&msg.data, 32)
        ),
    }
}

/// Parse a 64-bit node address written in hex, with or without a 0x prefix.
#[cfg(feature = "serial")]
fn parse_addr64(input: &str) -> Result<u64> {
    let trimmed = input.trim().trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16)
        .map_err(|_| anyhow::anyhow!("invalid 64-bit address: {}", input))
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level.parse().unwrap_or(log::LevelFilter::Info))
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new().create(true).append(true).open(&file) {
            let sink = std::sync::Arc::new(std::sync::Mutex::new(f));
            // In a pipeline or service, stdout is not a terminal; skip the
            // console copy there to avoid duplicate lines in captured output.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = sink.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
