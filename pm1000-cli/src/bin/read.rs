use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pm1000_cli::{LogArgs, setup_logging};
use pm1000_lib::RegisterPoller;
use pm1000_lib::error::PmError;
use pm1000_lib::packet::{FrameKind, Request};
use pm1000_lib::poller::decode_registers;
use pm1000_lib::register::POLL_ORDER;
use pm1000_lib::transport::{Transport, UsbTransport};
use std::time::Duration;
use uom::si::power::{microwatt, nanowatt};

/// Bench tool: single register access on a PM1000.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial number of the FT60x bridge to open.
    #[arg(long, env = "PM1000_SERIAL")]
    serial: Option<String>,
    /// Per-transfer timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    #[command(subcommand)]
    command: Command,
    #[command(flatten)]
    log: LogArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read one register.
    Read {
        #[arg(value_parser = parse_u16)]
        address: u16,
    },
    /// Write one register.
    Write {
        #[arg(value_parser = parse_u16)]
        address: u16,
        #[arg(value_parser = parse_u16)]
        data: u16,
    },
    /// Run one full poll cycle and print the Stokes sample.
    Stokes,
}

/// Accepts decimal or 0x-prefixed hex
fn parse_u16(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("{value}: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(&cli.log)?;

    let mut transport = UsbTransport::open(cli.serial.as_deref())
        .await
        .context("Failed to open PM1000")?
        .with_timeout(Duration::from_millis(cli.timeout_ms));

    match cli.command {
        Command::Read { address } => {
            let request = Request::read(address);
            println!("-> {}", hex::encode(request.to_bytes()));
            let frame = transport.transact(&request).await?;
            println!("<- {}", hex::encode(frame.to_bytes()));
            let Some(response) = frame.as_read_response() else {
                bail!("Expected a read response, got {:?}", frame.kind());
            };
            println!(
                "{:#05x} = {} ({:#06x}), fifo length {}, pm crc {:#06x}{}",
                request.address(),
                response.data,
                response.data,
                response.fifo_length,
                response.pm_crc,
                if response.pm_crc_ok() { " (OK)" } else { "" }
            );
        }
        Command::Write { address, data } => {
            let request = Request::write(address, data);
            println!("-> {}", hex::encode(request.to_bytes()));
            match transport.transact(&request).await {
                Ok(frame) => println!("<- {}", hex::encode(frame.to_bytes())),
                Err(PmError::UnspecifiedLayout(FrameKind::WriteResponse)) => {
                    println!("Write sent; the device's answer has no defined layout")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Stokes => {
            let mut poller = RegisterPoller::new(transport);
            let mut values = [0u16; 9];
            for (slot, register) in values.iter_mut().zip(POLL_ORDER) {
                *slot = poller
                    .read_register(register.address())
                    .await
                    .with_context(|| format!("Failed to read {register}"))?;
                println!("{register:>10} {:#05x} = {:#06x}", register.address(), *slot);
            }
            let sample = decode_registers(&values);
            let power = sample.power();
            println!("{sample}");
            println!(
                "Power: {:.3} µW ({:.0} nW)",
                power.get::<microwatt>(),
                power.get::<nanowatt>()
            );
        }
    }
    Ok(())
}
