//! CLI Entry Point for hp33120a
//!
//! Provides command-line control of an HP 33120A:
//! - Applying a waveform, frequency, amplitude and duty cycle
//! - Querying the instrument's current output
//! - Uploading arbitrary waveform points from a file or the command line
//! - Listing serial ports
//!
//! # Usage
//!
//! ```bash
//! hp33120a --port /dev/ttyUSB0 apply SQU --frequency 20 --frequency-unit kHz --amplitude 3 --duty 30
//! hp33120a --port COM3 query
//! hp33120a --port COM3 upload-arb --file ramp.csv
//! hp33120a --simulate query
//! ```

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use hp33120a::config::GeneratorConfig;
use hp33120a::hardware::mock::SimulatedGenerator;
use hp33120a::hardware::{SerialTransport, Transport};
use hp33120a::scpi::{OutputSetting, UserInput, Waveform};
use hp33120a::worker::{spawn_worker, Event, Request};
use hp33120a::{tracing_setup, SignalGenerator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

const SIMULATED_PORT: &str = "SIM";

#[derive(Parser)]
#[command(name = "hp33120a")]
#[command(about = "SCPI control of an HP 33120A function generator", long_about = None)]
struct Cli {
    /// Configuration file (default: hp33120a.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overrides connection.port
    #[arg(long, global = true)]
    port: Option<String>,

    /// Talk to a simulated instrument instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Log level, overrides application.log_level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Send *CLS before the command
    #[arg(long, global = true)]
    clear: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set function, frequency, amplitude and (square only) duty cycle
    Apply {
        /// SIN, SQU, TRI, RAMP, NOIS, DC or ARB
        waveform: Waveform,

        /// Frequency magnitude
        #[arg(long, default_value = "1000")]
        frequency: String,

        /// μHz, Hz, kHz or MHz
        #[arg(long, default_value = "Hz")]
        frequency_unit: String,

        /// Amplitude magnitude (peak to peak)
        #[arg(long, default_value = "2")]
        amplitude: String,

        /// mV or V
        #[arg(long, default_value = "V")]
        amplitude_unit: String,

        /// Duty cycle in percent, square wave only
        #[arg(long, default_value = "50")]
        duty: String,
    },

    /// Read back function, frequency, amplitude and duty cycle
    Query,

    /// Upload arbitrary waveform points and select them
    #[command(group(ArgGroup::new("source").required(true).args(["file", "points"])))]
    UploadArb {
        /// File of points separated by commas, spaces or newlines
        #[arg(long)]
        file: Option<PathBuf>,

        /// Points given inline, e.g. "0,0.5,1,0.5,0,-0.5,-1"
        #[arg(long)]
        points: Option<String>,

        /// Instrument-side name, overrides arb.name
        #[arg(long)]
        name: Option<String>,
    },

    /// Clear the instrument's status registers and error queue
    Clear,

    /// List serial ports on this machine
    Ports,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GeneratorConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GeneratorConfig::load()?,
    };
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    if let Some(port) = &cli.port {
        config.connection.port = Some(port.clone());
    }
    config.validate()?;
    tracing_setup::init_from_config(&config)?;

    let mut requests = Vec::new();
    if cli.clear {
        requests.push(Request::ClearStatus);
    }

    match cli.command {
        Commands::Ports => {
            list_ports()?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Clear => {
            if !cli.clear {
                requests.push(Request::ClearStatus);
            }
        }
        Commands::Apply {
            waveform,
            frequency,
            frequency_unit,
            amplitude,
            amplitude_unit,
            duty,
        } => {
            let setting = OutputSetting::from_user_input(&UserInput {
                waveform,
                frequency: &frequency,
                frequency_unit: &frequency_unit,
                amplitude: &amplitude,
                amplitude_unit: &amplitude_unit,
                duty: &duty,
            });
            requests.push(Request::Apply(setting));
        }
        Commands::Query => requests.push(Request::QueryStatus),
        Commands::UploadArb { file, points, name } => {
            let text = match (file, points) {
                (Some(path), _) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, Some(points)) => points,
                (None, None) => bail!("either --file or --points is required"),
            };
            if let Some(name) = name {
                config.arb.name = name;
            }
            requests.push(Request::UploadArbText(text));
        }
    }

    if cli.simulate {
        let generator = SignalGenerator::new(SimulatedGenerator::new(), SIMULATED_PORT);
        run(generator, &config, requests).await
    } else {
        let Some(port) = config.connection.port.clone() else {
            bail!("no serial port given; use --port, connection.port or --simulate");
        };
        run(SignalGenerator::new(SerialTransport::new(), port), &config, requests).await
    }
}

/// Push `requests` through a worker one at a time, printing each outcome.
/// Stops at the first failure and reports it on stderr.
async fn run<T>(
    generator: SignalGenerator<T>,
    config: &GeneratorConfig,
    requests: Vec<Request>,
) -> Result<ExitCode>
where
    T: Transport + 'static,
{
    let generator = generator
        .with_arb_name(config.arb.name.clone())
        .with_reply_strategy(config.protocol.reply);
    info!(
        port = generator.port_name(),
        reply = ?generator.reply_strategy(),
        "starting generator worker"
    );

    let (worker, mut events) = spawn_worker(generator);

    let mut code = ExitCode::SUCCESS;
    for request in requests {
        worker.submit(request).await?;
        let Some(event) = events.recv().await else {
            break;
        };
        debug!(?event, "worker event");
        if let Event::Failed { .. } = event {
            eprintln!("{}", event.display_text());
            code = ExitCode::FAILURE;
            break;
        }
        println!("{}", event.display_text());
    }

    worker.shutdown().await?;
    Ok(code)
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => println!(
                "{}  USB {:04x}:{:04x} {}",
                port.port_name,
                usb.vid,
                usb.pid,
                usb.product.unwrap_or_default()
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}
