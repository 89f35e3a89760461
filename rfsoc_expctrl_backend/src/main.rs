//! Command-line front end.
//!
//! ```bash
//! # Compile the demonstration sequence, no board needed
//! rfsoc_expctrl_backend_bin compile --n-rep 10
//!
//! # Run it on the board from the config file, overriding the host
//! rfsoc_expctrl_backend_bin --config rfsoc.json run --host 192.168.1.20 --n-rep 1000
//!
//! # Show the effective configuration
//! rfsoc_expctrl_backend_bin config
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rfsoc_compiler_backend::{AcqMode, BaseExperiment, Waveform};
use rfsoc_expctrl_backend::{
    AcqWorker, AcquisitionResult, Board, Config, Experiment, RunRequest, TcpTransport,
};

#[derive(Parser)]
#[command(name = "rfsoc_expctrl_backend_bin")]
#[command(version)]
#[command(about = "Compile and run pulse sequences on the RFSoC board")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the demonstration sequence and print the program
    Compile {
        #[arg(long, default_value_t = 1)]
        n_rep: u32,

        /// Synchronisation frequency [Hz]
        #[arg(long)]
        freq_sync: Option<f64>,
    },

    /// Run the demonstration sequence on the board
    Run {
        #[arg(long, default_value_t = 1)]
        n_rep: u32,

        #[arg(long)]
        freq_sync: Option<f64>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Acquire on a worker thread
        #[arg(long)]
        worker: bool,
    },

    /// Show effective configuration
    Config,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Drive pulse on DAC 1 followed by an accumulated readout on ADC 1 and a raw
/// trace of the same window on ADC 2.
fn demo_sequence(exp: &mut impl BaseExperiment) -> rfsoc_compiler_backend::Result<()> {
    exp.dac_pulse(
        "drive",
        1,
        0.,
        2e-6,
        None,
        Waveform::new_sine(10e6, Some(0.5), Some(90.)),
        0.,
        false,
    )?;
    exp.dac_pulse(
        "readout_tone",
        2,
        0.1e-6,
        1e-6,
        Some("drive"),
        Waveform::new_dual_sine((50e6, 0.4, 0.), (75e6, 0.4, 0.)),
        0.,
        false,
    )?;
    exp.adc_pulse("readout", 1, 0.1e-6, 1e-6, Some("drive"), AcqMode::Accumulated)?;
    exp.adc_pulse("trace", 2, 0.1e-6, 1e-6, Some("drive"), AcqMode::Raw)?;
    Ok(())
}

fn print_result(result: &AcquisitionResult) {
    println!(
        "{} words in {} attempt(s)",
        result.received_words, result.attempts
    );
    for (channel, data) in &result.channels {
        println!("ADC {}: {}", channel, data);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging.level);

    match cli.command {
        Commands::Compile { n_rep, freq_sync } => {
            let mut exp = Experiment::from_config(&config)?;
            demo_sequence(&mut exp)?;
            let compiled = exp.compile(n_rep, freq_sync.or(config.sync.freq_sync))?;
            println!("{}", compiled.program.to_command());
            for op in &compiled.program.ops {
                println!("  {}", op);
            }
            for table in &compiled.waveforms {
                println!(
                    "DAC {} '{}': {} samples, {} words at {}",
                    table.channel,
                    table.label,
                    table.samples,
                    table.n_words(),
                    table.address
                );
            }
            println!(
                "{} ticks per repetition, {} words expected",
                compiled.program.total_ticks,
                compiled.plan.expected_words()
            );
        }
        Commands::Run {
            n_rep,
            freq_sync,
            host,
            port,
            worker,
        } => {
            if let Some(host) = host {
                config.board.host = host;
            }
            if let Some(port) = port {
                config.board.port = port;
            }
            config.validate()?;

            let mut exp = Experiment::from_config(&config)?;
            demo_sequence(&mut exp)?;
            let transport = TcpTransport::connect(&config.board.host, config.board.port, config.timeout())
                .with_context(|| format!("connecting to {}:{}", config.board.host, config.board.port))?;
            let mut board = Board::new(transport);
            let freq_sync = freq_sync.or(config.sync.freq_sync);

            let result = if worker {
                let session = Arc::new(Mutex::new(exp));
                let acq_worker = AcqWorker::spawn(session, board, config.reader_settings())?;
                let result = acq_worker.run(RunRequest { n_rep, freq_sync })?;
                acq_worker.close()?;
                result
            } else {
                exp.run(&mut board, n_rep, freq_sync, &config.reader_settings())?
            };
            print_result(&result);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
