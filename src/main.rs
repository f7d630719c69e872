//! CLI entry point for the IV-curve tester.
//!
//! # Usage
//!
//! Propose settings for the component on every configured measurer:
//! ```bash
//! ivc search --ceiling 5
//! ```
//!
//! Measure every pin of a board and store the curves as tests:
//! ```bash
//! ivc run board.json --output measured.json
//! ```
//!
//! Score stored tests against references:
//! ```bash
//! ivc compare measured.json
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ivc_core::{Board, IvCurve, IvcError, Measurer};
use ivc_daq::config::IvcConfig;
use ivc_daq::{logging, setup};
use ivc_experiment::{IvcComparator, MeasurementPlan};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ivc")]
#[command(about = "IV-curve tester with virtual instruments", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = ivc_daq::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search measurement settings on every configured measurer
    Search {
        /// Highest voltage the search may pick
        #[arg(long)]
        ceiling: Option<f64>,
    },

    /// Measure every pin of a board
    Run {
        /// Board document (JSON)
        board: PathBuf,

        /// Where to write the measured board (defaults to the input)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Store curves as references instead of tests
        #[arg(long)]
        reference: bool,
    },

    /// Score every pin's last test against its reference
    Compare {
        /// Board document (JSON)
        board: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = IvcConfig::load_from(&cli.config)
        .map_err(|e| anyhow!("loading {}: {}", cli.config.display(), e))?;
    config.validate().map_err(|e| anyhow!(e))?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
    info!(application = %config.application.name, "Configuration loaded");

    match cli.command {
        Commands::Search { ceiling } => search(&config, ceiling).await,
        Commands::Run {
            board,
            output,
            reference,
        } => run(&config, board, output, reference).await,
        Commands::Compare { board } => compare(&config, board),
    }
}

async fn search(config: &IvcConfig, ceiling: Option<f64>) -> Result<()> {
    let system = setup::build_system(config);
    let searcher = setup::build_searcher(config, ceiling)?;

    for measurer in system.measurers() {
        let name = measurer.name().unwrap_or("<unnamed>");
        let found = searcher.search_optimal_settings(measurer.as_ref()).await?;
        println!(
            "{}: {} Hz @ {} Hz sampling, {} Ohm, {} V",
            name,
            found.probe_signal_frequency,
            found.sampling_rate,
            found.internal_resistance,
            found.max_voltage
        );
    }
    Ok(())
}

async fn run(config: &IvcConfig, path: PathBuf, output: Option<PathBuf>, reference: bool) -> Result<()> {
    let board = Board::load(&path).with_context(|| format!("reading {}", path.display()))?;
    let system = setup::build_system(config);
    let comparator = setup::build_comparator(config);

    let measurer = system.measurers().first().cloned().ok_or(IvcError::NoMeasurers)?;
    let multiplexer = system.multiplexers().first().cloned();
    let mut plan = MeasurementPlan::new(board, measurer.clone(), multiplexer);

    let unroutable = plan.get_pins_without_multiplexer_outputs().await?;
    if system.has_active_analog_multiplexers() && !unroutable.is_empty() {
        warn!(pins = ?unroutable, "Pins without a usable multiplexer address");
    }

    for index in 0..plan.pins_number() {
        plan.go_pin(index)?;
        plan.route_current_pin().await?;
        let curve = measure_with_retry(measurer.as_ref()).await?;

        if reference {
            plan.save_last_measurement_as_reference().await?;
        } else {
            plan.save_last_measurement_as_test().await?;
        }
        let stored_reference = plan.get_current_pin().and_then(|p| p.reference());
        log_score(&comparator, index, stored_reference.map(|m| &m.ivc), &curve, reference);
    }

    let destination = output.unwrap_or(path);
    plan.to_board()
        .save(&destination)
        .with_context(|| format!("writing {}", destination.display()))?;
    info!(pins = plan.pins_number(), path = %destination.display(), "Board written");
    Ok(())
}

// A transport failure closes the device; one reconnect is attempted before giving up.
async fn measure_with_retry(measurer: &dyn Measurer) -> Result<IvCurve> {
    let err = match measurer.measure_iv_curve().await {
        Ok(curve) => return Ok(curve),
        Err(err) if err.is_transport() => err,
        Err(err) => return Err(err.into()),
    };
    warn!(error = %err, "Measurement failed, reconnecting");
    if !measurer.reconnect().await {
        return Err(err.into());
    }
    Ok(measurer.measure_iv_curve().await?)
}

fn log_score(
    comparator: &IvcComparator,
    index: usize,
    reference: Option<&IvCurve>,
    curve: &IvCurve,
    is_reference: bool,
) {
    match reference {
        Some(reference) if !is_reference => {
            let score = comparator.compare_ivc(reference, curve);
            info!(pin = index, score, "Pin measured");
        }
        _ => info!(pin = index, points = curve.len(), "Pin measured"),
    }
}

fn compare(config: &IvcConfig, path: PathBuf) -> Result<()> {
    let board = Board::load(&path).with_context(|| format!("reading {}", path.display()))?;
    let comparator = setup::build_comparator(config);

    for (index, pin) in board.pins().enumerate() {
        match (pin.reference(), pin.last_test()) {
            (Some(reference), Some(test)) => {
                let score = comparator.compare_ivc(&reference.ivc, &test.ivc);
                println!("pin {:>4}: {:.3}", index, score);
            }
            (None, _) => println!("pin {:>4}: no reference", index),
            (Some(_), None) => println!("pin {:>4}: no test", index),
        }
    }
    Ok(())
}
