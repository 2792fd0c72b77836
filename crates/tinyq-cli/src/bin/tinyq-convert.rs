use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tinyq_cli::init_logging;
use tinyq_convert::{ConvertConfig, ConvertError, Converter};

#[derive(Parser)]
#[command(
    name = "tinyq-convert",
    about = "Convert ONNX graphs into calibrated int8 .tqf artifacts",
    version
)]
struct Cli {
    /// An .onnx file or a directory searched recursively
    input: PathBuf,
    /// Output file (file input) or output root (directory input)
    output: PathBuf,
    /// Seed for the calibration samples
    #[arg(long)]
    seed: Option<u64>,
}

/// Exit status when the input path does not exist.
const MISSING_INPUT: u8 = 255;

fn run(cli: Cli) -> anyhow::Result<()> {
    let converter = Converter::new(ConvertConfig { seed: cli.seed, ..Default::default() })?;
    let report = converter.run(&cli.input, &cli.output)?;
    tracing::info!(converted = report.converted.len(), "done");
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            match e.downcast_ref::<ConvertError>() {
                Some(ConvertError::MissingInput(_)) => ExitCode::from(MISSING_INPUT),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
