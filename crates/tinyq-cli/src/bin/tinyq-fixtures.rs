use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tinyq_cli::init_logging;
use tinyq_fixtures::{ConvSweep, FixtureGenerator, GeneratorConfig, DEFAULT_ALU_VECTOR_SIZES};

#[derive(Parser)]
#[command(
    name = "tinyq-fixtures",
    about = "Generate ONNX test graphs: add vectors, a conv sweep and simple models",
    version
)]
struct Cli {
    /// Root directory for the generated tree
    output_dir: PathBuf,
    /// Vector lengths for the add fixtures (comma-separated)
    #[arg(long = "alu-vectors-sizes", value_delimiter = ',')]
    alu_vector_sizes: Option<Vec<usize>>,
    /// JSON file overriding the conv sweep lists
    #[arg(long)]
    sweep: Option<PathBuf>,
    /// Skip evaluating each fixture before export
    #[arg(long)]
    no_validate: bool,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let sweep = match &cli.sweep {
        Some(path) => ConvSweep::load(path)?,
        None => ConvSweep::default(),
    };
    let config = GeneratorConfig {
        output_dir: cli.output_dir,
        alu_vector_sizes: cli.alu_vector_sizes.unwrap_or_else(|| DEFAULT_ALU_VECTOR_SIZES.to_vec()),
        sweep,
        validate: !cli.no_validate,
    };
    FixtureGenerator::new(config).run()?;
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
