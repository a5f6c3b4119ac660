use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use rxevm::analyzer::ImageReport;
use rxevm::config::{ClockMode, OutputFormat, RuntimeConfig};
use rxevm::runner::{RunError, run_file_with_config};
use rxevm::vm::{Memory, ProgramImage};
use tracing_subscriber::EnvFilter;

// Wrapper type for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormatArg {
    #[default]
    Human,
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "rxevm")]
#[command(about = "Virtual machine for compiled NXT robot programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an RXE program on a headless robot
    Run {
        /// The program image to run
        file: PathBuf,

        /// Read runtime settings from a TOML file (flags override it)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Stop after this many instructions
        #[arg(long)]
        max_steps: Option<u64>,

        /// Stop after this many milliseconds of wall time
        #[arg(long)]
        time_budget_ms: Option<u64>,

        /// Skip waits instead of sleeping through them
        #[arg(long)]
        simulated_clock: bool,

        /// Treat memory faults as fatal
        #[arg(long)]
        halt_on_fault: bool,

        /// Log every executed instruction
        #[arg(long)]
        trace: bool,

        /// Include the final memory contents in the report
        #[arg(long)]
        dump_memory: bool,

        /// Report format (human, json)
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormatArg,
    },
    /// Print the header, dataspace, clumps and disassembly of an image
    Dump {
        /// The program image to inspect
        file: PathBuf,

        /// Report format (human, json)
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormatArg,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            config,
            max_steps,
            time_budget_ms,
            simulated_clock,
            halt_on_fault,
            trace,
            dump_memory,
            format,
        } => {
            let overrides = RuntimeConfig {
                max_steps,
                time_budget_ms,
                clock: if simulated_clock {
                    ClockMode::Simulated
                } else {
                    ClockMode::Wall
                },
                halt_on_fault,
                trace,
                dump_memory,
                ..Default::default()
            };
            run(&file, config.as_deref(), overrides, format.into())
        }
        Commands::Dump { file, format } => dump(&file, format.into()),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn init_logging(trace: bool) {
    let default = if trace { "rxevm=trace" } else { "rxevm=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Merge command line flags over the config file. Flags only ever switch
/// things on or set limits, so a default flag leaves the file's value alone.
fn merge(mut config: RuntimeConfig, flags: RuntimeConfig) -> RuntimeConfig {
    if flags.max_steps.is_some() {
        config.max_steps = flags.max_steps;
    }
    if flags.time_budget_ms.is_some() {
        config.time_budget_ms = flags.time_budget_ms;
    }
    if flags.clock == ClockMode::Simulated {
        config.clock = ClockMode::Simulated;
    }
    config.halt_on_fault |= flags.halt_on_fault;
    config.trace |= flags.trace;
    config.dump_memory |= flags.dump_memory;
    config
}

fn run(
    file: &Path,
    config_path: Option<&Path>,
    flags: RuntimeConfig,
    format: OutputFormat,
) -> Result<(), RunError> {
    let config = match config_path {
        Some(path) => merge(RuntimeConfig::load(path)?, flags),
        None => flags,
    };
    init_logging(config.trace);
    let report = run_file_with_config(file, &config)?;
    match format {
        OutputFormat::Human => print!("{}", report.render_human()),
        OutputFormat::Json => println!("{}", to_json(&report)),
    }
    Ok(())
}

fn dump(file: &Path, format: OutputFormat) -> Result<(), RunError> {
    init_logging(false);
    let image = Arc::new(ProgramImage::load(file)?);
    let memory = Memory::new(Arc::clone(&image))?;
    let report = ImageReport::build(&image, &memory);
    match format {
        OutputFormat::Human => print!("{}", report.render_human()),
        OutputFormat::Json => println!("{}", to_json(&report)),
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}
