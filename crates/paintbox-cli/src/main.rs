//! Paintbox CLI - recalculate and validate estimate workbooks

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use paintbox::prelude::*;
use paintbox::{resolution_report, validate_engine};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "paintbox")]
#[command(
    author,
    version,
    about = "Excel-compatible recalculation for painting estimate workbooks"
)]
struct Cli {
    /// JSON config file with calculation and validation settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recalculate a workbook analysis and print the results as JSON
    Calc {
        /// Analysis document (JSON)
        input: PathBuf,

        /// Only print these cells (e.g. "Summary!B4"); may be repeated
        #[arg(long = "cell")]
        cells: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        calc: CalcArgs,
    },

    /// Check calculated values against reference values
    Validate {
        /// Analysis document (JSON)
        input: PathBuf,

        /// Reference values (JSON map or sheet,cell,value CSV); without it
        /// only formula resolution is checked
        #[arg(short, long)]
        expected: Option<PathBuf>,

        /// Success rate needed to pass
        #[arg(long)]
        threshold: Option<f64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        calc: CalcArgs,
    },

    /// Show the makeup of a workbook analysis
    Info {
        /// Analysis document (JSON)
        input: PathBuf,

        /// Formulas reading at least this many cells count as complex
        #[arg(long, default_value = "5")]
        min_precedents: usize,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Overrides for the configured calculation options
#[derive(Args)]
struct CalcArgs {
    /// Calculation mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Fail circular references instead of iterating them
    #[arg(long)]
    no_iterative: bool,

    /// Maximum sweeps over a circular group
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Convergence tolerance for circular groups
    #[arg(long)]
    epsilon: Option<f64>,

    /// Evaluate on the calling thread only
    #[arg(long)]
    single_threaded: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Automatic,
    Manual,
}

impl CalcArgs {
    fn apply(&self, options: &mut CalculationOptions) {
        if let Some(mode) = self.mode {
            options.mode = match mode {
                ModeArg::Automatic => CalcMode::Automatic,
                ModeArg::Manual => CalcMode::Manual,
            };
        }
        if self.no_iterative {
            options.iterative = false;
        }
        if let Some(max) = self.max_iterations {
            options.max_iterations = max;
        }
        if let Some(epsilon) = self.epsilon {
            options.epsilon = epsilon;
        }
        if self.single_threaded {
            options.parallel = false;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Calc {
            input,
            cells,
            output,
            calc,
        } => {
            let mut options = config.calculation;
            calc.apply(&mut options);
            let json = calculate(&input, &cells, options)?;
            write_output(output.as_deref(), &json)
        }
        Commands::Validate {
            input,
            expected,
            threshold,
            json,
            calc,
        } => {
            let mut options = config.calculation;
            calc.apply(&mut options);
            let mut validation = config.validation;
            if let Some(threshold) = threshold {
                validation.threshold = threshold;
            }
            validate(&input, expected.as_deref(), options, validation, json)
        }
        Commands::Info {
            input,
            min_precedents,
            json,
        } => show_info(&input, config.calculation, min_precedents, json),
    }
}

fn open(
    input: &Path,
    options: CalculationOptions,
) -> Result<(CalculationEngine, AnalysisDocument, RecalcStats)> {
    let (mut engine, doc, summary) = CalculationEngine::open_analysis(input, options)
        .with_context(|| format!("Failed to load '{}'", input.display()))?;
    log::info!("loaded {}", summary);

    let stats = engine.recalculate_all();
    log::info!("recalculated: {}", stats);
    Ok((engine, doc, stats))
}

fn calculate(input: &Path, cells: &[String], options: CalculationOptions) -> Result<serde_json::Value> {
    let (mut engine, _, stats) = open(input, options)?;

    let mut results = serde_json::Map::new();
    if cells.is_empty() {
        for (key, result) in engine.formula_results() {
            results.insert(engine.store().label(key), serde_json::to_value(result)?);
        }
    } else {
        for reference in cells {
            let (sheet, address) = split_cell(reference)?;
            let result = engine
                .calculate_cell(&sheet, &address)
                .with_context(|| format!("Failed to calculate {}", reference))?;
            results.insert(reference.clone(), serde_json::to_value(result)?);
        }
    }

    Ok(serde_json::json!({ "results": results, "stats": stats }))
}

fn validate(
    input: &Path,
    expected: Option<&Path>,
    options: CalculationOptions,
    validation: ValidationOptions,
    json: bool,
) -> Result<()> {
    let (engine, _, _) = open(input, options)?;

    let report = match expected {
        Some(path) => {
            let expected = ExpectedValues::from_path(path)
                .with_context(|| format!("Failed to read '{}'", path.display()))?;
            log::info!("checking {} reference values", expected.len());
            validate_engine(&engine, &expected, validation)
        }
        None => resolution_report(&engine, validation),
    };

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report);
    }

    if !report.passed {
        bail!(
            "{:.2}% of formulas matched, {:.2}% required",
            report.success_rate * 100.0,
            report.threshold * 100.0
        );
    }
    Ok(())
}

fn show_info(input: &Path, options: CalculationOptions, min_precedents: usize, json: bool) -> Result<()> {
    let (engine, doc, _) = open(input, options)?;
    let summary = AnalysisSummary::new(&doc, &engine, min_precedents);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("File: {}", input.display());
        print!("{}", summary);
    }
    Ok(())
}

fn write_output(output: Option<&Path>, json: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(json)?;
    if let Some(path) = output {
        std::fs::write(path, &text)
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
        eprintln!("Wrote results to '{}'", path.display());
    } else {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", text).context("Failed to write to stdout")?;
    }
    Ok(())
}

/// Split `Sheet!A1` (or `'Labor Rates'!B2`) into sheet name and address
fn split_cell(reference: &str) -> Result<(String, String)> {
    let Some((sheet, address)) = reference.rsplit_once('!') else {
        bail!("'{}' needs a sheet name, e.g. Summary!B4", reference);
    };
    let sheet = match sheet.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(quoted) => quoted.replace("''", "'"),
        None => sheet.to_string(),
    };
    if sheet.is_empty() || address.is_empty() {
        bail!("'{}' is not a cell reference", reference);
    }
    Ok((sheet, address.to_string()))
}
