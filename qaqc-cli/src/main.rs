//! QAQC CLI: clean and check-config commands.
//!
//! Commands:
//! - `clean`: read a long-format OHLCV file, clean every instrument and write
//!   `features/<instrument>.<ext>`, `instruments.txt` and `quality_report.json`
//! - `check-config`: validate a TOML config without touching data

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use qaqc_core::io::{read_calendar, read_instrument_tables, write_table, TableFormat};
use qaqc_core::{BatchOutcome, Cleaner, CleanerConfig, CleaningInfo, TradingCalendar};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qaqc", about = "QAQC CLI: OHLCV cleaning and quality control")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean every instrument in an input file.
    Clean {
        /// Path to a TOML config file (top level or a [qclean] table).
        #[arg(long)]
        config: PathBuf,

        /// Long-format input file (Parquet or CSV) with date and instrument
        /// columns. Falls back to `input_parquet` from the config.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output directory. Falls back to `output_provider_dir` from the
        /// config, then to `qaqc_out`.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Trading calendar file, one YYYY-MM-DD per line. Defaults to the
        /// business days spanned by the input.
        #[arg(long)]
        calendar: Option<PathBuf>,

        /// First calendar day (YYYY-MM-DD) when no calendar file is given.
        #[arg(long)]
        start: Option<String>,

        /// Last calendar day (YYYY-MM-DD) when no calendar file is given.
        #[arg(long)]
        end: Option<String>,

        /// Format of the per-instrument output files.
        #[arg(long, value_enum, default_value = "parquet")]
        format: OutputFormat,

        /// Clean instruments one at a time instead of on the thread pool.
        #[arg(long, default_value_t = false)]
        sequential: bool,
    },
    /// Validate a config file and print its normalized form.
    CheckConfig {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Parquet,
    Csv,
}

impl From<OutputFormat> for TableFormat {
    fn from(f: OutputFormat) -> Self {
        match f {
            OutputFormat::Parquet => TableFormat::Parquet,
            OutputFormat::Csv => TableFormat::Csv,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Clean {
            config,
            input,
            output_dir,
            calendar,
            start,
            end,
            format,
            sequential,
        } => {
            let opts = CleanOptions {
                config,
                input,
                output_dir,
                calendar,
                start: parse_date_arg(start.as_deref())?,
                end: parse_date_arg(end.as_deref())?,
                format: format.into(),
                sequential,
            };
            let report = run_clean(&opts)?;
            print_summary(&report);
            Ok(())
        }
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_date_arg(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
    })
    .transpose()
}

const DEFAULT_OUTPUT_DIR: &str = "qaqc_out";

struct CleanOptions {
    config: PathBuf,
    input: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    calendar: Option<PathBuf>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    format: TableFormat,
    sequential: bool,
}

/// Contents of `quality_report.json`.
#[derive(Debug, Serialize)]
struct QualityReport {
    config_hash: String,
    config: CleanerConfig,
    calendar_start: Option<NaiveDate>,
    calendar_end: Option<NaiveDate>,
    calendar_days: usize,
    total: usize,
    kept: usize,
    dropped: usize,
    instruments: Vec<CleaningInfo>,
    #[serde(skip)]
    output_dir: PathBuf,
}

fn run_clean(opts: &CleanOptions) -> Result<QualityReport> {
    let config = load_config(&opts.config)?;

    // Command-line paths win over the config's.
    let input = match opts.input.as_ref().or(config.input_parquet.as_ref()) {
        Some(path) => path.clone(),
        None => bail!("no input: pass --input or set input_parquet in the config"),
    };
    let output_dir = opts
        .output_dir
        .clone()
        .or_else(|| config.output_provider_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

    let tables = read_instrument_tables(&input)
        .with_context(|| format!("reading {}", input.display()))?;
    info!(instruments = tables.len(), input = %input.display(), "input loaded");

    let calendar = match &opts.calendar {
        Some(path) => read_calendar(path)
            .with_context(|| format!("reading calendar {}", path.display()))?,
        None => {
            let span = tables
                .values()
                .flat_map(|t| [t.index().first(), t.index().last()])
                .flatten();
            let first = span.clone().min().copied();
            let last = span.max().copied();
            match (opts.start.or(first), opts.end.or(last)) {
                (Some(start), Some(end)) => TradingCalendar::business_days(start, end),
                _ => bail!("input has no dates; pass --calendar or --start/--end"),
            }
        }
    };
    if calendar.is_empty() {
        bail!("trading calendar is empty");
    }
    info!(
        days = calendar.len(),
        start = ?calendar.first(),
        end = ?calendar.last(),
        "calendar ready"
    );

    let cleaner = Cleaner::new(Arc::new(calendar), &config)?.with_parallelism(!opts.sequential);
    let batch = cleaner.clean_many(tables);

    write_outputs(&batch, &output_dir, opts.format)?;

    let report = QualityReport {
        config_hash: config.config_hash(),
        config,
        calendar_start: cleaner.calendar().first(),
        calendar_end: cleaner.calendar().last(),
        calendar_days: cleaner.calendar().len(),
        total: batch.infos.len(),
        kept: batch.kept_count(),
        dropped: batch.dropped_count(),
        instruments: batch.infos.into_values().collect(),
        output_dir,
    };
    let report_path = report.output_dir.join("quality_report.json");
    fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("writing {}", report_path.display()))?;

    Ok(report)
}

/// Instrument ids become file names, so they must be a single plain path
/// component.
fn check_instrument_id(id: &str) -> Result<()> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        bail!("instrument id {id:?} cannot be used as a file name");
    }
    Ok(())
}

/// Write one file per kept instrument plus `instruments.txt`.
///
/// Every id is checked before anything is written.
fn write_outputs(batch: &BatchOutcome, output_dir: &Path, format: TableFormat) -> Result<()> {
    for instrument in batch.cleaned.keys() {
        check_instrument_id(instrument)?;
    }

    let features_dir = output_dir.join("features");
    fs::create_dir_all(&features_dir)
        .with_context(|| format!("creating {}", features_dir.display()))?;

    for (instrument, table) in &batch.cleaned {
        let path = features_dir.join(format!("{instrument}.{}", format.extension()));
        write_table(table, &path, format)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let mut listing = String::new();
    for (instrument, table) in &batch.cleaned {
        let (Some(start), Some(end)) = (table.index().first(), table.index().last()) else {
            continue;
        };
        listing.push_str(&format!("{instrument}\t{start}\t{end}\n"));
    }
    fs::write(output_dir.join("instruments.txt"), listing)?;
    Ok(())
}

/// Load a config and build the pipeline once against an empty calendar, so
/// config errors abort before any data is read.
fn load_config(path: &Path) -> Result<CleanerConfig> {
    let config = CleanerConfig::from_file(path)?;
    Cleaner::new(Arc::new(TradingCalendar::default()), &config)?;
    Ok(config)
}

fn run_check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    println!("Config OK: {}", path.display());
    println!("Hash:      {}", config.config_hash());
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}

fn print_summary(report: &QualityReport) {
    println!();
    println!("=== Cleaning Result ===");
    if let (Some(start), Some(end)) = (report.calendar_start, report.calendar_end) {
        println!("Calendar:       {start} to {end} ({} days)", report.calendar_days);
    }
    println!("Instruments:    {}", report.total);
    println!("Kept:           {}", report.kept);
    println!("Dropped:        {}", report.dropped);
    println!(
        "Config hash:    {}",
        report.config_hash.get(..12).unwrap_or(&report.config_hash)
    );
    println!("Output:         {}", report.output_dir.display());
}
