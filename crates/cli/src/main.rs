use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use periodband_core::{Bar, BarSeries, BarSource, Timeframe};
use periodband_indicators::{BandEngine, BandResult, EngineConfig};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "periodband")]
#[command(about = "Period-anchored VWAP bands over OHLCV bar files")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute bands for every bar in a CSV file
    Run {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,

        /// Engine configuration (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bar timeframe (e.g. "5m", "1h", "1d"); inferred from the data when omitted
        #[arg(short, long)]
        timeframe: Option<Timeframe>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Treat the last bar as still forming
        #[arg(long)]
        forming_last: bool,

        /// Feed bars one at a time instead of a single call
        #[arg(long)]
        stream: bool,
    },

    /// Check that bar-by-bar processing matches a single pass
    Verify {
        #[arg(short, long)]
        data: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        timeframe: Option<Timeframe>,
    },

    /// Print the resolved configuration
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Timeframe used to fit the reset policy
        #[arg(short, long, default_value = "1h")]
        timeframe: Timeframe,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

/// One output line. Sub-levels are flattened so the row works as a CSV record.
#[derive(Serialize)]
struct BandRow {
    index: usize,
    timestamp: String,
    close: f64,
    central: Option<f64>,
    upper: Option<f64>,
    lower: Option<f64>,
    upper_1: Option<f64>,
    upper_2: Option<f64>,
    upper_3: Option<f64>,
    lower_1: Option<f64>,
    lower_2: Option<f64>,
    lower_3: Option<f64>,
}

impl BandRow {
    fn new(index: usize, bar: &Bar, output: Option<&BandResult>) -> Self {
        let level = |i: usize| output.and_then(|o| o.sublevels[i]);
        Self {
            index,
            timestamp: bar.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            close: bar.close,
            central: output.map(|o| o.central_value),
            upper: output.and_then(|o| o.upper),
            lower: output.and_then(|o| o.lower),
            upper_1: level(0),
            upper_2: level(1),
            upper_3: level(2),
            lower_1: level(3),
            lower_2: level(4),
            lower_3: level(5),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            data,
            config,
            timeframe,
            format,
            forming_last,
            stream,
        } => {
            run_bands(data, config, timeframe, format, forming_last, stream)?;
        }
        Commands::Verify {
            data,
            config,
            timeframe,
        } => {
            verify_replay(data, config, timeframe)?;
        }
        Commands::Config { config, timeframe } => {
            print_config(config, timeframe)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn run_bands(
    data_path: PathBuf,
    config_path: Option<PathBuf>,
    timeframe: Option<Timeframe>,
    format: OutputFormat,
    forming_last: bool,
    stream: bool,
) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let mut series = periodband_data::load_series(&data_path, timeframe)?;
    series.set_last_forming(forming_last);

    tracing::info!(
        data = %data_path.display(),
        bars = series.count(),
        timeframe = %series.timeframe(),
        stream,
        "Computing bands"
    );

    let engine = if stream {
        run_streaming(&config, &series)
    } else {
        let mut engine = BandEngine::new(&config, series.timeframe());
        let report = engine.calculate(&series, series.count() - 1);
        tracing::debug!(processed = report.processed, "Single pass complete");
        engine
    };

    if let Some(from) = engine.coercion().downgraded_from {
        tracing::info!(from = %from, to = %engine.coercion().policy, "Reset policy coerced");
    }

    let rows: Vec<BandRow> = series
        .bars()
        .iter()
        .enumerate()
        .map(|(i, bar)| BandRow::new(i, bar, engine.output(i)))
        .collect();
    print_rows(&rows, format)
}

/// Replays the series bar by bar, as a host receiving live bars would.
fn run_streaming(config: &EngineConfig, series: &BarSeries) -> BandEngine {
    let mut live = BarSeries::new(series.timeframe());
    let mut engine = BandEngine::new(config, series.timeframe());
    let last = series.count() - 1;
    for (i, bar) in series.bars().iter().enumerate() {
        if i == last && series.last_bar_forming() {
            live.update_forming(*bar);
        } else {
            live.push(*bar);
        }
        engine.calculate(&live, i);
    }
    engine
}

fn verify_replay(
    data_path: PathBuf,
    config_path: Option<PathBuf>,
    timeframe: Option<Timeframe>,
) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let series = periodband_data::load_series(&data_path, timeframe)?;

    let streamed = run_streaming(&config, &series);
    let mut single = BandEngine::new(&config, series.timeframe());
    single.calculate(&series, series.count() - 1);

    let mismatch = streamed
        .outputs()
        .iter()
        .zip(single.outputs())
        .position(|(a, b)| a != b);

    let sep = "=".repeat(60);
    println!("\n{sep}");
    println!("  REPLAY VERIFICATION");
    println!("{sep}");
    println!("  Bars:            {}", series.count());
    println!("  Timeframe:       {}", series.timeframe());
    println!("  Policy:          {}", streamed.coercion().policy);
    println!("  Strategy:        {}", streamed.strategy_name());
    println!(
        "  Outputs:         {} streamed / {} single pass",
        streamed.outputs().len(),
        single.outputs().len()
    );
    println!("{sep}\n");

    if let Some(index) = mismatch {
        anyhow::bail!("Outputs diverge at bar {}", index);
    }
    if streamed.outputs().len() != single.outputs().len() || streamed.state() != single.state() {
        anyhow::bail!("Final period state differs between streamed and single pass");
    }
    println!("Streamed and single-pass outputs are identical");
    Ok(())
}

fn print_config(config_path: Option<PathBuf>, timeframe: Timeframe) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let engine = BandEngine::new(&config, timeframe);
    let resolved = config.resolve();

    let sep = "=".repeat(60);
    println!("\n{sep}");
    println!("  RESOLVED CONFIGURATION");
    println!("{sep}");
    println!("  Reset policy:    {}", resolved.policy);
    if let Some(from) = engine.coercion().downgraded_from {
        println!("  Effective:       {} (coerced from {} on {} bars)", engine.coercion().policy, from, timeframe);
    }
    println!("  Timezone:        {}", resolved.timezone);
    println!("  Price source:    {:?}", resolved.price_source);
    println!("  Band:            {}", resolved.band);
    println!("  Change check:    every {} calls", resolved.change_check_interval);
    println!("  Replay chunk:    {} bars", resolved.replay_chunk_size);
    if resolved.fallbacks.is_empty() {
        println!("  Fallbacks:       none");
    } else {
        for fallback in &resolved.fallbacks {
            println!("  Fallback:        {:?}", fallback);
        }
    }
    println!("{sep}\n");
    Ok(())
}

fn print_rows(rows: &[BandRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let cell = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
            println!(
                "{:>6}  {:<19}  {:>12}  {:>12}  {:>12}  {:>12}",
                "index", "timestamp", "close", "lower", "central", "upper"
            );
            for row in rows {
                println!(
                    "{:>6}  {:<19}  {:>12.4}  {:>12}  {:>12}  {:>12}",
                    row.index,
                    row.timestamp,
                    row.close,
                    cell(row.lower),
                    cell(row.central),
                    cell(row.upper)
                );
            }
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(io::stdout());
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        OutputFormat::Json => {
            for row in rows {
                println!("{}", serde_json::to_string(row)?);
            }
        }
    }
    Ok(())
}
