use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};

use ifscan::anomaly::detect;
use ifscan::dataset::{load_dataset, Dataset};
use ifscan::forest::{
    Contamination, ForestConfig, IsolationForest, MaxSamples, DEFAULT_CONTAMINATION,
    DEFAULT_MAX_FEATURES, DEFAULT_SEED, DEFAULT_TREES,
};
use ifscan::histogram::{BinRange, ChartConfig, Histogram};
use ifscan::render::{render_text, render_tui};
use ifscan::report::{
    anomalies_json, print_anomalies, print_detection_summary, print_summary, print_table,
};
use ifscan::Result;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "ifscan", about = "Isolation-forest anomaly scan over traffic counters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct CommonArgs {
    /// Counter table: six whitespace-separated numbers per line
    /// (ack syn arp icmp traffic port), no header
    #[arg(default_value = "data.txt")]
    input: PathBuf,
    /// Log stage timings and fit details to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Clone)]
struct ForestArgs {
    /// Number of isolation trees
    #[arg(long, default_value_t = DEFAULT_TREES)]
    trees: usize,
    /// Expected share of anomalous rows, or "auto"
    #[arg(long, default_value_t = Contamination::Fraction(DEFAULT_CONTAMINATION))]
    contamination: Contamination,
    /// Features drawn for each tree
    #[arg(long, default_value_t = DEFAULT_MAX_FEATURES)]
    max_features: usize,
    /// Rows drawn for each tree, or "auto" (min(256, rows))
    #[arg(long, default_value_t = MaxSamples::Auto)]
    max_samples: MaxSamples,
    /// Random seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

impl ForestArgs {
    fn config(&self) -> ForestConfig {
        ForestConfig {
            n_trees: self.trees,
            contamination: self.contamination,
            max_features: self.max_features,
            max_samples: self.max_samples,
            seed: self.seed,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DisplayMode {
    /// Interactive chart in the terminal (press q to close)
    Tui,
    /// Text histogram on stdout
    Text,
    /// No chart
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the loaded table and per-column statistics
    Table {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Fit the forest, report anomalous rows and chart the scores
    Detect {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        forest: ForestArgs,
        /// Output the anomaly report as JSON (no table or chart)
        #[arg(long)]
        json: bool,
        /// How to show the score histogram
        #[arg(long, value_enum, default_value_t = DisplayMode::Tui)]
        display: DisplayMode,
        /// Derive histogram bins from the scores instead of the fixed range
        #[arg(long)]
        auto_range: bool,
    },
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn load(path: &Path) -> Result<Dataset> {
    let t0 = Instant::now();
    let dataset = load_dataset(path)?;
    log::debug!("load: {:.4}s", t0.elapsed().as_secs_f64());
    Ok(dataset)
}

fn cmd_table(c: CommonArgs) -> Result<()> {
    let dataset = load(&c.input)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    print_table(&mut out, &dataset)?;
    print_summary(&mut out, &dataset)?;
    Ok(())
}

fn cmd_detect(
    c: CommonArgs,
    forest_args: ForestArgs,
    json: bool,
    display: DisplayMode,
    auto_range: bool,
) -> Result<()> {
    let dataset = load(&c.input)?;
    let config = forest_args.config();

    if !json {
        print_table(&mut io::stdout().lock(), &dataset)?;
    }

    let mut forest = IsolationForest::new(config);
    let detection = detect(&mut forest, &dataset)?;

    if json {
        let report = anomalies_json(&dataset, &detection, &config, forest.offset());
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        println!("{text}");
        return Ok(());
    }

    {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        print_detection_summary(&mut out, &detection, &config, forest.offset())?;
        print_anomalies(&mut out, &dataset, &detection)?;
        out.flush()?;
    }

    let chart = ChartConfig {
        threshold: detection.threshold,
        range: if auto_range { BinRange::FromScores } else { BinRange::Fixed },
        ..ChartConfig::default()
    };
    let hist = Histogram::build(&detection.scores, &chart)?;
    match display {
        DisplayMode::Tui => render_tui(&hist, &chart),
        DisplayMode::Text => Ok(render_text(&mut io::stdout().lock(), &hist, &chart)?),
        DisplayMode::Off => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Commands::Table { common } | Commands::Detect { common, .. } => common.verbose,
    };
    init_logging(verbose);

    let result = match cli.command {
        Commands::Table { common } => cmd_table(common),
        Commands::Detect { common, forest, json, display, auto_range } =>
            cmd_detect(common, forest, json, display, auto_range),
    };
    if let Err(e) = result {
        eprintln!("error: {}: {e}", e.stage());
        std::process::exit(1);
    }
}
