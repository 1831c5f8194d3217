//! # Configuration
//!
//! Benchmark and tree knobs, ingested from a key=value file and a
//! matching command-line surface. The file is parsed first; command-line
//! flags override it; positional arguments are input key files processed
//! in order.
//!
//! File format: one `KNOB=value` per line, whitespace stripped, `#`
//! comments skipped, string values quoted, booleans spelled `true` /
//! `false`. Unrecognized knobs produce a diagnostic and are ignored.
//!
//! - [`constants`]: block geometry and derived compile-time constants

pub mod constants;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use eyre::{Result, WrapErr};
use tracing::warn;

/// Which tree the benchmark drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TreeVariant {
    /// Concurrent fast-path tree with sorted leaves.
    Quit,
    /// Concurrent fast-path tree with append-then-sort leaves.
    QuitAppend,
    /// Single-threaded last-inserted-leaf baseline.
    Lil,
}

impl TreeVariant {
    pub fn name(&self) -> &'static str {
        match self {
            TreeVariant::Quit => "quit",
            TreeVariant::QuitAppend => "quit-append",
            TreeVariant::Lil => "lil",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Block manager arena size, in blocks.
    pub blocks_in_memory: usize,
    /// Percentage of the loaded keys issued as lookups after load.
    pub raw_read_perc: u32,
    /// Percentage of the data reserved for post-load writes.
    pub raw_write_perc: u32,
    /// Percentage of the data inserted during the interleaved phase.
    pub mixed_writes_perc: u32,
    /// Percentage of the data looked up during the interleaved phase.
    pub mixed_reads_perc: u32,
    /// Percentage of the loaded keys issued as value overwrites.
    pub updates_perc: u32,
    /// Range scans targeting 1/1000 of the load each.
    pub short_range: usize,
    /// Range scans targeting 1/100 of the load each.
    pub mid_range: usize,
    /// Range scans targeting 1/10 of the load each.
    pub long_range: usize,
    /// Fresh-tree repetitions of the whole workload.
    pub runs: usize,
    /// Repetitions of the file list within one run.
    pub repeat: usize,
    /// RNG seed for query sampling and the mixed-phase coin.
    pub seed: u64,
    /// Worker pool size.
    pub num_threads: usize,
    /// Output CSV path (appended).
    pub results_csv: PathBuf,
    /// Log path.
    pub results_log: PathBuf,
    /// Parse input files as host-order binary rather than text.
    pub binary_input: bool,
    /// Issue `contains` for every inserted key after each run.
    pub validate: bool,
    /// Per-phase log output.
    pub verbose: bool,
    /// Tree under test.
    pub tree: TreeVariant,
    /// Input key files, processed in order.
    pub files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blocks_in_memory: 1 << 18,
            raw_read_perc: 0,
            raw_write_perc: 0,
            mixed_writes_perc: 0,
            mixed_reads_perc: 0,
            updates_perc: 0,
            short_range: 0,
            mid_range: 0,
            long_range: 0,
            runs: 1,
            repeat: 1,
            seed: 1234,
            num_threads: 1,
            results_csv: PathBuf::from("results.csv"),
            results_log: PathBuf::from("results.log"),
            binary_input: true,
            validate: false,
            verbose: false,
            tree: TreeVariant::Quit,
            files: Vec::new(),
        }
    }
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_bool(value: &str) -> bool {
    value == "true"
}

impl Config {
    /// Folds a key=value file into this configuration. Unknown knobs are
    /// logged and skipped; malformed numbers are errors.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("cannot read config file {}", path.display()))?;
        for raw in text.lines() {
            let line: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                warn!(line = raw, "ignoring config line without '='");
                continue;
            };
            self.apply_knob(name, value)
                .wrap_err_with(|| format!("bad value for {name} in {}", path.display()))?;
        }
        Ok(())
    }

    fn apply_knob(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "BLOCKS_IN_MEMORY" => self.blocks_in_memory = value.parse()?,
            "RAW_READS_PERCENTAGE" => self.raw_read_perc = value.parse()?,
            "RAW_WRITES_PERCENTAGE" => self.raw_write_perc = value.parse()?,
            "MIXED_WRITES_PERCENTAGE" => self.mixed_writes_perc = value.parse()?,
            "MIXED_READ_PERCENTAGE" => self.mixed_reads_perc = value.parse()?,
            "UPDATES_PERCENTAGE" => self.updates_perc = value.parse()?,
            "SHORT_RANGE_QUERIES" => self.short_range = value.parse()?,
            "MID_RANGE_QUERIES" => self.mid_range = value.parse()?,
            "LONG_RANGE_QUERIES" => self.long_range = value.parse()?,
            "RUNS" => self.runs = value.parse()?,
            "REPEAT" => self.repeat = value.parse()?,
            "SEED" => self.seed = value.parse()?,
            "NUM_THREADS" => self.num_threads = value.parse()?,
            "RESULTS_FILE" => self.results_csv = PathBuf::from(strip_quotes(value)),
            "RESULTS_LOG" => self.results_log = PathBuf::from(strip_quotes(value)),
            "BINARY_INPUT" => self.binary_input = parse_bool(value),
            "VALIDATE" => self.validate = parse_bool(value),
            "VERBOSE" => self.verbose = parse_bool(value),
            _ => warn!(knob = name, "ignoring unrecognized config knob"),
        }
        Ok(())
    }
}

/// Command-line surface. Every file knob has a flag twin; flags override
/// the file. Trailing arguments are input key files.
#[derive(Debug, Parser)]
#[command(name = "hotleaf-bench", about = "hotleaf index benchmark driver")]
pub struct Args {
    /// Key=value config file folded in before the flags.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub blocks_in_memory: Option<usize>,
    #[arg(long)]
    pub raw_read_perc: Option<u32>,
    #[arg(long)]
    pub raw_write_perc: Option<u32>,
    #[arg(long)]
    pub mixed_writes_perc: Option<u32>,
    #[arg(long)]
    pub mixed_reads_perc: Option<u32>,
    #[arg(long)]
    pub updates_perc: Option<u32>,
    #[arg(long)]
    pub short_range: Option<usize>,
    #[arg(long)]
    pub mid_range: Option<usize>,
    #[arg(long)]
    pub long_range: Option<usize>,
    #[arg(long)]
    pub runs: Option<usize>,
    #[arg(long)]
    pub repeat: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub num_threads: Option<usize>,
    #[arg(long)]
    pub results_csv: Option<PathBuf>,
    #[arg(long)]
    pub results_log: Option<PathBuf>,

    /// Parse input files as one decimal key per line instead of binary.
    #[arg(long)]
    pub txt_input: bool,
    /// Check `contains` for every inserted key after each run.
    #[arg(long)]
    pub validate: bool,
    /// Per-phase log output.
    #[arg(long)]
    pub verbose: bool,

    /// Tree under test.
    #[arg(long, value_enum)]
    pub tree: Option<TreeVariant>,

    /// Input key files.
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

/// Builds the effective configuration: defaults, then the config file (if
/// any), then command-line overrides.
pub fn resolve(args: Args) -> Result<Config> {
    let mut conf = Config::default();
    if let Some(path) = &args.config {
        conf.load_file(path)?;
    }

    macro_rules! override_from {
        ($($field:ident),+ $(,)?) => {
            $(if let Some(v) = args.$field { conf.$field = v; })+
        };
    }
    override_from!(
        blocks_in_memory,
        raw_read_perc,
        raw_write_perc,
        mixed_writes_perc,
        mixed_reads_perc,
        updates_perc,
        short_range,
        mid_range,
        long_range,
        runs,
        repeat,
        seed,
        num_threads,
        results_csv,
        results_log,
    );
    if args.txt_input {
        conf.binary_input = false;
    }
    if args.validate {
        conf.validate = true;
    }
    if args.verbose {
        conf.verbose = true;
    }
    if let Some(tree) = args.tree {
        conf.tree = tree;
    }
    if !args.files.is_empty() {
        conf.files = args.files;
    }
    Ok(conf)
}
