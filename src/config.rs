//! Configuration types for skyshard
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Field mapping arguments (`KEY=COLUMN`)

use crate::error::ConfigError;
use crate::index::{HtmIndexer, DEFAULT_INDEX_DEPTH, MAX_INDEX_DEPTH};
use crate::record::FieldMapping;
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Maximum reasonable worker count
pub const MAX_WORKERS: usize = 512;

/// Regex for `KEY=COLUMN` mapping arguments
static MAPPING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(\S.*)$").expect("Invalid mapping regex")
});

/// Spatially sharded catalog ingestion
#[derive(Parser, Debug, Clone)]
#[command(
    name = "skyshard",
    version,
    about = "Ingest astronomical source catalogs into spatially indexed shards",
    long_about = "Reads catalog files (CSV, TSV, Parquet), computes a sky cell for every row,\n\
                  and appends rows to one Parquet shard per cell under the output root.\n\n\
                  Shards are appended under per-shard locks, so several runs may share\n\
                  one output root.",
    after_help = "EXAMPLES:\n    \
        skyshard ingest /data/gaia -o /catalogs/gaia --ra-column ra --dec-column dec\n    \
        skyshard ingest part-*.csv -o out --mag g=phot_g_mean_mag --flag variable=var -w 16\n    \
        skyshard locate --ra 150.1 --dec 2.2 --neighbors\n    \
        skyshard status -o /catalogs/gaia"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Ingest input files into the catalog
    Ingest(IngestArgs),

    /// Print the shard id of a sky position
    Locate(LocateArgs),

    /// Show ledger entries of a catalog
    Status(StatusArgs),
}

/// Arguments of `skyshard ingest`
#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Input files or directories (searched recursively)
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output catalog root
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Index depth (shard count grows 4x per level)
    #[arg(short = 'd', long, default_value_t = DEFAULT_INDEX_DEPTH, value_name = "NUM")]
    pub depth: u8,

    /// Spatial indexer
    #[arg(long, default_value = HtmIndexer::NAME, value_name = "NAME")]
    pub indexer: String,

    /// Number of worker threads
    #[arg(
        short = 'w',
        long,
        default_value_t = default_workers(),
        value_name = "NUM"
    )]
    pub workers: usize,

    /// Input format (csv, tsv, parquet); detected from the extension if not set
    #[arg(short = 'f', long, value_name = "NAME")]
    pub format: Option<String>,

    /// Field delimiter for CSV input (single character, or "tab")
    #[arg(long, value_name = "CHAR")]
    pub delimiter: Option<String>,

    /// Only ingest files with this extension (can be repeated)
    #[arg(long = "extension", value_name = "EXT", action = clap::ArgAction::Append)]
    pub extensions: Vec<String>,

    /// Exclude paths matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Column holding the source identifier
    #[arg(long, default_value = "id", value_name = "COL")]
    pub id_column: String,

    /// Column holding right ascension (degrees)
    #[arg(long, default_value = "ra", value_name = "COL")]
    pub ra_column: String,

    /// Column holding declination (degrees)
    #[arg(long, default_value = "dec", value_name = "COL")]
    pub dec_column: String,

    #[arg(long, value_name = "COL")]
    pub ra_err_column: Option<String>,

    #[arg(long, value_name = "COL")]
    pub dec_err_column: Option<String>,

    #[arg(long, value_name = "COL")]
    pub pm_ra_column: Option<String>,

    #[arg(long, value_name = "COL")]
    pub pm_dec_column: Option<String>,

    #[arg(long, value_name = "COL")]
    pub epoch_column: Option<String>,

    /// Magnitude column for a band (can be repeated)
    #[arg(long = "mag", value_name = "BAND=COL", action = clap::ArgAction::Append)]
    pub magnitudes: Vec<String>,

    /// Magnitude error column for a band (can be repeated)
    #[arg(long = "mag-err", value_name = "BAND=COL", action = clap::ArgAction::Append)]
    pub magnitude_errors: Vec<String>,

    /// Boolean flag column (can be repeated)
    #[arg(long = "flag", value_name = "NAME=COL", action = clap::ArgAction::Append)]
    pub flags: Vec<String>,

    /// Extra column copied as text (can be repeated)
    #[arg(long = "extra", value_name = "NAME=COL", action = clap::ArgAction::Append)]
    pub extras: Vec<String>,

    /// Re-ingest files a previous run left part way (may duplicate rows)
    #[arg(long)]
    pub allow_duplicates: bool,

    /// Do not consult or update the ingest ledger
    #[arg(long)]
    pub no_ledger: bool,

    /// Write a JSON run report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

/// Arguments of `skyshard locate`
#[derive(Args, Debug, Clone)]
pub struct LocateArgs {
    /// Right ascension in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub ra: f64,

    /// Declination in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub dec: f64,

    /// Index depth
    #[arg(short = 'd', long, default_value_t = DEFAULT_INDEX_DEPTH, value_name = "NUM")]
    pub depth: u8,

    /// Spatial indexer
    #[arg(long, default_value = HtmIndexer::NAME, value_name = "NAME")]
    pub indexer: String,

    /// Also print neighboring shard ids
    #[arg(long)]
    pub neighbors: bool,
}

/// Arguments of `skyshard status`
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Catalog root
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// List every file, not only those needing attention
    #[arg(long)]
    pub all: bool,
}

fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

/// Validated ingest configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Input files or directories
    pub inputs: Vec<PathBuf>,

    /// Catalog root directory
    pub output_root: PathBuf,

    /// Indexer name
    pub indexer: String,

    /// Index depth
    pub depth: u8,

    /// Shard store name
    pub store: String,

    /// Number of worker threads
    pub worker_count: usize,

    /// Forced input format
    pub format: Option<String>,

    /// CSV delimiter override
    pub delimiter: Option<u8>,

    /// Extension filter (lowercase, no dot); empty means every known format
    pub extensions: Vec<String>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Logical field to raw column mapping
    pub mapping: FieldMapping,

    /// Re-ingest files that may already have written rows
    pub allow_duplicates: bool,

    /// Consult and update the ledger
    pub use_ledger: bool,

    /// JSON report destination
    pub report_path: Option<PathBuf>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl IngestConfig {
    /// Defaults for programmatic use
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            inputs: Vec::new(),
            output_root: output_root.into(),
            indexer: HtmIndexer::NAME.to_string(),
            depth: DEFAULT_INDEX_DEPTH,
            store: "parquet".to_string(),
            worker_count: default_workers(),
            format: None,
            delimiter: None,
            extensions: Vec::new(),
            exclude_patterns: Vec::new(),
            mapping: FieldMapping::default(),
            allow_duplicates: false,
            use_ledger: true,
            report_path: None,
            show_progress: false,
            verbose: false,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: IngestArgs, verbose: bool) -> Result<Self, ConfigError> {
        // Validate worker count
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        // Validate depth
        if args.depth > MAX_INDEX_DEPTH {
            return Err(ConfigError::InvalidDepth {
                depth: args.depth,
                max: MAX_INDEX_DEPTH,
            });
        }

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let delimiter = args.delimiter.as_deref().map(parse_delimiter).transpose()?;

        let extensions = args
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        let mapping = FieldMapping {
            id: args.id_column,
            ra: args.ra_column,
            dec: args.dec_column,
            ra_err: args.ra_err_column,
            dec_err: args.dec_err_column,
            pm_ra: args.pm_ra_column,
            pm_dec: args.pm_dec_column,
            epoch: args.epoch_column,
            magnitudes: parse_pairs(&args.magnitudes)?,
            magnitude_errors: parse_pairs(&args.magnitude_errors)?,
            flags: parse_pairs(&args.flags)?,
            extras: parse_pairs(&args.extras)?,
        };

        // Catch duplicate or orphaned fields before any file is touched
        mapping.field_specs()?;

        for input in &args.inputs {
            if !input.exists() {
                return Err(ConfigError::MissingInput(input.clone()));
            }
        }

        Ok(Self {
            inputs: args.inputs,
            output_root: args.output,
            indexer: args.indexer,
            depth: args.depth,
            store: "parquet".to_string(),
            worker_count: args.workers,
            format: args.format,
            delimiter,
            extensions,
            exclude_patterns,
            mapping,
            allow_duplicates: args.allow_duplicates,
            use_ledger: !args.no_ledger,
            report_path: args.report,
            show_progress: !args.quiet,
            verbose,
        })
    }
}

/// Parse a `KEY=COLUMN` argument
pub fn parse_pair(arg: &str) -> Result<(String, String), ConfigError> {
    let caps = MAPPING_REGEX
        .captures(arg.trim())
        .ok_or_else(|| ConfigError::InvalidMapping {
            arg: arg.to_string(),
            reason: "expected NAME=COLUMN with NAME made of letters, digits, and '_'".into(),
        })?;

    Ok((caps[1].to_string(), caps[2].trim().to_string()))
}

fn parse_pairs(args: &[String]) -> Result<Vec<(String, String)>, ConfigError> {
    args.iter().map(|a| parse_pair(a)).collect()
}

fn parse_delimiter(text: &str) -> Result<u8, ConfigError> {
    match text {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        _ if text.len() == 1 && text.is_ascii() => Ok(text.as_bytes()[0]),
        _ => Err(ConfigError::InvalidDelimiter(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<IngestConfig, ConfigError> {
        let mut argv = vec!["skyshard", "ingest", "."];
        argv.extend_from_slice(args);
        let cli = CliArgs::try_parse_from(argv).unwrap();
        match cli.command {
            Command::Ingest(args) => IngestConfig::from_args(args, cli.verbose),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["-o", "out"]).unwrap();
        assert_eq!(config.depth, DEFAULT_INDEX_DEPTH);
        assert_eq!(config.indexer, "htm");
        assert!(config.use_ledger);
        assert!(config.show_progress);
        assert_eq!(config.mapping, FieldMapping::default());
        assert!(config.worker_count >= 1);
    }

    #[test]
    fn test_mapping_arguments() {
        let config = parse(&[
            "-o", "out",
            "--id-column", "source_id",
            "--mag", "g=phot_g_mean_mag",
            "--mag-err", "g=phot_g_err",
            "--flag", "variable=var_flag",
            "--extra", "designation=designation",
        ])
        .unwrap();

        assert_eq!(config.mapping.id, "source_id");
        assert_eq!(
            config.mapping.magnitudes,
            vec![("g".to_string(), "phot_g_mean_mag".to_string())]
        );
        assert_eq!(config.mapping.flags[0].0, "variable");
    }

    #[test]
    fn test_invalid_worker_count() {
        assert!(matches!(
            parse(&["-o", "out", "-w", "0"]),
            Err(ConfigError::InvalidWorkerCount { .. })
        ));
        assert!(matches!(
            parse(&["-o", "out", "-w", "10000"]),
            Err(ConfigError::InvalidWorkerCount { .. })
        ));
    }

    #[test]
    fn test_invalid_depth() {
        assert!(matches!(
            parse(&["-o", "out", "--depth", "11"]),
            Err(ConfigError::InvalidDepth { depth: 11, .. })
        ));
    }

    #[test]
    fn test_invalid_mapping() {
        assert!(matches!(
            parse(&["-o", "out", "--mag", "g"]),
            Err(ConfigError::InvalidMapping { .. })
        ));
        assert!(matches!(
            parse(&["-o", "out", "--flag", "id=x"]),
            Err(ConfigError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_delimiter() {
        assert_eq!(parse_delimiter("|").unwrap(), b'|');
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert!(parse_delimiter("::").is_err());
        assert!(matches!(
            parse(&["-o", "out", "--delimiter", "ab"]),
            Err(ConfigError::InvalidDelimiter(_))
        ));
    }

    #[test]
    fn test_missing_input() {
        let cli = CliArgs::try_parse_from(["skyshard", "ingest", "/nonexistent/skyshard", "-o", "out"])
            .unwrap();
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert!(matches!(
            IngestConfig::from_args(args, false),
            Err(ConfigError::MissingInput(_))
        ));
    }

    #[test]
    fn test_exclude_pattern() {
        let config = parse(&["-o", "out", "--exclude", r"\.bak$"]).unwrap();
        assert_eq!(config.exclude_patterns.len(), 1);
        assert!(config.exclude_patterns[0].is_match("/data/part-1.csv.bak"));
        assert!(!config.exclude_patterns[0].is_match("/data/part-1.csv"));

        assert!(matches!(
            parse(&["-o", "out", "--exclude", "("]),
            Err(ConfigError::InvalidExcludePattern { .. })
        ));
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("r = rmag").unwrap_err().to_string(),
            ConfigError::InvalidMapping {
                arg: "r = rmag".into(),
                reason: "expected NAME=COLUMN with NAME made of letters, digits, and '_'".into(),
            }
            .to_string()
        );
        assert_eq!(
            parse_pair("r=rmag").unwrap(),
            ("r".to_string(), "rmag".to_string())
        );
    }

    #[test]
    fn test_locate_args_accept_negative_dec() {
        let cli = CliArgs::try_parse_from(["skyshard", "locate", "--ra", "10", "--dec", "-45.5"])
            .unwrap();
        match cli.command {
            Command::Locate(args) => assert_eq!(args.dec, -45.5),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
