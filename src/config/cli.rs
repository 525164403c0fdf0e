//! Command-line argument parsing

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Download, cache and inspect machine learning datasets
#[derive(Parser, Debug, Clone)]
#[command(name = "mldata")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Settings file (default: ~/.mldata.cfg)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory for this run only (overrides base_dir)
    #[arg(long = "base-dir", global = true)]
    pub base_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Quiet mode (errors only, no progress bars)
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load MNIST (fetching it if needed) and print a summary
    Load(LoadArgs),

    /// Write MNIST as train.csv and test.csv (flattened images)
    ExportCsv(ExportArgs),

    /// Show or change settings
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Inspect or clear the local cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

/// Selection applied after loading
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Load a previously saved dataset instead of the full one
    #[arg(long = "from-saved", value_name = "NAME")]
    pub from_saved: Option<String>,

    /// Shuffle both splits with this seed
    #[arg(long = "shuffle", value_name = "SEED")]
    pub shuffle: Option<u64>,

    /// Keep this many training items (per label with --balanced)
    #[arg(long = "train-items", value_name = "N")]
    pub train_items: Option<usize>,

    /// Keep this many test items (per label with --balanced)
    #[arg(long = "test-items", value_name = "N")]
    pub test_items: Option<usize>,

    /// Count --train-items/--test-items per label
    #[arg(long = "balanced")]
    pub balanced: bool,
}

impl SelectionArgs {
    /// Whether any reduction was requested
    pub fn reduces(&self) -> bool {
        self.train_items.is_some() || self.test_items.is_some()
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Split to load
    #[arg(long = "split", value_enum, default_value_t = SplitArg::All)]
    pub split: SplitArg,

    /// Download the files again even if cached
    #[arg(long = "refetch")]
    pub refetch: bool,

    /// Number of digits to render as ASCII art
    #[arg(long = "show", default_value_t = 1)]
    pub show: usize,

    /// Save the (reduced) result under this name
    #[arg(long = "save", value_name = "NAME")]
    pub save: Option<String>,

    /// List saved datasets and exit
    #[arg(long = "list-saved")]
    pub list_saved: bool,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Output directory
    pub out_dir: PathBuf,

    /// Omit the label,pixel_0,... header row
    #[arg(long = "no-header")]
    pub no_header: bool,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print every option with its effective value
    List,
    /// Print one option
    Get { option: String },
    /// Validate and persist a value
    Set { option: String, value: String },
    /// Restore an option's default
    Unset { option: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Per-dataset file counts and sizes
    Status {
        #[arg(long = "output-format", value_enum, default_value_t = OutputFormat::Text)]
        output_format: OutputFormat,
    },
    /// Delete a dataset's cached files
    Clear {
        #[arg(default_value = "mnist")]
        dataset: String,
    },
}

/// Split selection on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitArg {
    Train,
    Test,
    #[default]
    All,
}

/// Output format for results
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        let selection = match &self.command {
            Command::Load(args) => {
                if args.save.is_some() && args.split != SplitArg::All {
                    return Err("--save requires --split all".to_string());
                }
                &args.selection
            }
            Command::ExportCsv(args) => &args.selection,
            _ => return Ok(()),
        };

        if selection.balanced && !selection.reduces() {
            return Err("--balanced requires --train-items or --test-items".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_defaults() {
        let args = CliArgs::parse_from(["mldata", "load"]);
        match args.command {
            Command::Load(load) => {
                assert_eq!(load.split, SplitArg::All);
                assert_eq!(load.show, 1);
                assert!(!load.refetch);
                assert!(load.selection.shuffle.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(!args.verbose);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::parse_from(["mldata", "cache", "status", "--base-dir", "/tmp/x", "-v"]);
        assert_eq!(args.base_dir, Some(PathBuf::from("/tmp/x")));
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Command::Cache(CacheCommand::Status {
                output_format: OutputFormat::Text
            })
        ));
    }

    #[test]
    fn test_config_set() {
        let args = CliArgs::parse_from(["mldata", "config", "set", "base_dir", "/data"]);
        match args.command {
            Command::Config(ConfigCommand::Set { option, value }) => {
                assert_eq!(option, "base_dir");
                assert_eq!(value, "/data");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_export_with_selection() {
        let args = CliArgs::parse_from([
            "mldata",
            "export-csv",
            "out",
            "--train-items",
            "100",
            "--test-items",
            "10",
            "--balanced",
            "--shuffle",
            "42",
        ]);
        assert!(args.validate().is_ok());
        match args.command {
            Command::ExportCsv(export) => {
                assert_eq!(export.out_dir, PathBuf::from("out"));
                assert_eq!(export.selection.train_items, Some(100));
                assert_eq!(export.selection.shuffle, Some(42));
                assert!(!export.no_header);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_validation() {
        let args = CliArgs::parse_from(["mldata", "load", "--balanced"]);
        assert!(args.validate().is_err());

        let args = CliArgs::parse_from(["mldata", "load", "--split", "test", "--save", "x"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(CliArgs::try_parse_from(["mldata", "-v", "-q", "load"]).is_err());
    }
}
