//! Configuration module

pub mod cli;
pub mod settings;

pub use cli::{
    CacheCommand, CliArgs, Command, ConfigCommand, ExportArgs, LoadArgs, OutputFormat,
    SelectionArgs, SplitArg,
};
pub use settings::{
    default_base_dir, default_settings_path, ConfigOption, ConfigStore, ValidationMode,
};
