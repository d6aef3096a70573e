use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the supercache binary.
#[derive(Debug, Parser)]
#[command(
    name = "supercache",
    version,
    about = "Manage a disk-backed page cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SUPERCACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Clear something from the cache.
    Flush(FlushArgs),
    /// Show the latest cache statistics.
    Status,
    /// Turn the page cache on.
    Enable,
    /// Turn the page cache off.
    Disable,
    /// Prime the static tier before visitors request pages.
    Preload(PreloadArgs),
    /// Install the recommended cache configuration and enable the cache.
    Defaults,
    /// Run the garbage collection and preload scheduler until interrupted.
    Run(RunArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the directory holding cache entries.
    #[arg(long = "cache-dir", value_name = "PATH", value_hint = ValueHint::DirPath, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Override the directory holding persisted control state.
    #[arg(long = "state-dir", value_name = "PATH", value_hint = ValueHint::DirPath, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Override the content manifest used to resolve and render pages.
    #[arg(long = "manifest", value_name = "FILE", value_hint = ValueHint::FilePath, global = true)]
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FlushArgs {
    /// Purge every cached variant of this post id.
    #[arg(long = "post-id", value_name = "POST_ID", conflicts_with = "permalink")]
    pub post_id: Option<String>,

    /// Purge every cached variant of the post at this permalink.
    #[arg(long = "permalink", value_name = "PERMALINK")]
    pub permalink: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PreloadArgs {
    /// Show the progress of the current preload instead of starting one.
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "cancel")]
    pub status: bool,

    /// Cancel the current preload.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub cancel: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RunArgs {
    /// Override the interval between preload ticks.
    #[arg(long = "preload-tick-seconds", value_name = "SECONDS")]
    pub preload_tick_seconds: Option<u64>,

    /// Override the number of expired entries removed per collection batch.
    #[arg(long = "gc-batch-size", value_name = "COUNT")]
    pub gc_batch_size: Option<u64>,
}
