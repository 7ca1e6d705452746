use std::path::PathBuf;

use clap::Parser;

use crate::core::decode::OutputFormat;

#[derive(Parser, Debug, Clone)]
#[command(name = "host-monitor")]
pub struct Args {
    /// Identifier of the reporting device (stored as the `device_id` dimension).
    pub device: String,

    /// Seconds between two sampling iterations.
    #[arg(long, default_value_t = 10)]
    pub interval_secs: u64,

    /// SQLite file backing the measurement store (`:memory:` for a throwaway store).
    #[arg(long, default_value = "host-metrics.db")]
    pub db_path: PathBuf,

    /// Database name the store file is attached as.
    #[arg(long, default_value = "monitoring")]
    pub database: String,

    /// Table receiving the measurements.
    #[arg(long, default_value = "host_metrics")]
    pub table: String,

    /// Row limit appended to the read-back query.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Rows requested per page (store default when omitted).
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Maximum nesting depth accepted by the result decoder.
    #[arg(long, default_value_t = crate::core::decode::DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// Rendering of decoded rows.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Additional query to run after the read-back (repeatable).
    #[arg(long = "query")]
    pub queries: Vec<String>,

    /// Submit and cancel the base query on every iteration.
    #[arg(long)]
    pub cancel_probe: bool,

    /// Logging level (stderr). Also supports RUST_LOG.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
