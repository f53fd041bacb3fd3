use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser, Debug)]
#[command(
    name = "tidyledger",
    version,
    about = "Rule-driven maintenance for a remote personal-finance ledger"
)]
struct Cli {
    /// Configuration file (default: ./tidyledger.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Skip every confirmation prompt
    #[arg(long, global = true)]
    yes: bool,

    /// Start of the transaction window (default: --relative-months back)
    #[arg(long, global = true)]
    start: Option<NaiveDate>,

    /// End of the transaction window (default: today)
    #[arg(long, global = true)]
    end: Option<NaiveDate>,

    /// Window size when --start is not given
    #[arg(long, global = true, default_value_t = 3)]
    relative_months: u32,

    /// Reuse the snapshot cache instead of fetching
    #[arg(long, global = true)]
    use_cache: bool,

    #[arg(long, global = true, default_value = ".tidyledger-cache.json")]
    cache_file: PathBuf,

    /// Evaluate and review but push nothing
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the maintenance rules over the window and commit the result
    Transform {
        /// Run exactly this rule, ignoring the default set
        #[arg(long)]
        run: Option<String>,

        /// Remove a rule from the default set (repeatable)
        #[arg(long)]
        disable: Vec<String>,

        /// Free-form configuration string some rules require
        #[arg(long)]
        rule_config: Option<String>,

        /// Print the registered rules and exit
        #[arg(long)]
        list_rules: bool,

        /// Apply the unset/update/re-set choreography without asking
        #[arg(long)]
        always_override_reconciled: bool,
    },

    /// Pair matching withdrawal/deposit legs into transfers
    Merge {
        #[arg(long, default_value_t = 0)]
        max_days_differences: i64,

        /// Default: 0.0001
        #[arg(long)]
        max_amount_differences: Option<Decimal>,

        #[arg(long, default_value_t = 3)]
        batch_size: usize,
    },

    /// Create transactions from a bank CSV export
    ImportCsv {
        file: PathBuf,

        /// Statement account, fixed on the source side
        #[arg(long, conflicts_with = "destination_name")]
        source_name: Option<String>,

        /// Statement account, fixed on the destination side
        #[arg(long)]
        destination_name: Option<String>,

        #[arg(long)]
        date_column: Option<usize>,
        #[arg(long)]
        description_column: Option<usize>,
        #[arg(long)]
        amount_column: Option<usize>,
        #[arg(long)]
        debit_column: Option<usize>,
        #[arg(long)]
        credit_column: Option<usize>,
        #[arg(long)]
        external_id_column: Option<usize>,
        #[arg(long)]
        date_format: Option<String>,
        #[arg(long)]
        delimiter: Option<String>,
        #[arg(long)]
        no_header: bool,
        #[arg(long)]
        skip_rows: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    commands::run(cli, config).await
}
