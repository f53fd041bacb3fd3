use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use rust_decimal::Decimal;
use tracing::{info, warn};

use tidyledger_client::{HttpClient, LedgerClient};
use tidyledger_core::{DateRange, Transaction};
use tidyledger_engine::{
    build_rules, CommitOptions, Orchestrator, Prompter, RuleSelection, StdinPrompter,
    TransferOptions, TransferReconciler,
};
use tidyledger_import::{import_csv, CsvProfile, ImportOptions};

use crate::config::AppConfig;
use crate::{Cli, Command};

pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let client = HttpClient::new(&config.host, &config.token);
    let range = date_range(&cli);
    let mut prompter = StdinPrompter::default();

    match &cli.command {
        Command::Transform {
            run,
            disable,
            rule_config,
            list_rules,
            always_override_reconciled,
        } => {
            let mut rules = build_rules(&config.rules)?;
            if *list_rules {
                for rule in &rules {
                    let tier = if rule.enabled_by_default() {
                        "default"
                    } else {
                        "opt-in"
                    };
                    println!("{} ({})", rule.base_name(), tier);
                }
                return Ok(());
            }
            let batch = load_batch(&client, range, &cli).await?;
            let selection = RuleSelection {
                run_only: run.clone(),
                disabled: disable.clone(),
            };
            let orchestrator = Orchestrator::new(
                &client,
                &config.policy,
                config.ignored_ids.iter().copied().collect(),
            );
            let outcome = orchestrator.evaluate(
                &mut rules,
                &selection,
                &batch,
                rule_config.as_deref(),
                &mut prompter,
            )?;
            if outcome.updates.is_empty() && outcome.deletes.is_empty() {
                println!("nothing to do");
                return Ok(());
            }
            let report = orchestrator
                .commit(
                    &outcome,
                    &CommitOptions {
                        dry_run: cli.dry_run,
                        assume_yes: cli.yes,
                        override_reconciled: *always_override_reconciled,
                        ..CommitOptions::default()
                    },
                    &mut prompter,
                )
                .await?;
            println!(
                "{}/{} update(s) applied, {} failed, {} deleted",
                report.succeeded, report.attempted, report.failed, report.deleted
            );
        }

        Command::Merge {
            max_days_differences,
            max_amount_differences,
            batch_size,
        } => {
            let batch = load_batch(&client, range, &cli).await?;
            let options = TransferOptions {
                max_day_difference: *max_days_differences,
                amount_epsilon: max_amount_differences.unwrap_or_else(|| Decimal::new(1, 4)),
                batch_size: *batch_size,
                ignored_pairs: config.ignored_transfer_pairs.iter().copied().collect(),
                dry_run: cli.dry_run,
                assume_yes: cli.yes,
            };
            let reconciler = TransferReconciler::new(&client, options);
            let report = reconciler.run(&batch, &mut prompter).await?;
            println!(
                "{}/{} transfer merge(s) applied",
                report.succeeded, report.attempted
            );
        }

        Command::ImportCsv {
            file,
            source_name,
            destination_name,
            ..
        } => {
            let profile = import_profile(&config.import, &cli.command);
            let options = ImportOptions {
                source_name: source_name.clone(),
                destination_name: destination_name.clone(),
            };
            let data = fs::File::open(file)
                .with_context(|| format!("opening {}", file.display()))?;
            let rows = import_csv(data, &profile, &options)
                .with_context(|| format!("parsing {}", file.display()))?;
            println!("{} transaction(s) parsed from {}", rows.len(), file.display());
            let go = cli.yes || prompter.confirm(&format!("Create {} transaction(s)?", rows.len()), false);
            if !go {
                return Ok(());
            }
            let mut created = 0usize;
            for row in &rows {
                if cli.dry_run {
                    info!(description = %row.description, "dry run, skipping create");
                    created += 1;
                    continue;
                }
                match client.create_transaction(row).await {
                    Ok(id) => {
                        created += 1;
                        info!(%id, description = %row.description, "created");
                    }
                    Err(e) => warn!(description = %row.description, error = %e, "create failed"),
                }
            }
            println!("{created}/{} transaction(s) created", rows.len());
        }
    }
    Ok(())
}

fn date_range(cli: &Cli) -> DateRange {
    let end = cli.end.unwrap_or_else(|| Local::now().date_naive());
    match cli.start {
        Some(start) => DateRange::new(start, end),
        None => DateRange::months_back(end, cli.relative_months),
    }
}

/// Fetch the window, or replay the last snapshot with `--use-cache`. Every
/// fresh fetch refreshes the snapshot so a follow-up dry run can iterate
/// without hammering the API.
async fn load_batch(
    client: &HttpClient,
    range: DateRange,
    cli: &Cli,
) -> Result<Vec<Transaction>> {
    if cli.use_cache && cli.cache_file.exists() {
        let raw = fs::read_to_string(&cli.cache_file)
            .with_context(|| format!("reading cache {}", cli.cache_file.display()))?;
        let batch: Vec<Transaction> =
            serde_json::from_str(&raw).context("decoding snapshot cache")?;
        info!(transactions = batch.len(), "loaded from snapshot cache");
        return Ok(batch);
    }
    let batch = client.list_transactions(range).await?;
    info!(transactions = batch.len(), %range, "fetched");
    write_cache(&cli.cache_file, &batch)?;
    Ok(batch)
}

fn write_cache(path: &Path, batch: &[Transaction]) -> Result<()> {
    let raw = serde_json::to_string(batch).context("encoding snapshot cache")?;
    fs::write(path, raw).with_context(|| format!("writing cache {}", path.display()))?;
    Ok(())
}

/// Start from the configured profile, let the command-line flags win.
fn import_profile(base: &CsvProfile, command: &Command) -> CsvProfile {
    let mut profile = base.clone();
    if let Command::ImportCsv {
        date_column,
        description_column,
        amount_column,
        debit_column,
        credit_column,
        external_id_column,
        date_format,
        delimiter,
        no_header,
        skip_rows,
        ..
    } = command
    {
        if let Some(v) = date_column {
            profile.date_column = *v;
        }
        if let Some(v) = description_column {
            profile.description_column = *v;
        }
        if amount_column.is_some() {
            profile.amount_column = *amount_column;
            profile.debit_column = None;
            profile.credit_column = None;
        }
        if debit_column.is_some() || credit_column.is_some() {
            profile.amount_column = None;
            profile.debit_column = *debit_column;
            profile.credit_column = *credit_column;
        }
        if let Some(v) = external_id_column {
            profile.external_id_column = Some(*v);
        }
        if let Some(v) = date_format {
            profile.date_format = v.clone();
        }
        if let Some(v) = delimiter {
            profile.delimiter = v.clone();
        }
        if *no_header {
            profile.has_header = false;
        }
        if let Some(v) = skip_rows {
            profile.skip_rows = *v;
        }
    }
    profile
}
