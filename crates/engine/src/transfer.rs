//! Pairs same-amount withdrawal/deposit legs into real transfers.
//!
//! The remote ledger cannot itself turn two one-sided entries into one
//! transfer, but its automation rules can convert a tagged withdrawal. The
//! reconciler therefore stages each merge as: reconfigure the conversion
//! rule for the target account, push the staging tag plus a synthesized
//! description onto the withdrawal (letting the remote rule fire), then
//! delete the now-redundant deposit leg.

use std::collections::BTreeSet;

use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use tidyledger_client::{ClientError, LedgerClient};
use tidyledger_core::{FieldValue, Transaction, TransactionId, TransactionKind};

use crate::ledger::PendingUpdate;
use crate::policy::ConflictPolicy;
use crate::prompt::Prompter;
use crate::EngineError;

/// Tag the remote conversion rule triggers on.
pub const STAGING_TAG: &str = "AUTOMATE_convert-as-transfer";

/// Title of the remote automation rule that performs the conversion.
pub const CONVERT_RULE_TITLE: &str = "convert to transfer";

const COMMIT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Maximum absolute amount difference between the two legs.
    pub amount_epsilon: Decimal,
    /// Maximum calendar-day distance between the two legs.
    pub max_day_difference: i64,
    /// Bundles confirmed per prompt.
    pub batch_size: usize,
    /// (withdrawal id, deposit id) pairs known not to be transfers.
    pub ignored_pairs: BTreeSet<(i64, i64)>,
    pub dry_run: bool,
    pub assume_yes: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            amount_epsilon: Decimal::new(1, 4),
            max_day_difference: 0,
            batch_size: 3,
            ignored_pairs: BTreeSet::new(),
            dry_run: false,
            assume_yes: false,
        }
    }
}

/// One matched pair plus the pending withdrawal update that stages it.
struct Bundle {
    withdrawal: Transaction,
    deposit: Transaction,
    update: PendingUpdate,
}

impl Bundle {
    fn describe(&self, index: usize) -> String {
        format!(
            "[{}] withdrawal {} ({} {} \"{}\") <= deposit {} ({} {} \"{}\")",
            index,
            self.withdrawal.id,
            self.withdrawal.date,
            self.withdrawal.amount,
            self.withdrawal.description,
            self.deposit.id,
            self.deposit.date,
            self.deposit.amount,
            self.deposit.description,
        )
    }
}

#[derive(Debug, Default)]
pub struct TransferReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Pairs rejected at a prompt this run; candidates for the configured
    /// ignore list.
    pub rejected: Vec<(TransactionId, TransactionId)>,
}

pub struct TransferReconciler<'a, C> {
    client: &'a C,
    options: TransferOptions,
    /// Serializes the rule-reconfigure + withdrawal-update pair: the remote
    /// conversion rule is a shared singleton, so two bundles must never
    /// interleave reconfiguration and trigger.
    rule_lock: Mutex<()>,
}

impl<'a, C: LedgerClient + Sync> TransferReconciler<'a, C> {
    pub fn new(client: &'a C, options: TransferOptions) -> Self {
        TransferReconciler {
            client,
            options,
            rule_lock: Mutex::new(()),
        }
    }

    /// Scan the batch, confirm matches with the operator, commit accepted
    /// bundles concurrently.
    pub async fn run(
        &self,
        transactions: &[Transaction],
        prompter: &mut dyn Prompter,
    ) -> Result<TransferReport, EngineError> {
        let withdrawals: Vec<&Transaction> = transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Withdrawal)
            .collect();
        let deposits: Vec<&Transaction> = transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Deposit)
            .collect();

        let mut report = TransferReport::default();
        let mut claimed: BTreeSet<TransactionId> = BTreeSet::new();
        let mut batch: Vec<Bundle> = Vec::new();

        for withdrawal in withdrawals {
            let candidates: Vec<&Transaction> = deposits
                .iter()
                .copied()
                .filter(|d| self.is_candidate(withdrawal, d, &claimed))
                .collect();
            let deposit = match candidates.len() {
                0 => continue,
                1 => candidates[0],
                _ => match pick_deposit(withdrawal, &candidates, prompter) {
                    Some(d) => d,
                    None => continue,
                },
            };
            claimed.insert(deposit.id);
            if let Some(bundle) = self.stage(withdrawal, deposit) {
                batch.push(bundle);
            }
            if batch.len() >= self.options.batch_size {
                self.flush(&mut batch, prompter, &mut report).await;
            }
        }
        self.flush(&mut batch, prompter, &mut report).await;

        if !report.rejected.is_empty() {
            println!("Pairs rejected this run (configure as ignored to silence):");
            for (w, d) in &report.rejected {
                println!("  withdrawal {w} / deposit {d}");
            }
        }
        info!(
            succeeded = report.succeeded,
            attempted = report.attempted,
            "transfer merge finished"
        );
        Ok(report)
    }

    fn is_candidate(
        &self,
        withdrawal: &Transaction,
        deposit: &Transaction,
        claimed: &BTreeSet<TransactionId>,
    ) -> bool {
        if claimed.contains(&deposit.id) {
            return false;
        }
        if self
            .options
            .ignored_pairs
            .contains(&(withdrawal.id.0, deposit.id.0))
        {
            return false;
        }
        if !withdrawal
            .amount
            .within(deposit.amount, self.options.amount_epsilon)
        {
            return false;
        }
        let days = (withdrawal.date - deposit.date).num_days().abs();
        if days > self.options.max_day_difference {
            return false;
        }
        // A deposit landing back in the withdrawal's own account is a
        // refund, not the far leg of a transfer.
        deposit.destination_name != withdrawal.source_name
    }

    /// Build the pending withdrawal update: staging tag + synthesized
    /// description. `None` only if the update would be a no-op, which means
    /// the pair was already staged earlier.
    fn stage(&self, withdrawal: &Transaction, deposit: &Transaction) -> Option<Bundle> {
        let merged = format!("[{}] > [{}]", withdrawal.description, deposit.description);
        let fields = [
            ("description".to_string(), FieldValue::text(merged)),
            ("tags".to_string(), FieldValue::tag(STAGING_TAG)),
        ]
        .into_iter()
        .collect();
        let update = PendingUpdate::new(
            withdrawal.clone(),
            "merge-transfer",
            fields,
            &ConflictPolicy::default(),
        )?;
        Some(Bundle {
            withdrawal: withdrawal.clone(),
            deposit: deposit.clone(),
            update,
        })
    }

    /// Confirm and commit the buffered bundles, draining the buffer.
    async fn flush(
        &self,
        batch: &mut Vec<Bundle>,
        prompter: &mut dyn Prompter,
        report: &mut TransferReport,
    ) {
        if batch.is_empty() {
            return;
        }
        let bundles = std::mem::take(batch);
        let accepted = if self.options.assume_yes {
            bundles
        } else {
            self.confirm(bundles, prompter, report)
        };
        report.attempted += accepted.len();

        let mut results = stream::iter(accepted.iter())
            .map(|bundle| async move {
                let outcome = self.commit(bundle).await;
                (bundle, outcome)
            })
            .buffer_unordered(COMMIT_CONCURRENCY);
        while let Some((bundle, outcome)) = results.next().await {
            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(e) => warn!(
                    withdrawal = %bundle.withdrawal.id,
                    deposit = %bundle.deposit.id,
                    error = %e,
                    "transfer merge failed"
                ),
            }
        }
    }

    /// Operator review: accept all, reject all, or reject by number.
    fn confirm(
        &self,
        bundles: Vec<Bundle>,
        prompter: &mut dyn Prompter,
        report: &mut TransferReport,
    ) -> Vec<Bundle> {
        println!("Proposed transfer merges:");
        for (i, bundle) in bundles.iter().enumerate() {
            println!("{}", bundle.describe(i + 1));
            println!("{}", bundle.update.describe());
        }
        let rejected_indices: BTreeSet<usize> = loop {
            let answer = prompter
                .line("Apply all? ('y'/empty = yes, 'n' = none, or numbers to reject, e.g. '1 3')")
                .unwrap_or_else(|| "n".to_string());
            let answer = answer.trim().to_lowercase();
            match answer.as_str() {
                "" | "y" | "yes" => break BTreeSet::new(),
                "n" | "no" => break (1..=bundles.len()).collect(),
                other => {
                    let parsed: Option<BTreeSet<usize>> = other
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|s| !s.is_empty())
                        .map(|s| s.parse::<usize>().ok())
                        .collect();
                    match parsed {
                        Some(indices) if !indices.is_empty() => break indices,
                        _ => println!("'{answer}' is not a yes/no or a number list, try again"),
                    }
                }
            }
        };

        let mut accepted = Vec::new();
        for (i, bundle) in bundles.into_iter().enumerate() {
            if rejected_indices.contains(&(i + 1)) {
                report
                    .rejected
                    .push((bundle.withdrawal.id, bundle.deposit.id));
            } else {
                accepted.push(bundle);
            }
        }
        accepted
    }

    async fn commit(&self, bundle: &Bundle) -> Result<(), EngineError> {
        if self.options.dry_run {
            info!(
                withdrawal = %bundle.withdrawal.id,
                deposit = %bundle.deposit.id,
                "dry run, skipping transfer merge"
            );
            return Ok(());
        }
        let target = bundle
            .deposit
            .destination_name
            .clone()
            .unwrap_or_default();
        {
            let _guard = self.rule_lock.lock().await;
            let rule = self
                .client
                .find_rule_by_title(CONVERT_RULE_TITLE)
                .await?
                .ok_or_else(|| ClientError::RuleNotFound(CONVERT_RULE_TITLE.to_string()))?;
            let actions = [
                ("convert_transfer".to_string(), target),
                ("remove_tag".to_string(), STAGING_TAG.to_string()),
            ];
            self.client.update_rule_actions(rule.id, &actions).await?;
            bundle.update.apply(self.client, false).await?;
        }
        self.client.delete_transaction(bundle.deposit.id).await?;
        Ok(())
    }
}

/// Operator picks which of several amount-matching deposits is the far leg.
/// Empty input skips the withdrawal; anything unrecognized re-prompts.
fn pick_deposit<'t>(
    withdrawal: &Transaction,
    candidates: &[&'t Transaction],
    prompter: &mut dyn Prompter,
) -> Option<&'t Transaction> {
    println!(
        "Several deposits could pair with withdrawal {} ({} {} \"{}\"):",
        withdrawal.id, withdrawal.date, withdrawal.amount, withdrawal.description
    );
    for d in candidates {
        println!(
            "  id {}: {} {} \"{}\" -> {}",
            d.id,
            d.date,
            d.amount,
            d.description,
            d.destination_name.as_deref().unwrap_or("(unknown)")
        );
    }
    loop {
        let line = prompter.line("Enter the deposit id to pair, or leave empty to skip")?;
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if let Ok(raw) = line.parse::<i64>() {
            if let Some(chosen) = candidates.iter().find(|d| d.id.0 == raw).copied() {
                return Some(chosen);
            }
        }
        println!("'{line}' is not one of the listed deposits, try again");
    }
}
