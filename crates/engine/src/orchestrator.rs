//! Runs the rule pass over a batch, reviews the result with the operator,
//! and commits accepted changes.

use std::collections::{BTreeMap, BTreeSet};

use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

use tidyledger_client::{LedgerClient, UpdateOutcome};
use tidyledger_core::{Transaction, TransactionId, TransactionOwner};

use crate::ledger::{ConflictError, PendingUpdate};
use crate::policy::ConflictPolicy;
use crate::prompt::Prompter;
use crate::rule::{normalize_name, Rule, RuleContext, RuleFlow};
use crate::EngineError;

/// Which rules run this invocation.
#[derive(Debug, Clone, Default)]
pub struct RuleSelection {
    /// Run exactly this rule, default set ignored.
    pub run_only: Option<String>,
    /// Removed from the default set.
    pub disabled: Vec<String>,
}

impl RuleSelection {
    fn selects(&self, rule: &dyn Rule) -> bool {
        match &self.run_only {
            Some(only) => normalize_name(only) == rule.base_name(),
            None => {
                rule.enabled_by_default()
                    && !self
                        .disabled
                        .iter()
                        .any(|d| normalize_name(d) == rule.base_name())
            }
        }
    }
}

/// Everything the rule pass produced; nothing has touched the remote ledger
/// yet.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub updates: BTreeMap<TransactionId, PendingUpdate>,
    pub deletes: BTreeSet<TransactionId>,
    /// Transactions dropped from the run because two rules disagreed.
    pub conflicts: Vec<ConflictError>,
}

#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub dry_run: bool,
    pub assume_yes: bool,
    /// Apply the unset/update/re-set choreography to every reconciled
    /// transaction without asking.
    pub override_reconciled: bool,
    pub concurrency: usize,
}

impl Default for CommitOptions {
    fn default() -> Self {
        CommitOptions {
            dry_run: false,
            assume_yes: false,
            override_reconciled: false,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub deleted: usize,
}

pub struct Orchestrator<'a, C> {
    client: &'a C,
    policy: &'a ConflictPolicy,
    /// Transaction ids the configuration excludes from every rule.
    ignored_ids: BTreeSet<i64>,
}

impl<'a, C: LedgerClient + Sync> Orchestrator<'a, C> {
    pub fn new(client: &'a C, policy: &'a ConflictPolicy, ignored_ids: BTreeSet<i64>) -> Self {
        Orchestrator {
            client,
            policy,
            ignored_ids,
        }
    }

    /// Single-threaded rule pass. A conflict drops only the affected
    /// transaction; the rest of the batch still runs.
    pub fn evaluate(
        &self,
        rules: &mut [Box<dyn Rule>],
        selection: &RuleSelection,
        transactions: &[Transaction],
        rule_config: Option<&str>,
        prompter: &mut dyn Prompter,
    ) -> Result<RunOutcome, EngineError> {
        let enabled: Vec<usize> = (0..rules.len())
            .filter(|&i| selection.selects(rules[i].as_ref()))
            .collect();
        info!(rules = enabled.len(), transactions = transactions.len(), "rule pass");

        let mut outcome = RunOutcome::default();
        'batch: for entry in transactions {
            if self.ignored_ids.contains(&entry.id.0) {
                continue;
            }
            for &i in &enabled {
                let mut ctx = RuleContext::new(
                    self.policy,
                    transactions,
                    rule_config,
                    prompter,
                    &mut outcome.updates,
                    &mut outcome.deletes,
                );
                match rules[i].process(entry, &mut ctx) {
                    Ok(RuleFlow::Continue) => {}
                    Ok(RuleFlow::Stop) => continue 'batch,
                    Err(EngineError::Conflict(conflict)) => {
                        outcome.updates.remove(&entry.id);
                        outcome.conflicts.push(conflict);
                        continue 'batch;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        for &i in &enabled {
            let mut ctx = RuleContext::new(
                self.policy,
                transactions,
                rule_config,
                prompter,
                &mut outcome.updates,
                &mut outcome.deletes,
            );
            rules[i].summarize(&mut ctx);
        }
        Ok(outcome)
    }

    /// Confirm once, then fan both updates and deletes out over the bounded
    /// worker pool, updates first.
    pub async fn commit(
        &self,
        outcome: &RunOutcome,
        options: &CommitOptions,
        prompter: &mut dyn Prompter,
    ) -> Result<CommitReport, EngineError> {
        let mut report = CommitReport::default();

        for conflict in &outcome.conflicts {
            eprintln!("{}", conflict.detail());
        }

        if !outcome.updates.is_empty() {
            print!("{}", render_review(&outcome.updates));
            let go = options.assume_yes
                || prompter.confirm(
                    &format!("Apply {} pending update(s)?", outcome.updates.len()),
                    false,
                );
            if go {
                self.push_updates(outcome, options, prompter, &mut report)
                    .await;
            } else {
                info!("updates declined, nothing pushed");
            }
        }

        if !outcome.deletes.is_empty() {
            let go = options.assume_yes
                || prompter.confirm(
                    &format!("Delete {} flagged transaction(s)?", outcome.deletes.len()),
                    false,
                );
            if go {
                if options.dry_run {
                    for &id in &outcome.deletes {
                        info!(%id, "dry run, skipping delete");
                    }
                    report.deleted += outcome.deletes.len();
                } else {
                    let mut results = stream::iter(outcome.deletes.iter().copied())
                        .map(|id| async move { (id, self.client.delete_transaction(id).await) })
                        .buffer_unordered(options.concurrency.max(1));
                    while let Some((id, result)) = results.next().await {
                        match result {
                            Ok(()) => report.deleted += 1,
                            Err(e) => {
                                warn!(%id, error = %e, "delete failed");
                                report.failed += 1;
                            }
                        }
                    }
                }
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            deleted = report.deleted,
            "commit finished"
        );
        Ok(report)
    }

    async fn push_updates(
        &self,
        outcome: &RunOutcome,
        options: &CommitOptions,
        prompter: &mut dyn Prompter,
        report: &mut CommitReport,
    ) {
        // A transaction flagged for deletion never also gets an update; the
        // two sets stay disjoint within a run.
        let pending: Vec<&PendingUpdate> = outcome
            .updates
            .values()
            .filter(|p| !outcome.deletes.contains(&p.entry().id))
            .collect();
        report.attempted = pending.len();

        // Concurrent pass first; anything needing a prompt is deferred so
        // operator interaction never interleaves with in-flight requests.
        let mut reconciled: Vec<&PendingUpdate> = Vec::new();
        let mut results = stream::iter(pending)
            .map(|pending| async move {
                let result = pending.apply(self.client, options.dry_run).await;
                (pending, result)
            })
            .buffer_unordered(options.concurrency.max(1));
        while let Some((pending, result)) = results.next().await {
            match result {
                Ok(UpdateOutcome::Applied) => report.succeeded += 1,
                Ok(UpdateOutcome::ReconciledConflict) => reconciled.push(pending),
                Err(e) => {
                    warn!(id = %pending.entry().id, error = %e, "update failed");
                    report.failed += 1;
                }
            }
        }

        for pending in reconciled {
            let id = pending.entry().id;
            let go = options.override_reconciled
                || prompter.confirm(
                    &format!("Transaction {id} is reconciled; unset, update and re-set?"),
                    false,
                );
            if !go {
                info!(%id, "reconciled transaction left untouched");
                report.failed += 1;
                continue;
            }
            match pending.apply_overriding_reconciled(self.client).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(%id, error = %e, "reconciled override failed");
                    report.failed += 1;
                }
            }
        }
    }
}

/// Pending updates grouped by owning account, then by the rule combination
/// that produced them.
pub fn render_review(updates: &BTreeMap<TransactionId, PendingUpdate>) -> String {
    let mut grouped: BTreeMap<TransactionOwner, BTreeMap<String, Vec<&PendingUpdate>>> =
        BTreeMap::new();
    for pending in updates.values() {
        grouped
            .entry(pending.entry().owner())
            .or_default()
            .entry(pending.rule())
            .or_default()
            .push(pending);
    }
    let mut out = String::new();
    for (owner, by_rule) in grouped {
        out.push_str(&format!("{owner}:\n"));
        for (rule, pendings) in by_rule {
            out.push_str(&format!(" via {rule}:\n"));
            for pending in pendings {
                out.push_str(&pending.describe());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;
    use chrono::NaiveDate;
    use tidyledger_client::MemoryClient;
    use tidyledger_core::{FieldValue, JournalId, TransactionKind};

    struct SetCategory {
        name: &'static str,
        value: &'static str,
        stop: bool,
    }

    impl Rule for SetCategory {
        fn base_name(&self) -> &'static str {
            self.name
        }

        fn process(
            &mut self,
            entry: &Transaction,
            ctx: &mut RuleContext<'_>,
        ) -> Result<RuleFlow, EngineError> {
            ctx.add_updates(
                self.name,
                entry,
                BTreeMap::from([("category_name".to_string(), FieldValue::text(self.value))]),
            )?;
            Ok(if self.stop {
                RuleFlow::Stop
            } else {
                RuleFlow::Continue
            })
        }
    }

    fn tx(id: i64) -> Transaction {
        Transaction {
            id: TransactionId(id),
            journal_id: JournalId(id * 10),
            kind: TransactionKind::Withdrawal,
            amount: "20.00".parse().unwrap(),
            date: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            description: format!("PURCHASE {id}"),
            source_id: Some(1),
            source_name: Some("Checking".to_string()),
            destination_id: Some(2),
            destination_name: Some("Shop".to_string()),
            category_name: None,
            tags: BTreeSet::new(),
            reconciled: false,
            extra: BTreeMap::new(),
        }
    }

    fn rules(stop_first: bool) -> Vec<Box<dyn Rule>> {
        vec![
            Box::new(SetCategory {
                name: "first",
                value: "A",
                stop: stop_first,
            }),
            Box::new(SetCategory {
                name: "second",
                value: "B",
                stop: false,
            }),
        ]
    }

    #[test]
    fn stop_short_circuits_later_rules() {
        let client = MemoryClient::new(Vec::new());
        let policy = ConflictPolicy::default();
        let orch = Orchestrator::new(&client, &policy, BTreeSet::new());
        let batch = [tx(1)];
        let mut prompter = ScriptedPrompter::default();
        let outcome = orch
            .evaluate(
                &mut rules(true),
                &RuleSelection::default(),
                &batch,
                None,
                &mut prompter,
            )
            .unwrap();
        let pending = &outcome.updates[&TransactionId(1)];
        assert_eq!(pending.fields()["category_name"].value, FieldValue::text("A"));
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn conflicting_rules_drop_only_that_transaction() {
        let client = MemoryClient::new(Vec::new());
        let policy = ConflictPolicy::default();
        // Both rules set category_name to different values, so every
        // processed transaction conflicts; id 2 never reaches the rules.
        let orch = Orchestrator::new(&client, &policy, BTreeSet::from([2]));
        let batch = [tx(1), tx(2)];
        let mut prompter = ScriptedPrompter::default();
        let outcome = orch
            .evaluate(
                &mut rules(false),
                &RuleSelection::default(),
                &batch,
                None,
                &mut prompter,
            )
            .unwrap();
        assert!(outcome.updates.is_empty());
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].transaction, TransactionId(1));
    }

    #[test]
    fn ignored_ids_are_skipped() {
        let client = MemoryClient::new(Vec::new());
        let policy = ConflictPolicy::default();
        let orch = Orchestrator::new(&client, &policy, BTreeSet::from([1]));
        let batch = [tx(1), tx(2)];
        let mut prompter = ScriptedPrompter::default();
        let outcome = orch
            .evaluate(
                &mut rules(true),
                &RuleSelection::default(),
                &batch,
                None,
                &mut prompter,
            )
            .unwrap();
        assert!(!outcome.updates.contains_key(&TransactionId(1)));
        assert!(outcome.updates.contains_key(&TransactionId(2)));
    }

    #[test]
    fn run_only_selects_one_rule() {
        let selection = RuleSelection {
            run_only: Some("Second".to_string()),
            ..RuleSelection::default()
        };
        let client = MemoryClient::new(Vec::new());
        let policy = ConflictPolicy::default();
        let orch = Orchestrator::new(&client, &policy, BTreeSet::new());
        let batch = [tx(1)];
        let mut prompter = ScriptedPrompter::default();
        let outcome = orch
            .evaluate(&mut rules(false), &selection, &batch, None, &mut prompter)
            .unwrap();
        assert_eq!(
            outcome.updates[&TransactionId(1)].fields()["category_name"].value,
            FieldValue::text("B")
        );
    }

    #[tokio::test]
    async fn commit_counts_successes_and_failures() {
        let client = MemoryClient::new(Vec::new());
        let policy = ConflictPolicy::default();
        let orch = Orchestrator::new(&client, &policy, BTreeSet::new());
        let batch = [tx(1), tx(2)];
        let mut prompter = ScriptedPrompter::default();
        let outcome = orch
            .evaluate(
                &mut rules(true),
                &RuleSelection::default(),
                &batch,
                None,
                &mut prompter,
            )
            .unwrap();
        let report = orch
            .commit(
                &outcome,
                &CommitOptions {
                    assume_yes: true,
                    ..CommitOptions::default()
                },
                &mut prompter,
            )
            .await
            .unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(client.updates().len(), 2);
    }

    #[tokio::test]
    async fn declined_confirmation_pushes_nothing() {
        let client = MemoryClient::new(Vec::new());
        let policy = ConflictPolicy::default();
        let orch = Orchestrator::new(&client, &policy, BTreeSet::new());
        let batch = [tx(1)];
        let mut prompter = ScriptedPrompter::new(["n"]);
        let outcome = orch
            .evaluate(
                &mut rules(true),
                &RuleSelection::default(),
                &batch,
                None,
                &mut prompter,
            )
            .unwrap();
        let report = orch
            .commit(&outcome, &CommitOptions::default(), &mut prompter)
            .await
            .unwrap();
        assert_eq!(report.succeeded, 0);
        assert!(client.updates().is_empty());
    }

    #[tokio::test]
    async fn reconciled_override_runs_the_choreography_in_order() {
        let client = MemoryClient::new(Vec::new()).lock_reconciled(TransactionId(1));
        let policy = ConflictPolicy::default();
        let orch = Orchestrator::new(&client, &policy, BTreeSet::new());
        let batch = [tx(1)];
        let mut prompter = ScriptedPrompter::default();
        let outcome = orch
            .evaluate(
                &mut rules(true),
                &RuleSelection::default(),
                &batch,
                None,
                &mut prompter,
            )
            .unwrap();
        let report = orch
            .commit(
                &outcome,
                &CommitOptions {
                    assume_yes: true,
                    override_reconciled: true,
                    ..CommitOptions::default()
                },
                &mut prompter,
            )
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            client.reconcile_calls(),
            vec![(TransactionId(1), false), (TransactionId(1), true)]
        );
        assert_eq!(client.updates().len(), 1);
    }

    #[tokio::test]
    async fn reconciled_without_approval_counts_as_failed() {
        let client = MemoryClient::new(Vec::new()).lock_reconciled(TransactionId(1));
        let policy = ConflictPolicy::default();
        let orch = Orchestrator::new(&client, &policy, BTreeSet::new());
        let batch = [tx(1)];
        let mut prompter = ScriptedPrompter::new(["y", "n"]);
        let outcome = orch
            .evaluate(
                &mut rules(true),
                &RuleSelection::default(),
                &batch,
                None,
                &mut prompter,
            )
            .unwrap();
        let report = orch
            .commit(&outcome, &CommitOptions::default(), &mut prompter)
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert!(client.updates().is_empty());
        assert!(client.reconcile_calls().is_empty());
    }

    #[tokio::test]
    async fn deletes_are_confirmed_and_applied() {
        let client = MemoryClient::new(Vec::new());
        let policy = ConflictPolicy::default();
        let orch = Orchestrator::new(&client, &policy, BTreeSet::new());
        let outcome = RunOutcome {
            deletes: BTreeSet::from([TransactionId(5), TransactionId(6)]),
            ..RunOutcome::default()
        };
        let mut prompter = ScriptedPrompter::new(["y"]);
        let report = orch
            .commit(&outcome, &CommitOptions::default(), &mut prompter)
            .await
            .unwrap();
        assert_eq!(report.deleted, 2);
        let mut deleted = client.deletes();
        deleted.sort();
        assert_eq!(deleted, vec![TransactionId(5), TransactionId(6)]);
    }

    #[tokio::test]
    async fn dry_run_deletes_count_without_calls() {
        let client = MemoryClient::new(Vec::new());
        let policy = ConflictPolicy::default();
        let orch = Orchestrator::new(&client, &policy, BTreeSet::new());
        let outcome = RunOutcome {
            deletes: BTreeSet::from([TransactionId(5), TransactionId(6)]),
            ..RunOutcome::default()
        };
        let mut prompter = ScriptedPrompter::default();
        let report = orch
            .commit(
                &outcome,
                &CommitOptions {
                    assume_yes: true,
                    dry_run: true,
                    ..CommitOptions::default()
                },
                &mut prompter,
            )
            .await
            .unwrap();
        assert_eq!(report.deleted, 2);
        assert!(client.deletes().is_empty());
    }

    #[test]
    fn review_groups_by_owner_then_rule() {
        let policy = ConflictPolicy::default();
        let mut updates = BTreeMap::new();
        let mut entry = tx(1);
        entry.source_name = Some("Savings".to_string());
        for (id, entry) in [(1, entry), (2, tx(2))] {
            let pending = PendingUpdate::new(
                entry,
                "first",
                BTreeMap::from([("category_name".to_string(), FieldValue::text("A"))]),
                &policy,
            )
            .unwrap();
            updates.insert(TransactionId(id), pending);
        }
        let review = render_review(&updates);
        let savings = review.find("Savings:").unwrap();
        let checking = review.find("Checking:").unwrap();
        assert!(checking < savings);
        assert_eq!(review.matches(" via first:").count(), 2);
    }
}
