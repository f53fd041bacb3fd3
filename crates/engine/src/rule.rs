use std::collections::{BTreeMap, BTreeSet};

use tidyledger_core::{FieldValue, Transaction, TransactionId, TransactionKind};

use crate::ledger::{ConflictError, PendingUpdate};
use crate::policy::ConflictPolicy;
use crate::prompt::Prompter;
use crate::EngineError;

/// Control flow signal returned by [`Rule::process`]. `Stop` ends rule
/// evaluation for the current transaction only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFlow {
    Continue,
    Stop,
}

/// Rule names are matched case-insensitively with spaces and underscores
/// folded to hyphens, so `--run Remove_Duplicates` selects `remove-duplicates`.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '_'], "-")
}

/// Shared mutable state a rule sees while the batch is being evaluated.
///
/// All mutation happens on this single-threaded pass; nothing here touches
/// the remote ledger.
pub struct RuleContext<'a> {
    pub policy: &'a ConflictPolicy,
    /// The full batch, for rules that reason across transactions.
    pub transactions: &'a [Transaction],
    /// Free-form per-invocation configuration from the command line.
    pub rule_config: Option<&'a str>,
    pub prompter: &'a mut dyn Prompter,
    updates: &'a mut BTreeMap<TransactionId, PendingUpdate>,
    deletes: &'a mut BTreeSet<TransactionId>,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        policy: &'a ConflictPolicy,
        transactions: &'a [Transaction],
        rule_config: Option<&'a str>,
        prompter: &'a mut dyn Prompter,
        updates: &'a mut BTreeMap<TransactionId, PendingUpdate>,
        deletes: &'a mut BTreeSet<TransactionId>,
    ) -> Self {
        RuleContext {
            policy,
            transactions,
            rule_config,
            prompter,
            updates,
            deletes,
        }
    }

    /// Record a rule's proposed field changes for one transaction.
    ///
    /// `current_account_name` / `opposite_account_name` pseudo-fields resolve
    /// to the concrete source/destination field for the transaction's kind
    /// before the proposal enters the pending set.
    pub fn add_updates(
        &mut self,
        rule_name: &str,
        entry: &Transaction,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<(), ConflictError> {
        let fields: BTreeMap<String, FieldValue> = fields
            .into_iter()
            .map(|(k, v)| (resolve_pseudo_field(&k, entry.kind), v))
            .collect();
        if fields.is_empty() {
            return Ok(());
        }
        match self.updates.get_mut(&entry.id) {
            Some(pending) => pending.append_updates(rule_name, fields, self.policy),
            None => {
                if let Some(pending) =
                    PendingUpdate::new(entry.clone(), rule_name, fields, self.policy)
                {
                    self.updates.insert(entry.id, pending);
                }
                Ok(())
            }
        }
    }

    pub fn pending(&self, id: TransactionId) -> Option<&PendingUpdate> {
        self.updates.get(&id)
    }

    pub fn mark_for_delete(&mut self, id: TransactionId) {
        self.deletes.insert(id);
    }
}

fn resolve_pseudo_field(name: &str, kind: TransactionKind) -> String {
    let money_in = matches!(
        kind,
        TransactionKind::Deposit | TransactionKind::OpeningBalance
    );
    match name {
        "current_account_name" if money_in => "destination_name".to_string(),
        "current_account_name" => "source_name".to_string(),
        "opposite_account_name" if money_in => "source_name".to_string(),
        "opposite_account_name" => "destination_name".to_string(),
        other => other.to_string(),
    }
}

/// A maintenance rule. Implementations keep per-run state in `&mut self`
/// (for example duplicate groups already skipped this session).
pub trait Rule {
    /// Stable identifier used for selection, priority policies and conflict
    /// attribution. Already normalized (lowercase, hyphenated).
    fn base_name(&self) -> &'static str;

    /// Rules that delete or are purely diagnostic opt out of the default set
    /// and only run via `--run`.
    fn enabled_by_default(&self) -> bool {
        true
    }

    /// Inspect one transaction and record any proposals through the context.
    fn process(
        &mut self,
        entry: &Transaction,
        ctx: &mut RuleContext<'_>,
    ) -> Result<RuleFlow, EngineError>;

    /// End-of-run hook for rules that accumulate a report.
    fn summarize(&self, _ctx: &mut RuleContext<'_>) {}
}
