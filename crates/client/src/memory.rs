use std::collections::BTreeSet;
use std::sync::Mutex;

use tidyledger_core::{DateRange, JournalId, Transaction, TransactionId};

use crate::{
    Account, AccountKind, ClientError, LedgerClient, NewTransaction, RemoteRule, RuleAction,
    TransactionUpdate, UpdateOutcome,
};

/// In-memory ledger double: serves a fixed transaction set and records every
/// mutation for inspection. Used by the engine's integration tests and handy
/// for rehearsing a run offline.
#[derive(Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    transactions: Vec<Transaction>,
    accounts: Vec<Account>,
    rules: Vec<RemoteRule>,
    /// Ids that refuse ordinary updates until their reconciled flag is unset.
    reconciled_locked: BTreeSet<TransactionId>,
    updates: Vec<(TransactionId, TransactionUpdate)>,
    creates: Vec<NewTransaction>,
    deletes: Vec<TransactionId>,
    reconcile_calls: Vec<(TransactionId, bool)>,
    rule_action_calls: Vec<(i64, Vec<RuleAction>)>,
    next_id: i64,
}

impl MemoryClient {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        let next_id = transactions.iter().map(|t| t.id.0).max().unwrap_or(0) + 1;
        MemoryClient {
            state: Mutex::new(State {
                transactions,
                next_id,
                ..State::default()
            }),
        }
    }

    pub fn with_accounts(self, accounts: Vec<Account>) -> Self {
        self.state.lock().unwrap().accounts = accounts;
        self
    }

    pub fn with_rules(self, rules: Vec<RemoteRule>) -> Self {
        self.state.lock().unwrap().rules = rules;
        self
    }

    /// Mark a transaction as reconciled-locked: updates return
    /// [`UpdateOutcome::ReconciledConflict`] until `set_reconciled(false)`.
    pub fn lock_reconciled(self, id: TransactionId) -> Self {
        self.state.lock().unwrap().reconciled_locked.insert(id);
        self
    }

    pub fn updates(&self) -> Vec<(TransactionId, TransactionUpdate)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn creates(&self) -> Vec<NewTransaction> {
        self.state.lock().unwrap().creates.clone()
    }

    pub fn deletes(&self) -> Vec<TransactionId> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn reconcile_calls(&self) -> Vec<(TransactionId, bool)> {
        self.state.lock().unwrap().reconcile_calls.clone()
    }

    pub fn rule_action_calls(&self) -> Vec<(i64, Vec<RuleAction>)> {
        self.state.lock().unwrap().rule_action_calls.clone()
    }
}

impl LedgerClient for MemoryClient {
    async fn list_transactions(&self, range: DateRange) -> Result<Vec<Transaction>, ClientError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .filter(|t| range.contains(t.date))
            .cloned()
            .collect())
    }

    async fn list_accounts(
        &self,
        kind: Option<AccountKind>,
    ) -> Result<Vec<Account>, ClientError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .accounts
            .iter()
            .filter(|a| kind.map_or(true, |k| a.kind == k))
            .cloned()
            .collect())
    }

    async fn update_transaction(
        &self,
        id: TransactionId,
        update: &TransactionUpdate,
    ) -> Result<UpdateOutcome, ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.reconciled_locked.contains(&id) {
            return Ok(UpdateOutcome::ReconciledConflict);
        }
        state.updates.push((id, update.clone()));
        Ok(UpdateOutcome::Applied)
    }

    async fn create_transaction(&self, new: &NewTransaction) -> Result<TransactionId, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.creates.push(new.clone());
        let id = state.next_id;
        state.next_id += 1;
        Ok(TransactionId(id))
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(id);
        state.transactions.retain(|t| t.id != id);
        Ok(())
    }

    async fn set_reconciled(
        &self,
        id: TransactionId,
        _journal_id: JournalId,
        reconciled: bool,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if reconciled {
            state.reconciled_locked.insert(id);
        } else {
            state.reconciled_locked.remove(&id);
        }
        state.reconcile_calls.push((id, reconciled));
        Ok(())
    }

    async fn find_rule_by_title(&self, title: &str) -> Result<Option<RemoteRule>, ClientError> {
        let state = self.state.lock().unwrap();
        Ok(state.rules.iter().find(|r| r.title == title).cloned())
    }

    async fn update_rule_actions(
        &self,
        rule_id: i64,
        actions: &[RuleAction],
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.rule_action_calls.push((rule_id, actions.to_vec()));
        Ok(())
    }
}
