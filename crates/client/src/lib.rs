pub mod http;
pub mod memory;

use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tidyledger_core::{DateRange, JournalId, Transaction, TransactionId};

pub use http::HttpClient;
pub use memory::MemoryClient;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Malformed API response: {0}")]
    Decode(String),
    #[error("Update of transaction {id} rejected: {message} (payload: {payload})")]
    UpdateRejected {
        id: TransactionId,
        message: String,
        payload: String,
    },
    #[error("No automation rule titled '{0}' exists on the remote ledger")]
    RuleNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Expense,
    Revenue,
    Liabilities,
    Cash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub kind: AccountKind,
}

/// Finalized per-transaction update payload. `fields` maps API field names
/// to their new JSON values; the journal id disambiguates splits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionUpdate {
    pub journal_id: JournalId,
    pub apply_rules: bool,
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Result of pushing an update: either it applied, or the remote ledger
/// refused because the transaction is reconciled (a recoverable condition
/// with operator approval). Everything else is a `ClientError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    ReconciledConflict,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTransaction {
    pub kind: String,
    pub date: String,
    pub amount: String,
    pub description: String,
    pub source_name: Option<String>,
    pub destination_name: Option<String>,
    pub category_name: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub external_id: Option<String>,
}

/// One automation rule on the remote ledger, addressed by title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRule {
    pub id: i64,
    pub title: String,
}

/// `(action_type, action_value)` pairs, e.g. `("convert_transfer", "Savings")`.
pub type RuleAction = (String, String);

/// The narrow boundary to the external system of record. Implementations:
/// [`HttpClient`] for the real API, [`MemoryClient`] for tests.
///
/// Methods return `impl Future + Send` explicitly so callers generic over
/// the client can still compose the futures concurrently.
pub trait LedgerClient {
    fn list_transactions(
        &self,
        range: DateRange,
    ) -> impl Future<Output = Result<Vec<Transaction>, ClientError>> + Send;

    fn list_accounts(
        &self,
        kind: Option<AccountKind>,
    ) -> impl Future<Output = Result<Vec<Account>, ClientError>> + Send;

    fn update_transaction(
        &self,
        id: TransactionId,
        update: &TransactionUpdate,
    ) -> impl Future<Output = Result<UpdateOutcome, ClientError>> + Send;

    fn create_transaction(
        &self,
        new: &NewTransaction,
    ) -> impl Future<Output = Result<TransactionId, ClientError>> + Send;

    fn delete_transaction(
        &self,
        id: TransactionId,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Flip only the reconciliation flag, leaving everything else untouched.
    fn set_reconciled(
        &self,
        id: TransactionId,
        journal_id: JournalId,
        reconciled: bool,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn find_rule_by_title(
        &self,
        title: &str,
    ) -> impl Future<Output = Result<Option<RemoteRule>, ClientError>> + Send;

    fn update_rule_actions(
        &self,
        rule_id: i64,
        actions: &[RuleAction],
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}
