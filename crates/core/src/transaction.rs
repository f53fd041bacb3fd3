use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::amount::Amount;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TransactionId(pub i64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The journal id disambiguates one split inside a transaction group; the
/// remote API requires it on every update.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JournalId(pub i64);

impl fmt::Display for JournalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    #[serde(rename = "withdrawal")]
    Withdrawal,
    #[serde(rename = "deposit")]
    Deposit,
    #[serde(rename = "transfer")]
    Transfer,
    #[serde(rename = "opening balance")]
    OpeningBalance,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Withdrawal => write!(f, "withdrawal"),
            TransactionKind::Deposit => write!(f, "deposit"),
            TransactionKind::Transfer => write!(f, "transfer"),
            TransactionKind::OpeningBalance => write!(f, "opening balance"),
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "deposit" => Ok(TransactionKind::Deposit),
            "transfer" => Ok(TransactionKind::Transfer),
            "opening balance" | "opening-balance" => Ok(TransactionKind::OpeningBalance),
            other => Err(format!("Unknown transaction type: '{other}'")),
        }
    }
}

/// A value a rule may propose for an updatable field. Tags hold a set so the
/// ledger can compute net additions instead of blind replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Tags(BTreeSet<String>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    pub fn tag(s: impl Into<String>) -> Self {
        FieldValue::Tags(BTreeSet::from([s.into()]))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Tags(tags) => {
                let joined: Vec<&str> = tags.iter().map(String::as_str).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// The account(s) a transaction belongs to, for human-readable grouping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransactionOwner {
    Single(String),
    Pair(String, String),
}

impl fmt::Display for TransactionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOwner::Single(name) => write!(f, "{name}"),
            TransactionOwner::Pair(a, b) => write!(f, "{a} / {b}"),
        }
    }
}

/// Immutable snapshot of one financial event as returned by the ledger API.
/// Never mutated in place; updates are expressed as pending-update
/// projections against it. Attributes the API serves but this struct does
/// not model land in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub journal_id: JournalId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub date: NaiveDate,
    pub description: String,
    pub source_id: Option<i64>,
    pub source_name: Option<String>,
    pub destination_id: Option<i64>,
    pub destination_name: Option<String>,
    pub category_name: Option<String>,
    pub tags: BTreeSet<String>,
    pub reconciled: bool,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Transaction {
    /// Read an updatable field by name. Returns `None` when the transaction
    /// holds no meaningful value for it (empty or absent).
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        let non_empty = |s: &Option<String>| {
            s.as_deref()
                .filter(|v| !v.is_empty())
                .map(FieldValue::text)
        };
        match name {
            "description" => Some(FieldValue::text(&self.description)),
            "category_name" => non_empty(&self.category_name),
            "source_name" => non_empty(&self.source_name),
            "destination_name" => non_empty(&self.destination_name),
            "tags" => {
                if self.tags.is_empty() {
                    None
                } else {
                    Some(FieldValue::Tags(self.tags.clone()))
                }
            }
            other => self
                .extra
                .get(other)
                .filter(|v| !v.is_empty())
                .map(FieldValue::text),
        }
    }

    /// Which account this transaction is attributed to: withdrawals to their
    /// source, deposits and opening balances to their destination, transfers
    /// to both.
    pub fn owner(&self) -> TransactionOwner {
        let name = |s: &Option<String>| s.clone().unwrap_or_else(|| "(unknown)".to_string());
        match self.kind {
            TransactionKind::Withdrawal => TransactionOwner::Single(name(&self.source_name)),
            TransactionKind::Deposit | TransactionKind::OpeningBalance => {
                TransactionOwner::Single(name(&self.destination_name))
            }
            TransactionKind::Transfer => {
                TransactionOwner::Pair(name(&self.source_name), name(&self.destination_name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> Transaction {
        Transaction {
            id: TransactionId(7),
            journal_id: JournalId(70),
            kind: TransactionKind::Withdrawal,
            amount: "25.00".parse().unwrap(),
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            description: "COFFEE SHOP".to_string(),
            source_id: Some(1),
            source_name: Some("Checking".to_string()),
            destination_id: Some(2),
            destination_name: Some("Coffee Shop".to_string()),
            category_name: None,
            tags: BTreeSet::from(["morning".to_string()]),
            reconciled: false,
            extra: BTreeMap::from([("notes".to_string(), "receipt kept".to_string())]),
        }
    }

    #[test]
    fn field_known_names() {
        let t = tx();
        assert_eq!(t.field("description"), Some(FieldValue::text("COFFEE SHOP")));
        assert_eq!(t.field("source_name"), Some(FieldValue::text("Checking")));
        assert_eq!(t.field("category_name"), None);
        assert_eq!(
            t.field("tags"),
            Some(FieldValue::Tags(BTreeSet::from(["morning".to_string()])))
        );
    }

    #[test]
    fn field_falls_through_to_extra() {
        let t = tx();
        assert_eq!(t.field("notes"), Some(FieldValue::text("receipt kept")));
        assert_eq!(t.field("no_such_field"), None);
    }

    #[test]
    fn empty_string_fields_read_as_absent() {
        let mut t = tx();
        t.category_name = Some(String::new());
        assert_eq!(t.field("category_name"), None);
    }

    #[test]
    fn owner_by_kind() {
        let mut t = tx();
        assert_eq!(t.owner(), TransactionOwner::Single("Checking".to_string()));
        t.kind = TransactionKind::Deposit;
        assert_eq!(t.owner(), TransactionOwner::Single("Coffee Shop".to_string()));
        t.kind = TransactionKind::Transfer;
        assert_eq!(
            t.owner(),
            TransactionOwner::Pair("Checking".to_string(), "Coffee Shop".to_string())
        );
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            TransactionKind::Withdrawal,
            TransactionKind::Deposit,
            TransactionKind::Transfer,
            TransactionKind::OpeningBalance,
        ] {
            assert_eq!(kind.to_string().parse::<TransactionKind>().unwrap(), kind);
        }
    }
}
