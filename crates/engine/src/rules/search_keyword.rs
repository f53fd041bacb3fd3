use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use tidyledger_core::{FieldValue, Transaction, TransactionKind};

use crate::keyword::find_keyword;
use crate::rule::{Rule, RuleContext, RuleFlow};
use crate::EngineError;

const NAME: &str = "search-keyword";

/// One conditional search-and-replace: a keyword gate on `field`, optional
/// extra conditions, then `replace` as the proposal.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchKeywordProfile {
    pub name: String,
    /// Field the keywords are searched in.
    pub field: String,
    pub keywords: Vec<String>,
    /// Transaction kind equality gate.
    #[serde(default)]
    pub kind: Option<TransactionKind>,
    /// field -> substrings that must all appear (case-insensitive).
    #[serde(default)]
    pub contains: BTreeMap<String, Vec<String>>,
    /// field -> substrings none of which may appear.
    #[serde(default)]
    pub not_contains: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    /// field -> replacement value.
    pub replace: BTreeMap<String, String>,
    /// Suppress all later rules for a matched transaction.
    #[serde(default)]
    pub stop: bool,
}

impl SearchKeywordProfile {
    fn applies(&self, entry: &Transaction) -> bool {
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        let amount = entry.amount.as_decimal();
        if self.min_amount.is_some_and(|min| amount < min) {
            return false;
        }
        if self.max_amount.is_some_and(|max| amount > max) {
            return false;
        }
        let field_text = |field: &str| {
            entry
                .field(field)
                .map(|v| v.to_string().to_lowercase())
                .unwrap_or_default()
        };
        for (field, needles) in &self.contains {
            let hay = field_text(field);
            if !needles.iter().all(|n| hay.contains(&n.to_lowercase())) {
                return false;
            }
        }
        for (field, needles) in &self.not_contains {
            let hay = field_text(field);
            if needles.iter().any(|n| hay.contains(&n.to_lowercase())) {
                return false;
            }
        }
        true
    }
}

/// Conditional search-and-replace over configured fields.
#[derive(Debug, Default)]
pub struct SearchKeywordRule {
    profiles: Vec<SearchKeywordProfile>,
}

impl SearchKeywordRule {
    pub fn from_config(value: Option<&toml::Value>) -> Result<Self, EngineError> {
        Ok(SearchKeywordRule {
            profiles: super::parse_section(NAME, value)?,
        })
    }

    pub fn new(profiles: Vec<SearchKeywordProfile>) -> Self {
        SearchKeywordRule { profiles }
    }
}

impl Rule for SearchKeywordRule {
    fn base_name(&self) -> &'static str {
        NAME
    }

    fn process(
        &mut self,
        entry: &Transaction,
        ctx: &mut RuleContext<'_>,
    ) -> Result<RuleFlow, EngineError> {
        for profile in &self.profiles {
            let hay = entry.field(&profile.field).map(|v| v.to_string());
            if find_keyword(hay.as_deref(), &profile.keywords).is_none() {
                continue;
            }
            if !profile.applies(entry) {
                continue;
            }
            let fields: BTreeMap<String, FieldValue> = profile
                .replace
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::text(v)))
                .collect();
            ctx.add_updates(&format!("{NAME}__{}", profile.name), entry, fields)?;
            if profile.stop {
                return Ok(RuleFlow::Stop);
            }
        }
        Ok(RuleFlow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ConflictPolicy;
    use crate::prompt::ScriptedPrompter;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use tidyledger_core::{JournalId, TransactionId};

    fn tx() -> Transaction {
        Transaction {
            id: TransactionId(1),
            journal_id: JournalId(10),
            kind: TransactionKind::Withdrawal,
            amount: "120.00".parse().unwrap(),
            date: NaiveDate::from_ymd_opt(2024, 4, 4).unwrap(),
            description: "DIRECT DEBIT ACME INSURANCE".to_string(),
            source_id: Some(1),
            source_name: Some("Checking".to_string()),
            destination_id: Some(2),
            destination_name: Some("Unknown".to_string()),
            category_name: None,
            tags: BTreeSet::new(),
            reconciled: false,
            extra: BTreeMap::new(),
        }
    }

    fn insurance_profile() -> SearchKeywordProfile {
        toml::from_str(
            r#"
            name = "insurance"
            field = "description"
            keywords = ["ACME INSURANCE"]
            kind = "withdrawal"
            min_amount = 50.0
            not_contains = { description = ["REFUND"] }

            [replace]
            category_name = "Insurance"
            destination_name = "Acme Insurance"
            "#,
        )
        .unwrap()
    }

    fn run(rule: &mut SearchKeywordRule, entry: &Transaction) -> (RuleFlow, bool) {
        let policy = ConflictPolicy::default();
        let batch = [entry.clone()];
        let mut prompter = ScriptedPrompter::default();
        let mut updates = BTreeMap::new();
        let mut deletes = BTreeSet::new();
        let mut ctx = RuleContext::new(
            &policy,
            &batch,
            None,
            &mut prompter,
            &mut updates,
            &mut deletes,
        );
        let flow = rule.process(entry, &mut ctx).unwrap();
        (flow, updates.contains_key(&entry.id))
    }

    #[test]
    fn matching_profile_proposes_replacements() {
        let mut rule = SearchKeywordRule::new(vec![insurance_profile()]);
        let (flow, proposed) = run(&mut rule, &tx());
        assert_eq!(flow, RuleFlow::Continue);
        assert!(proposed);
    }

    #[test]
    fn amount_gate_blocks_small_transactions() {
        let mut rule = SearchKeywordRule::new(vec![insurance_profile()]);
        let mut entry = tx();
        entry.amount = "10.00".parse().unwrap();
        let (_, proposed) = run(&mut rule, &entry);
        assert!(!proposed);
    }

    #[test]
    fn not_contains_gate() {
        let mut rule = SearchKeywordRule::new(vec![insurance_profile()]);
        let mut entry = tx();
        entry.description = "ACME INSURANCE REFUND".to_string();
        let (_, proposed) = run(&mut rule, &entry);
        assert!(!proposed);
    }

    #[test]
    fn stop_profile_short_circuits() {
        let mut profile = insurance_profile();
        profile.stop = true;
        let mut rule = SearchKeywordRule::new(vec![profile]);
        let (flow, proposed) = run(&mut rule, &tx());
        assert_eq!(flow, RuleFlow::Stop);
        assert!(proposed);
    }
}
