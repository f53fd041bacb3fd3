use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::Deserialize;
use tidyledger_core::{Transaction, TransactionId};

use crate::rule::{Rule, RuleContext, RuleFlow};
use crate::EngineError;

const NAME: &str = "remove-duplicates";

/// Two same-day entries within this amount distance count as duplicates.
const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DuplicateSettings {
    /// Only transactions touching one of these accounts are examined.
    pub tracked_accounts: Vec<String>,
    /// Known-good groups: if a detected group is covered by one of these id
    /// sets it is skipped without prompting.
    pub exceptions: Vec<BTreeSet<i64>>,
}

/// Interactive duplicate removal over tracked accounts. Disabled by default
/// because it deletes data.
#[derive(Debug, Default)]
pub struct DuplicateRule {
    settings: DuplicateSettings,
    /// Transactions already grouped this run, so each group prompts once.
    handled: BTreeSet<TransactionId>,
    skipped: Vec<Vec<TransactionId>>,
}

impl DuplicateRule {
    pub fn from_config(value: Option<&toml::Value>) -> Result<Self, EngineError> {
        Ok(DuplicateRule {
            settings: super::parse_section(NAME, value)?,
            ..DuplicateRule::default()
        })
    }

    pub fn new(settings: DuplicateSettings) -> Self {
        DuplicateRule {
            settings,
            ..DuplicateRule::default()
        }
    }

    fn tracked(&self, entry: &Transaction) -> bool {
        self.settings.tracked_accounts.iter().any(|account| {
            entry.source_name.as_deref() == Some(account)
                || entry.destination_name.as_deref() == Some(account)
        })
    }

    fn excepted(&self, group: &[&Transaction]) -> bool {
        self.settings
            .exceptions
            .iter()
            .any(|ids| group.iter().all(|t| ids.contains(&t.id.0)))
    }
}

/// Same date, amounts within tolerance, one description a prefix or suffix
/// of the other, and a shared endpoint account.
fn is_duplicate(a: &Transaction, b: &Transaction) -> bool {
    if a.date != b.date || a.kind != b.kind {
        return false;
    }
    if !a.amount.within(b.amount, AMOUNT_TOLERANCE) {
        return false;
    }
    let da = a.description.to_lowercase();
    let db = b.description.to_lowercase();
    let desc_related = da.starts_with(&db)
        || db.starts_with(&da)
        || da.ends_with(&db)
        || db.ends_with(&da);
    if !desc_related {
        return false;
    }
    (a.source_id.is_some() && a.source_id == b.source_id)
        || (a.destination_id.is_some() && a.destination_id == b.destination_id)
}

impl Rule for DuplicateRule {
    fn base_name(&self) -> &'static str {
        NAME
    }

    fn enabled_by_default(&self) -> bool {
        false
    }

    fn process(
        &mut self,
        entry: &Transaction,
        ctx: &mut RuleContext<'_>,
    ) -> Result<RuleFlow, EngineError> {
        if self.handled.contains(&entry.id) || !self.tracked(entry) {
            return Ok(RuleFlow::Continue);
        }
        let mut group: Vec<&Transaction> = vec![entry];
        group.extend(ctx.transactions.iter().filter(|other| {
            other.id != entry.id
                && !self.handled.contains(&other.id)
                && is_duplicate(entry, other)
        }));
        if group.len() < 2 {
            return Ok(RuleFlow::Continue);
        }
        let ids: Vec<TransactionId> = group.iter().map(|t| t.id).collect();
        self.handled.extend(ids.iter().copied());

        if self.excepted(&group) {
            return Ok(RuleFlow::Continue);
        }

        println!("Possible duplicates:");
        for t in &group {
            println!(
                "  id {}: {} {} {} ({})",
                t.id, t.date, t.amount, t.description, t.owner()
            );
        }
        loop {
            let Some(line) =
                ctx.prompter
                    .line("Enter the id to delete, or leave empty to skip")
            else {
                break;
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                break;
            }
            match line.parse::<i64>() {
                Ok(raw) if ids.contains(&TransactionId(raw)) => {
                    ctx.mark_for_delete(TransactionId(raw));
                    return Ok(RuleFlow::Continue);
                }
                _ => println!("'{line}' is not an id in this group, try again"),
            }
        }
        self.skipped.push(ids);
        Ok(RuleFlow::Continue)
    }

    fn summarize(&self, _ctx: &mut RuleContext<'_>) {
        if self.skipped.is_empty() {
            return;
        }
        println!("Duplicate groups skipped this run (add to exceptions to silence):");
        for group in &self.skipped {
            let ids: Vec<String> = group.iter().map(|id| id.to_string()).collect();
            println!("  [{}]", ids.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ConflictPolicy;
    use crate::prompt::ScriptedPrompter;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use tidyledger_core::{JournalId, TransactionKind};

    fn tx(id: i64, description: &str) -> Transaction {
        Transaction {
            id: TransactionId(id),
            journal_id: JournalId(id * 10),
            kind: TransactionKind::Withdrawal,
            amount: "15.00".parse().unwrap(),
            date: NaiveDate::from_ymd_opt(2024, 5, 5).unwrap(),
            description: description.to_string(),
            source_id: Some(1),
            source_name: Some("Checking".to_string()),
            destination_id: Some(2),
            destination_name: Some("Deli".to_string()),
            category_name: None,
            tags: BTreeSet::new(),
            reconciled: false,
            extra: BTreeMap::new(),
        }
    }

    fn settings() -> DuplicateSettings {
        DuplicateSettings {
            tracked_accounts: vec!["Checking".to_string()],
            exceptions: Vec::new(),
        }
    }

    fn run(
        rule: &mut DuplicateRule,
        batch: &[Transaction],
        answers: &[&str],
    ) -> BTreeSet<TransactionId> {
        let policy = ConflictPolicy::default();
        let mut prompter = ScriptedPrompter::new(answers.iter().copied());
        let mut updates = BTreeMap::new();
        let mut deletes = BTreeSet::new();
        let mut ctx = RuleContext::new(
            &policy,
            batch,
            None,
            &mut prompter,
            &mut updates,
            &mut deletes,
        );
        for entry in batch {
            rule.process(entry, &mut ctx).unwrap();
        }
        rule.summarize(&mut ctx);
        deletes
    }

    #[test]
    fn duplicate_pair_is_detected_and_victim_deleted() {
        let batch = [tx(1, "LUNCH DELI"), tx(2, "LUNCH DELI 1234")];
        let mut rule = DuplicateRule::new(settings());
        let deletes = run(&mut rule, &batch, &["2"]);
        assert_eq!(deletes, BTreeSet::from([TransactionId(2)]));
    }

    #[test]
    fn empty_answer_skips_and_is_reported() {
        let batch = [tx(1, "LUNCH DELI"), tx(2, "LUNCH DELI 1234")];
        let mut rule = DuplicateRule::new(settings());
        let deletes = run(&mut rule, &batch, &[""]);
        assert!(deletes.is_empty());
        assert_eq!(rule.skipped.len(), 1);
    }

    #[test]
    fn invalid_id_reprompts() {
        let batch = [tx(1, "LUNCH DELI"), tx(2, "LUNCH DELI 1234")];
        let mut rule = DuplicateRule::new(settings());
        let deletes = run(&mut rule, &batch, &["99", "1"]);
        assert_eq!(deletes, BTreeSet::from([TransactionId(1)]));
    }

    #[test]
    fn exception_group_is_silent() {
        let batch = [tx(1, "LUNCH DELI"), tx(2, "LUNCH DELI 1234")];
        let mut rule = DuplicateRule::new(DuplicateSettings {
            tracked_accounts: vec!["Checking".to_string()],
            exceptions: vec![BTreeSet::from([1, 2])],
        });
        let deletes = run(&mut rule, &batch, &[]);
        assert!(deletes.is_empty());
        assert!(rule.skipped.is_empty());
    }

    #[test]
    fn untracked_account_is_ignored() {
        let mut a = tx(1, "LUNCH DELI");
        let mut b = tx(2, "LUNCH DELI");
        a.source_name = Some("Other".to_string());
        b.source_name = Some("Other".to_string());
        let mut rule = DuplicateRule::new(settings());
        let deletes = run(&mut rule, &[a, b], &["1"]);
        assert!(deletes.is_empty());
    }

    #[test]
    fn different_dates_are_not_duplicates() {
        let a = tx(1, "LUNCH DELI");
        let mut b = tx(2, "LUNCH DELI");
        b.date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert!(!is_duplicate(&a, &b));
    }

    #[test]
    fn amount_within_tolerance_counts() {
        let a = tx(1, "LUNCH DELI");
        let mut b = tx(2, "LUNCH DELI");
        b.amount = "15.001".parse().unwrap();
        assert!(is_duplicate(&a, &b));
        b.amount = "15.10".parse().unwrap();
        assert!(!is_duplicate(&a, &b));
    }
}
