use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use tidyledger_client::{ClientError, LedgerClient, TransactionUpdate, UpdateOutcome};
use tidyledger_core::{FieldValue, Transaction, TransactionId};

use crate::policy::ConflictPolicy;

/// One rule's assertion that a field should take a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub rule: String,
    pub value: FieldValue,
}

/// Two rules proposed different values for the same field and no priority
/// relationship arbitrates them. This is a configuration bug and is never
/// resolved silently: merging ambiguous field assignments risks corrupting
/// financial records.
#[derive(Error, Debug, Clone)]
#[error("Overlapping updates between rules '{rule_a}' and '{rule_b}' on transaction {transaction}")]
pub struct ConflictError {
    pub transaction: TransactionId,
    pub rule_a: String,
    pub rule_b: String,
    pub updates_a: BTreeMap<String, FieldValue>,
    pub updates_b: BTreeMap<String, FieldValue>,
}

impl ConflictError {
    /// Multi-line report with both rules' full update sets.
    pub fn detail(&self) -> String {
        let mut out = format!(
            "Overlapping updates on transaction {} between:\n - {}\n - {}\n",
            self.transaction, self.rule_a, self.rule_b
        );
        for (rule, updates) in [(&self.rule_a, &self.updates_a), (&self.rule_b, &self.updates_b)] {
            out.push_str(&format!("{rule} proposed:\n"));
            for (field, value) in updates {
                out.push_str(&format!("    {field}: {value}\n"));
            }
        }
        out
    }
}

/// All pending updates that are going to apply to one transaction.
///
/// Accumulates sanitized proposals from independently-evaluated rules and
/// guarantees at most one winning value per field; unresolvable disagreements
/// surface as [`ConflictError`] before any public state changes.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    entry: Transaction,
    updates: BTreeMap<String, Proposal>,
    rules: Vec<String>,
    merge_tags: bool,
    apply_rules: bool,
}

impl PendingUpdate {
    /// Create from a first rule's proposal. Returns `None` when sanitization
    /// leaves no net change: empty pending updates are never retained.
    pub fn new(
        entry: Transaction,
        rule_name: &str,
        fields: BTreeMap<String, FieldValue>,
        policy: &ConflictPolicy,
    ) -> Option<Self> {
        let updates = Self::sanitize(&entry, rule_name, &fields, policy);
        if updates.is_empty() {
            return None;
        }
        Some(PendingUpdate {
            entry,
            updates,
            rules: vec![rule_name.to_string()],
            merge_tags: true,
            apply_rules: true,
        })
    }

    /// Tag proposals replace the existing set on commit instead of merging.
    pub fn replacing_tags(mut self) -> Self {
        self.merge_tags = false;
        self
    }

    pub fn entry(&self) -> &Transaction {
        &self.entry
    }

    pub fn fields(&self) -> &BTreeMap<String, Proposal> {
        &self.updates
    }

    pub fn contributing_rules(&self) -> &[String] {
        &self.rules
    }

    /// Joined rule names for audit output.
    pub fn rule(&self) -> String {
        self.rules.join(" & ")
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Fold another rule's proposal in, resolving per-field contention.
    ///
    /// For every field proposed by both the incumbent set and the newcomer
    /// (tags always compose additively and are exempt):
    /// 1. if the field has a `rule_priority` policy listing both rules, the
    ///    earlier-listed rule wins and the loser's value is dropped;
    /// 2. else if both values are equal there is no real conflict;
    /// 3. else the accumulation aborts with [`ConflictError`].
    pub fn append_updates(
        &mut self,
        rule_name: &str,
        fields: BTreeMap<String, FieldValue>,
        policy: &ConflictPolicy,
    ) -> Result<(), ConflictError> {
        let mut incoming = Self::sanitize(&self.entry, rule_name, &fields, policy);

        let mut contended: Vec<String> = self
            .updates
            .keys()
            .filter(|k| k.as_str() != "tags" && incoming.contains_key(*k))
            .cloned()
            .collect();

        contended.retain(|key| {
            let incumbent = &self.updates[key];
            match policy.rule_rank(key, rule_name, &incumbent.rule) {
                Some((new_rank, incumbent_rank)) => {
                    if new_rank <= incumbent_rank {
                        self.updates.remove(key);
                    } else {
                        incoming.remove(key);
                    }
                    false
                }
                None => incumbent.value != incoming[key].value,
            }
        });

        if let Some(key) = contended.first() {
            return Err(ConflictError {
                transaction: self.entry.id,
                rule_a: self.updates[key].rule.clone(),
                rule_b: rule_name.to_string(),
                updates_a: self
                    .updates
                    .iter()
                    .map(|(k, p)| (k.clone(), p.value.clone()))
                    .collect(),
                updates_b: incoming
                    .iter()
                    .map(|(k, p)| (k.clone(), p.value.clone()))
                    .collect(),
            });
        }

        if !incoming.is_empty() && !self.rules.iter().any(|r| r == rule_name) {
            self.rules.push(rule_name.to_string());
        }
        self.updates.extend(incoming);
        Ok(())
    }

    /// Reduce a raw proposal to its net effect against the transaction:
    /// vendor-name canonicalization, no-op elision (tags become the net-new
    /// subset), then the mapping-priority keep/discard decision. Pure in its
    /// inputs; applying it twice yields the same set.
    pub fn sanitize(
        entry: &Transaction,
        rule_name: &str,
        fields: &BTreeMap<String, FieldValue>,
        policy: &ConflictPolicy,
    ) -> BTreeMap<String, Proposal> {
        let mut out = BTreeMap::new();

        for (key, value) in fields {
            let value = canonicalize(key, value, policy);
            if key == "tags" {
                let proposed = match &value {
                    FieldValue::Tags(tags) => tags.clone(),
                    // A single tag configured as a bare string.
                    FieldValue::Text(tag) => BTreeSet::from([tag.clone()]),
                };
                let net_new: BTreeSet<String> = proposed
                    .into_iter()
                    .filter(|t| !entry.tags.contains(t))
                    .collect();
                if net_new.is_empty() {
                    continue;
                }
                out.insert(
                    key.clone(),
                    Proposal {
                        rule: rule_name.to_string(),
                        value: FieldValue::Tags(net_new),
                    },
                );
                continue;
            }

            let current = entry.field(key);
            if current.as_ref() == Some(&value) {
                continue;
            }

            // Mapping priority: when both the current and the proposed value
            // are ranked for this field, the proposal only wins with a
            // strictly better (earlier) rank.
            if let (Some(FieldValue::Text(current)), FieldValue::Text(proposed)) =
                (&current, &value)
            {
                if let (Some(current_rank), Some(new_rank)) = (
                    policy.value_rank(key, current),
                    policy.value_rank(key, proposed),
                ) {
                    if current_rank < new_rank {
                        continue;
                    }
                }
            }

            out.insert(
                key.clone(),
                Proposal {
                    rule: rule_name.to_string(),
                    value,
                },
            );
        }
        out
    }

    /// Commit payload: winning values, tags merged with the existing set
    /// (unless replacing), journal id injected for split disambiguation.
    pub fn finalize(&self) -> TransactionUpdate {
        let mut fields = BTreeMap::new();
        for (key, proposal) in &self.updates {
            let value = match &proposal.value {
                FieldValue::Text(s) => serde_json::Value::String(s.clone()),
                FieldValue::Tags(tags) => {
                    let committed: BTreeSet<&String> = if self.merge_tags {
                        self.entry.tags.iter().chain(tags.iter()).collect()
                    } else {
                        tags.iter().collect()
                    };
                    serde_json::Value::Array(
                        committed
                            .into_iter()
                            .map(|t| serde_json::Value::String(t.clone()))
                            .collect(),
                    )
                }
            };
            fields.insert(key.clone(), value);
        }
        TransactionUpdate {
            journal_id: self.entry.journal_id,
            apply_rules: self.apply_rules,
            fields,
        }
    }

    /// Push the finalized payload, unless dry-running.
    pub async fn apply<C: LedgerClient>(
        &self,
        client: &C,
        dry_run: bool,
    ) -> Result<UpdateOutcome, ClientError> {
        let update = self.finalize();
        if dry_run {
            debug!(id = %self.entry.id, ?update, "dry run, skipping update");
            return Ok(UpdateOutcome::Applied);
        }
        client.update_transaction(self.entry.id, &update).await
    }

    /// Recovery path for transactions the remote ledger protects: unset the
    /// reconciled flag, apply the real update, re-set the flag.
    pub async fn apply_overriding_reconciled<C: LedgerClient>(
        &self,
        client: &C,
    ) -> Result<(), ClientError> {
        let id = self.entry.id;
        let journal_id = self.entry.journal_id;
        client.set_reconciled(id, journal_id, false).await?;
        let outcome = client.update_transaction(id, &self.finalize()).await;
        // Restore the flag even when the update itself failed.
        let restore = client.set_reconciled(id, journal_id, true).await;
        match outcome? {
            UpdateOutcome::Applied => restore,
            UpdateOutcome::ReconciledConflict => Err(ClientError::UpdateRejected {
                id,
                message: "still reconciled after unsetting the flag".to_string(),
                payload: String::new(),
            }),
        }
    }

    /// Human-readable diff block for the review step.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "  > date: {}  |  id: {}  |  {}\n    desc: {}\n",
            self.entry.date, self.entry.id, self.entry.amount, self.entry.description
        );
        for (key, proposal) in &self.updates {
            let current = self
                .entry
                .field(key)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "(none)".to_string());
            let mode = if key == "tags" {
                if self.merge_tags {
                    "merge "
                } else {
                    "replace "
                }
            } else {
                ""
            };
            out.push_str(&format!(
                "        > {key}: {current} => {mode}{}\n",
                proposal.value
            ));
        }
        out
    }
}

fn canonicalize(key: &str, value: &FieldValue, policy: &ConflictPolicy) -> FieldValue {
    if matches!(key, "source_name" | "destination_name") {
        if let FieldValue::Text(raw) = value {
            return FieldValue::text(policy.canonical_vendor(raw));
        }
    }
    value.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tidyledger_core::{JournalId, TransactionKind};

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
            category_name: Some("Misc".to_string()),
            tags: BTreeSet::from(["morning".to_string()]),
            reconciled: false,
            extra: BTreeMap::new(),
        }
    }

    fn text_fields(pairs: &[(&str, &str)]) -> BTreeMap<String, FieldValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::text(*v)))
            .collect()
    }

    fn tags(items: &[&str]) -> FieldValue {
        FieldValue::Tags(items.iter().map(|s| s.to_string()).collect())
    }

    fn policy_with_rule_priority(field: &str, rules: &[&str]) -> ConflictPolicy {
        ConflictPolicy {
            rule_priority: BTreeMap::from([(
                field.to_string(),
                rules.iter().map(|s| s.to_string()).collect(),
            )]),
            ..ConflictPolicy::default()
        }
    }

    #[test]
    fn noop_proposal_creates_nothing() {
        let policy = ConflictPolicy::default();
        let fields = text_fields(&[("description", "COFFEE SHOP"), ("category_name", "Misc")]);
        assert!(PendingUpdate::new(tx(), "r", fields, &policy).is_none());
    }

    #[test]
    fn noop_fields_are_elided_from_mixed_proposal() {
        let policy = ConflictPolicy::default();
        let mut fields = text_fields(&[("description", "COFFEE SHOP")]);
        fields.insert("category_name".to_string(), FieldValue::text("Food"));
        let pu = PendingUpdate::new(tx(), "r", fields, &policy).unwrap();
        assert_eq!(pu.fields().len(), 1);
        assert!(pu.fields().contains_key("category_name"));
    }

    #[test]
    fn tags_pending_update_is_net_addition() {
        let policy = ConflictPolicy::default();
        let fields = BTreeMap::from([("tags".to_string(), tags(&["morning", "cafe"]))]);
        let pu = PendingUpdate::new(tx(), "r", fields, &policy).unwrap();
        assert_eq!(pu.fields()["tags"].value, tags(&["cafe"]));

        // Committed tags are the union with the existing set.
        let update = pu.finalize();
        assert_eq!(
            update.fields["tags"],
            serde_json::json!(["cafe", "morning"])
        );
    }

    #[test]
    fn proposing_only_existing_tags_is_noop() {
        let policy = ConflictPolicy::default();
        let fields = BTreeMap::from([("tags".to_string(), tags(&["morning"]))]);
        assert!(PendingUpdate::new(tx(), "r", fields, &policy).is_none());
    }

    #[test]
    fn bare_string_tag_is_wrapped() {
        let policy = ConflictPolicy::default();
        let fields = BTreeMap::from([("tags".to_string(), FieldValue::text("cafe"))]);
        let pu = PendingUpdate::new(tx(), "r", fields, &policy).unwrap();
        assert_eq!(pu.fields()["tags"].value, tags(&["cafe"]));
    }

    #[test]
    fn rule_priority_wins_regardless_of_arrival_order() {
        let policy = policy_with_rule_priority("category_name", &["ruleX", "ruleY"]);

        // ruleX first, ruleY second: ruleX keeps the field.
        let mut pu = PendingUpdate::new(
            tx(),
            "ruleX",
            text_fields(&[("category_name", "FromX")]),
            &policy,
        )
        .unwrap();
        pu.append_updates("ruleY", text_fields(&[("category_name", "FromY")]), &policy)
            .unwrap();
        assert_eq!(pu.fields()["category_name"].value, FieldValue::text("FromX"));
        assert_eq!(pu.fields()["category_name"].rule, "ruleX");

        // ruleY first, ruleX second: same winner.
        let mut pu = PendingUpdate::new(
            tx(),
            "ruleY",
            text_fields(&[("category_name", "FromY")]),
            &policy,
        )
        .unwrap();
        pu.append_updates("ruleX", text_fields(&[("category_name", "FromX")]), &policy)
            .unwrap();
        assert_eq!(pu.fields()["category_name"].value, FieldValue::text("FromX"));
    }

    #[test]
    fn unrelated_rules_with_different_values_conflict() {
        let policy = ConflictPolicy::default();
        let mut pu = PendingUpdate::new(
            tx(),
            "rule-a",
            text_fields(&[("category_name", "Food")]),
            &policy,
        )
        .unwrap();
        let err = pu
            .append_updates("rule-b", text_fields(&[("category_name", "Drink")]), &policy)
            .unwrap_err();
        assert_eq!(err.rule_a, "rule-a");
        assert_eq!(err.rule_b, "rule-b");
        assert_eq!(err.transaction, TransactionId(7));
        assert!(err.detail().contains("Food"));
        assert!(err.detail().contains("Drink"));
    }

    #[test]
    fn equal_values_are_not_a_conflict() {
        let policy = ConflictPolicy::default();
        let mut pu = PendingUpdate::new(
            tx(),
            "rule-a",
            text_fields(&[("category_name", "Food")]),
            &policy,
        )
        .unwrap();
        pu.append_updates("rule-b", text_fields(&[("category_name", "Food")]), &policy)
            .unwrap();
        assert_eq!(pu.fields()["category_name"].value, FieldValue::text("Food"));
        assert_eq!(pu.rule(), "rule-a & rule-b");
    }

    #[test]
    fn layered_updates_on_distinct_fields_compose() {
        let policy = ConflictPolicy::default();
        let mut pu = PendingUpdate::new(
            tx(),
            "rule-a",
            text_fields(&[("category_name", "Food")]),
            &policy,
        )
        .unwrap();
        pu.append_updates(
            "rule-b",
            BTreeMap::from([("tags".to_string(), tags(&["cafe"]))]),
            &policy,
        )
        .unwrap();
        assert_eq!(pu.fields().len(), 2);
        assert_eq!(pu.contributing_rules(), ["rule-a", "rule-b"]);
    }

    #[test]
    fn value_priority_better_rank_wins() {
        // Earlier index = higher priority to keep.
        let policy = ConflictPolicy {
            mapping_priority: BTreeMap::from([(
                "category_name".to_string(),
                vec!["high".to_string(), "mid".to_string(), "low".to_string()],
            )]),
            ..ConflictPolicy::default()
        };
        let mut entry = tx();

        // Current "low" (rank 2), proposed "mid" (rank 1): proposal wins.
        entry.category_name = Some("low".to_string());
        let got = PendingUpdate::sanitize(
            &entry,
            "r",
            &text_fields(&[("category_name", "mid")]),
            &policy,
        );
        assert!(got.contains_key("category_name"));

        // Current "high" (rank 0), proposed "low" (rank 2): discarded.
        entry.category_name = Some("high".to_string());
        let got = PendingUpdate::sanitize(
            &entry,
            "r",
            &text_fields(&[("category_name", "low")]),
            &policy,
        );
        assert!(got.is_empty());
    }

    #[test]
    fn value_priority_ignores_unranked_values() {
        let policy = ConflictPolicy {
            mapping_priority: BTreeMap::from([(
                "category_name".to_string(),
                vec!["high".to_string()],
            )]),
            ..ConflictPolicy::default()
        };
        let mut entry = tx();
        entry.category_name = Some("high".to_string());
        // Proposed value is not ranked: the proposal stands.
        let got = PendingUpdate::sanitize(
            &entry,
            "r",
            &text_fields(&[("category_name", "Anything")]),
            &policy,
        );
        assert!(got.contains_key("category_name"));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let policy = ConflictPolicy {
            vendor_name_mappings: BTreeMap::from([(
                "WOOLWORTHS 1234".to_string(),
                "Woolworths".to_string(),
            )]),
            mapping_priority: BTreeMap::from([(
                "category_name".to_string(),
                vec!["Rent".to_string(), "Misc".to_string()],
            )]),
            ..ConflictPolicy::default()
        };
        let entry = tx();
        let fields = BTreeMap::from([
            (
                "destination_name".to_string(),
                FieldValue::text("WOOLWORTHS 1234"),
            ),
            ("tags".to_string(), tags(&["morning", "cafe"])),
            ("category_name".to_string(), FieldValue::text("Rent")),
        ]);
        let first = PendingUpdate::sanitize(&entry, "r", &fields, &policy);
        let second = PendingUpdate::sanitize(&entry, "r", &fields, &policy);
        assert_eq!(first, second);
        assert_eq!(
            first["destination_name"].value,
            FieldValue::text("Woolworths")
        );
    }

    #[test]
    fn vendor_mapping_can_turn_proposal_into_noop() {
        let policy = ConflictPolicy {
            vendor_name_mappings: BTreeMap::from([(
                "COFFEE SHOP PTY LTD".to_string(),
                "Coffee Shop".to_string(),
            )]),
            ..ConflictPolicy::default()
        };
        // Canonicalized value equals the current destination: elided.
        let fields = BTreeMap::from([(
            "destination_name".to_string(),
            FieldValue::text("COFFEE SHOP PTY LTD"),
        )]);
        assert!(PendingUpdate::new(tx(), "r", fields, &policy).is_none());
    }

    #[test]
    fn finalize_injects_journal_id() {
        let policy = ConflictPolicy::default();
        let pu = PendingUpdate::new(
            tx(),
            "r",
            text_fields(&[("category_name", "Food")]),
            &policy,
        )
        .unwrap();
        let update = pu.finalize();
        assert_eq!(update.journal_id, JournalId(70));
        assert!(update.apply_rules);
        assert_eq!(update.fields["category_name"], serde_json::json!("Food"));
    }

    #[test]
    fn replacing_tags_skips_union() {
        let policy = ConflictPolicy::default();
        let fields = BTreeMap::from([("tags".to_string(), tags(&["cafe"]))]);
        let pu = PendingUpdate::new(tx(), "r", fields, &policy)
            .unwrap()
            .replacing_tags();
        assert_eq!(pu.finalize().fields["tags"], serde_json::json!(["cafe"]));
    }
}
