use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Conflict-resolution policy tables, supplied by configuration.
///
/// `rule_priority` maps a field name to an ordered list of rule names;
/// `mapping_priority` maps a field name to an ordered list of values.
/// In both tables, earlier index = higher priority.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictPolicy {
    pub rule_priority: BTreeMap<String, Vec<String>>,
    pub mapping_priority: BTreeMap<String, Vec<String>>,
    pub vendor_name_mappings: BTreeMap<String, String>,
}

impl ConflictPolicy {
    /// Rank of `rule` for `field`, when both rules appear in the field's
    /// priority list. `None` means the policy does not arbitrate this pair.
    pub fn rule_rank(&self, field: &str, rule_a: &str, rule_b: &str) -> Option<(usize, usize)> {
        let order = self.rule_priority.get(field)?;
        let a = order.iter().position(|r| r == rule_a)?;
        let b = order.iter().position(|r| r == rule_b)?;
        Some((a, b))
    }

    pub fn value_rank(&self, field: &str, value: &str) -> Option<usize> {
        self.mapping_priority
            .get(field)?
            .iter()
            .position(|v| v == value)
    }

    pub fn canonical_vendor<'a>(&'a self, raw: &'a str) -> &'a str {
        self.vendor_name_mappings
            .get(raw)
            .map(String::as_str)
            .unwrap_or(raw)
    }
}
