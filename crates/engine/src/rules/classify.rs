use std::collections::BTreeMap;

use serde::Deserialize;
use tidyledger_core::{FieldValue, Transaction, TransactionKind};

use crate::keyword::find_keyword;
use crate::rule::{Rule, RuleContext, RuleFlow};
use crate::EngineError;

const NAME: &str = "classify";

/// One classification table: when a keyword for `kind` matches the
/// description, set `target` to the mapped value.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifyProfile {
    /// Suffix for conflict attribution; the effective rule name is
    /// `classify__<name>`.
    pub name: String,
    /// Attribute receiving the mapped value, e.g. `category_name` or
    /// `opposite_account_name`.
    pub target: String,
    /// When set, the literal keyword that matched is stored here too.
    #[serde(default)]
    pub keyword_attribute: Option<String>,
    /// Low-priority tier: only fire when `target` currently has no value.
    #[serde(default)]
    pub only_when_empty: bool,
    /// kind -> mapped value -> keywords.
    #[serde(default)]
    pub mappings: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

/// Keyword classifier over transaction descriptions.
#[derive(Debug, Default)]
pub struct ClassifyRule {
    profiles: Vec<ClassifyProfile>,
}

impl ClassifyRule {
    pub fn from_config(value: Option<&toml::Value>) -> Result<Self, EngineError> {
        Ok(ClassifyRule {
            profiles: super::parse_section(NAME, value)?,
        })
    }

    pub fn new(profiles: Vec<ClassifyProfile>) -> Self {
        ClassifyRule { profiles }
    }
}

impl Rule for ClassifyRule {
    fn base_name(&self) -> &'static str {
        NAME
    }

    fn process(
        &mut self,
        entry: &Transaction,
        ctx: &mut RuleContext<'_>,
    ) -> Result<RuleFlow, EngineError> {
        for profile in &self.profiles {
            if profile.only_when_empty && entry.field(&profile.target).is_some() {
                continue;
            }
            let Some(by_value) = mappings_for_kind(profile, entry.kind) else {
                continue;
            };
            for (value, keywords) in by_value {
                let Some(found) = find_keyword(Some(&entry.description), keywords) else {
                    continue;
                };
                let mut fields =
                    BTreeMap::from([(profile.target.clone(), FieldValue::text(value))]);
                if let Some(attr) = &profile.keyword_attribute {
                    fields.insert(attr.clone(), FieldValue::text(found));
                }
                ctx.add_updates(&format!("{NAME}__{}", profile.name), entry, fields)?;
                break;
            }
        }
        Ok(RuleFlow::Continue)
    }
}

fn mappings_for_kind(
    profile: &ClassifyProfile,
    kind: TransactionKind,
) -> Option<&BTreeMap<String, Vec<String>>> {
    profile
        .mappings
        .iter()
        .find(|(key, _)| key.parse::<TransactionKind>().ok() == Some(kind))
        .map(|(_, v)| v)
}
