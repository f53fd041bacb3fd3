//! The fixed set of maintenance rules.
//!
//! Rules are registered statically here; each one deserializes its own
//! section of the `[rules]` configuration table.

mod classify;
mod display;
mod duplicates;
mod non_reconciled;
mod search_keyword;

pub use classify::{ClassifyProfile, ClassifyRule};
pub use display::DisplayFilteredRule;
pub use duplicates::{DuplicateRule, DuplicateSettings};
pub use non_reconciled::DeleteNonReconciledRule;
pub use search_keyword::{SearchKeywordProfile, SearchKeywordRule};

use crate::rule::Rule;
use crate::EngineError;

/// Build every known rule in its fixed evaluation order.
///
/// `config` is the `[rules]` table from the application configuration; each
/// rule reads the key matching its name.
pub fn build_rules(config: &toml::value::Table) -> Result<Vec<Box<dyn Rule>>, EngineError> {
    Ok(vec![
        Box::new(ClassifyRule::from_config(config.get("classify"))?),
        Box::new(SearchKeywordRule::from_config(config.get("search-keyword"))?),
        Box::new(DuplicateRule::from_config(config.get("remove-duplicates"))?),
        Box::new(DeleteNonReconciledRule::default()),
        Box::new(DisplayFilteredRule::default()),
    ])
}

/// Deserialize one rule's configuration block, attributing parse failures to
/// the rule by name.
fn parse_section<T>(rule: &'static str, value: Option<&toml::Value>) -> Result<T, EngineError>
where
    T: Default + serde::de::DeserializeOwned,
{
    match value {
        Some(v) => v.clone().try_into().map_err(|e| EngineError::RuleConfig {
            rule: rule.to_string(),
            message: e.to_string(),
        }),
        None => Ok(T::default()),
    }
}
