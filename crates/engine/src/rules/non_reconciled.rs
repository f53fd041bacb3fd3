use tidyledger_core::Transaction;

use crate::rule::{Rule, RuleContext, RuleFlow};
use crate::EngineError;

const NAME: &str = "delete-non-reconciled";

/// Flags every unreconciled transaction touching one account for deletion.
/// The account comes from the free-form rule config; disabled by default.
#[derive(Debug, Default)]
pub struct DeleteNonReconciledRule {
    flagged: usize,
}

impl Rule for DeleteNonReconciledRule {
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
        let Some(account) = ctx.rule_config else {
            return Err(EngineError::MissingRuleConfig {
                rule: NAME.to_string(),
                message: "pass the account name whose unreconciled entries should go".to_string(),
            });
        };
        if entry.reconciled {
            return Ok(RuleFlow::Continue);
        }
        let touches = entry.source_name.as_deref() == Some(account)
            || entry.destination_name.as_deref() == Some(account);
        if touches {
            println!(
                "flagging unreconciled id {}: {} {} {}",
                entry.id, entry.date, entry.amount, entry.description
            );
            ctx.mark_for_delete(entry.id);
            self.flagged += 1;
        }
        Ok(RuleFlow::Continue)
    }

    fn summarize(&self, _ctx: &mut RuleContext<'_>) {
        println!("{NAME}: {} transaction(s) flagged", self.flagged);
    }
}
