use tidyledger_core::Transaction;

use crate::expr::Expr;
use crate::rule::{Rule, RuleContext, RuleFlow};
use crate::EngineError;

const NAME: &str = "display-filtered";

/// Prints transactions matching a filter expression given as the rule
/// config. Purely diagnostic; proposes nothing.
#[derive(Debug, Default)]
pub struct DisplayFilteredRule {
    filter: Option<Expr>,
    shown: usize,
}

impl Rule for DisplayFilteredRule {
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
        if self.filter.is_none() {
            let Some(source) = ctx.rule_config else {
                return Err(EngineError::MissingRuleConfig {
                    rule: NAME.to_string(),
                    message: "pass a filter expression, e.g. \"amount > 100 and kind == withdrawal\""
                        .to_string(),
                });
            };
            self.filter = Some(Expr::parse(source)?);
        }
        let filter = self.filter.as_ref().unwrap();
        if filter.matches(entry) {
            println!(
                "id {}: {} {} {} | {} ({})",
                entry.id,
                entry.date,
                entry.kind,
                entry.amount,
                entry.description,
                entry.owner()
            );
            self.shown += 1;
        }
        Ok(RuleFlow::Continue)
    }

    fn summarize(&self, _ctx: &mut RuleContext<'_>) {
        println!("{NAME}: {} transaction(s) matched", self.shown);
    }
}
