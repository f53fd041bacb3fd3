pub mod expr;
pub mod keyword;
pub mod ledger;
pub mod orchestrator;
pub mod policy;
pub mod prompt;
pub mod rule;
pub mod rules;
pub mod transfer;

pub use expr::Expr;
pub use keyword::find_keyword;
pub use ledger::{ConflictError, PendingUpdate};
pub use orchestrator::{
    render_review, CommitOptions, CommitReport, Orchestrator, RuleSelection, RunOutcome,
};
pub use policy::ConflictPolicy;
pub use prompt::{Prompter, ScriptedPrompter, StdinPrompter};
pub use rule::{normalize_name, Rule, RuleContext, RuleFlow};
pub use rules::build_rules;
pub use transfer::{TransferOptions, TransferReconciler, TransferReport, STAGING_TAG};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("Bad configuration for rule '{rule}': {message}")]
    RuleConfig { rule: String, message: String },
    #[error("Rule '{rule}' requires a --rule-config value: {message}")]
    MissingRuleConfig { rule: String, message: String },
    #[error("Invalid filter expression: {0}")]
    Expr(String),
    #[error(transparent)]
    Client(#[from] tidyledger_client::ClientError),
}
