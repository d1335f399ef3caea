pub mod defaults;
pub mod engine;
pub mod parser;
pub mod store;
pub mod types;

pub use engine::CompiledRuleSet;
pub use store::PolicyStore;
pub use types::{Action, ActionContext, DefaultVerdict, Intent, Rule, RuleSet};

use std::sync::Arc;

/// Thin evaluation front-end: binds the shared store snapshot to the
/// configured default verdict. Evaluation itself is pure per snapshot.
pub struct PolicyEngine {
    store: Arc<PolicyStore>,
    default_verdict: DefaultVerdict,
}

impl PolicyEngine {
    pub fn new(store: Arc<PolicyStore>, default_verdict: DefaultVerdict) -> Self {
        Self {
            store,
            default_verdict,
        }
    }

    /// Evaluate an action against the current rule-set snapshot.
    pub fn evaluate(&self, action: &Action, context: &ActionContext) -> Intent {
        self.store
            .current_rules()
            .evaluate(action, context, self.default_verdict)
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }
}
