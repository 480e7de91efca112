//! Self-hosted alert evaluation
//!
//! Rules are written in Datadog monitor syntax so the same definitions can be
//! evaluated locally against the in-process metric store or exported as
//! Datadog monitors.

pub mod catalog;
pub mod checker;
pub mod evaluator;
pub mod notifier;
pub mod query;
pub mod rule;
pub mod state;
pub mod template;

pub use catalog::{builtin_rule_set, load_rule_set};
pub use checker::{AlertChecker, RuleStatus};
pub use evaluator::{CheckError, Evaluator};
pub use notifier::{AlertNotification, Notifier, NotifierError, NotifyTarget};
pub use query::{parse_query, Comparator, ParsedQuery, QueryError, QueryExpr};
pub use rule::{
    AlertRule, CompiledRuleSet, MissingDataPolicy, RuleError, RuleKind, RuleSet, Slo, Thresholds,
};
pub use state::{AlertState, NotificationKind, Transition};
