//! Alert rule and SLO definitions

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::query::{parse_query, parse_window, Comparator, ParsedQuery, QueryError, QueryExpr};

/// How a rule is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    Threshold,
    SloBurnRate,
    SloErrorBudget,
}

impl RuleKind {
    /// Datadog monitor `type`
    pub fn monitor_type(&self) -> &'static str {
        match self {
            RuleKind::Threshold => "query alert",
            RuleKind::SloBurnRate | RuleKind::SloErrorBudget => "slo alert",
        }
    }
}

/// Static comparison bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub critical: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<f64>,
}

/// What to do when a window has no data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDataPolicy {
    /// Keep the previous state
    #[default]
    Default,
    /// Move to NO_DATA silently
    ShowNoData,
    /// Move to NO_DATA and notify
    ShowAndNotifyNoData,
    /// Treat as recovered
    Resolve,
}

impl MissingDataPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingDataPolicy::Default => "default",
            MissingDataPolicy::ShowNoData => "show_no_data",
            MissingDataPolicy::ShowAndNotifyNoData => "show_and_notify_no_data",
            MissingDataPolicy::Resolve => "resolve",
        }
    }
}

/// Declarative alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub kind: RuleKind,
    pub query: String,
    pub thresholds: Thresholds,
    #[serde(rename = "message")]
    pub message_template: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub on_missing_data: MissingDataPolicy,
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        kind: RuleKind,
        query: impl Into<String>,
        critical: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            query: query.into(),
            thresholds: Thresholds {
                critical,
                warning: None,
            },
            message_template: String::new(),
            tags: BTreeSet::new(),
            on_missing_data: MissingDataPolicy::Default,
        }
    }

    pub fn with_warning(mut self, warning: f64) -> Self {
        self.thresholds.warning = Some(warning);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message_template = message.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_missing_data(mut self, policy: MissingDataPolicy) -> Self {
        self.on_missing_data = policy;
        self
    }

    /// Parse the query and check it against the rule's kind and thresholds
    pub fn compile(&self) -> Result<CompiledRule, RuleError> {
        let parsed = parse_query(&self.query).map_err(|source| RuleError::Query {
            rule: self.name.clone(),
            source,
        })?;

        let kind_matches = matches!(
            (&self.kind, &parsed.expr),
            (RuleKind::Threshold, QueryExpr::Metric(_))
                | (RuleKind::SloBurnRate, QueryExpr::BurnRate(_))
                | (RuleKind::SloErrorBudget, QueryExpr::ErrorBudget(_))
        );
        if !kind_matches {
            return Err(RuleError::KindMismatch(self.name.clone()));
        }

        if (parsed.threshold - self.thresholds.critical).abs() > f64::EPSILON {
            return Err(RuleError::ThresholdMismatch {
                rule: self.name.clone(),
                query: parsed.threshold,
                critical: self.thresholds.critical,
            });
        }

        if let Some(warning) = self.thresholds.warning {
            let monotonic = if parsed.comparator.is_upper_bound() {
                warning <= self.thresholds.critical
            } else {
                warning >= self.thresholds.critical
            };
            if !monotonic {
                return Err(RuleError::NonMonotonicThresholds {
                    rule: self.name.clone(),
                    comparator: parsed.comparator,
                    warning,
                    critical: self.thresholds.critical,
                });
            }
        }

        Ok(CompiledRule {
            rule: self.clone(),
            parsed,
        })
    }

    /// Datadog monitor payload for `POST /api/v1/monitor`
    pub fn to_monitor_payload(&self) -> serde_json::Value {
        let mut options = serde_json::json!({
            "thresholds": self.thresholds,
            "include_tags": true,
        });
        if self.kind == RuleKind::Threshold {
            options["on_missing_data"] = self.on_missing_data.as_str().into();
        }

        serde_json::json!({
            "name": self.name,
            "type": self.kind.monitor_type(),
            "query": self.query,
            "message": self.message_template,
            "tags": self.tags,
            "options": options,
        })
    }
}

/// A rule whose query has been parsed and validated
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub rule: AlertRule,
    pub parsed: ParsedQuery,
}

impl CompiledRule {
    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn comparator(&self) -> Comparator {
        self.parsed.comparator
    }

    /// SLO referenced by the query, if any
    pub fn slo_id(&self) -> Option<&str> {
        match &self.parsed.expr {
            QueryExpr::BurnRate(q) => Some(&q.slo_id),
            QueryExpr::ErrorBudget(q) => Some(&q.slo_id),
            QueryExpr::Metric(_) => None,
        }
    }
}

/// Service level objective over count metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slo {
    pub id: String,
    pub name: String,
    /// Target success percentage, e.g. 99.0
    pub target: f64,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    pub good_metric: String,
    pub total_metric: String,
    /// Tags every counted point must carry
    #[serde(default)]
    pub scope: Vec<String>,
}

fn default_timeframe() -> String {
    "7d".to_string()
}

impl Slo {
    /// Fraction of requests allowed to fail
    pub fn error_budget_fraction(&self) -> f64 {
        1.0 - self.target / 100.0
    }

    pub fn timeframe(&self) -> Result<Duration, QueryError> {
        parse_window(&self.timeframe)
    }

    fn validate(&self) -> Result<(), RuleError> {
        if !(self.target > 0.0 && self.target < 100.0) {
            return Err(RuleError::InvalidSlo {
                slo: self.id.clone(),
                reason: format!("target {} must be between 0 and 100", self.target),
            });
        }
        self.timeframe().map_err(|e| RuleError::InvalidSlo {
            slo: self.id.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Rules and the SLOs they reference, as authored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub slos: Vec<Slo>,
    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

impl RuleSet {
    /// Load a rule set from a JSON file
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let raw = std::fs::read_to_string(path).map_err(|e| RuleError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| RuleError::Parse(e.to_string()))
    }

    /// Validate every rule and SLO reference
    pub fn compile(&self) -> Result<CompiledRuleSet, RuleError> {
        let mut slos = HashMap::new();
        for slo in &self.slos {
            slo.validate()?;
            if slos.insert(slo.id.clone(), slo.clone()).is_some() {
                return Err(RuleError::Duplicate(slo.id.clone()));
            }
        }

        let mut names = BTreeSet::new();
        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            if !names.insert(rule.name.clone()) {
                return Err(RuleError::Duplicate(rule.name.clone()));
            }
            let compiled = rule.compile()?;
            if let Some(slo_id) = compiled.slo_id() {
                if !slos.contains_key(slo_id) {
                    return Err(RuleError::UnknownSlo {
                        rule: rule.name.clone(),
                        slo: slo_id.to_string(),
                    });
                }
            }
            rules.push(compiled);
        }

        Ok(CompiledRuleSet { slos, rules })
    }
}

/// Validated rule set ready for evaluation
#[derive(Debug, Clone, Default)]
pub struct CompiledRuleSet {
    pub slos: HashMap<String, Slo>,
    pub rules: Vec<CompiledRule>,
}

/// Rule validation errors
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule {rule}: {source}")]
    Query {
        rule: String,
        #[source]
        source: QueryError,
    },

    #[error("Rule {0}: query shape does not match rule kind")]
    KindMismatch(String),

    #[error("Rule {rule}: query threshold {query} differs from critical threshold {critical}")]
    ThresholdMismatch { rule: String, query: f64, critical: f64 },

    #[error("Rule {rule}: warning {warning} is more severe than critical {critical} for '{comparator}'")]
    NonMonotonicThresholds {
        rule: String,
        comparator: Comparator,
        warning: f64,
        critical: f64,
    },

    #[error("Rule {rule} references unknown SLO {slo}")]
    UnknownSlo { rule: String, slo: String },

    #[error("SLO {slo}: {reason}")]
    InvalidSlo { slo: String, reason: String },

    #[error("Duplicate rule or SLO: {0}")]
    Duplicate(String),

    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid rule file: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn slo() -> Slo {
        Slo {
            id: "avail".to_string(),
            name: "Availability".to_string(),
            target: 99.0,
            timeframe: "7d".to_string(),
            good_metric: "good".to_string(),
            total_metric: "total".to_string(),
            scope: vec![],
        }
    }

    #[test]
    fn test_compile_threshold_rule() {
        let rule = AlertRule::new(
            "latency",
            RuleKind::Threshold,
            "avg(last_5m):avg:latency_ms{*} > 3000",
            3000.0,
        )
        .with_warning(2000.0);
        let compiled = rule.compile().unwrap();
        assert_eq!(compiled.comparator(), Comparator::GreaterThan);
        assert_eq!(compiled.slo_id(), None);
    }

    #[test]
    fn test_non_monotonic_thresholds_rejected() {
        let rule = AlertRule::new(
            "latency",
            RuleKind::Threshold,
            "avg(last_5m):avg:latency_ms{*} > 3000",
            3000.0,
        )
        .with_warning(4000.0);
        assert!(matches!(
            rule.compile(),
            Err(RuleError::NonMonotonicThresholds { .. })
        ));

        // Lower-bound rules warn above critical
        let rule = AlertRule::new(
            "traffic",
            RuleKind::Threshold,
            "sum(last_5m):sum:requests{*}.as_count() < 1",
            1.0,
        )
        .with_warning(5.0);
        assert!(rule.compile().is_ok());
    }

    #[test]
    fn test_threshold_and_kind_mismatch() {
        let rule = AlertRule::new("r", RuleKind::Threshold, "sum(last_5m):sum:m{*} > 5", 1.0);
        assert!(matches!(rule.compile(), Err(RuleError::ThresholdMismatch { .. })));

        let rule = AlertRule::new("r", RuleKind::SloBurnRate, "sum(last_5m):sum:m{*} > 1", 1.0);
        assert!(matches!(rule.compile(), Err(RuleError::KindMismatch(_))));
    }

    #[test]
    fn test_rule_set_rejects_unknown_slo() {
        let set = RuleSet {
            slos: vec![],
            rules: vec![AlertRule::new(
                "burn",
                RuleKind::SloBurnRate,
                r#"burn_rate("avail").over("7d").long_window("1h").short_window("5m") > 14.4"#,
                14.4,
            )],
        };
        assert!(matches!(set.compile(), Err(RuleError::UnknownSlo { .. })));

        let set = RuleSet {
            slos: vec![slo()],
            ..set
        };
        let compiled = set.compile().unwrap();
        assert_eq!(compiled.rules.len(), 1);
        assert!(compiled.slos.contains_key("avail"));
    }

    #[test]
    fn test_invalid_slo_target() {
        let mut bad = slo();
        bad.target = 100.0;
        let set = RuleSet {
            slos: vec![bad],
            rules: vec![],
        };
        assert!(matches!(set.compile(), Err(RuleError::InvalidSlo { .. })));
    }

    #[test]
    fn test_monitor_payload() {
        let rule = AlertRule::new(
            "LLM_Error_Detected",
            RuleKind::Threshold,
            "sum(last_5m):sum:errors{*}.as_count() >= 1",
            1.0,
        )
        .with_message("{{#is_alert}}errors{{/is_alert}}")
        .with_tag("team:llm")
        .with_missing_data(MissingDataPolicy::ShowNoData);

        let payload = rule.to_monitor_payload();
        assert_eq!(payload["type"], "query alert");
        assert_eq!(payload["options"]["thresholds"]["critical"], 1.0);
        assert!(payload["options"]["thresholds"].get("warning").is_none());
        assert_eq!(payload["options"]["on_missing_data"], "show_no_data");
        assert_eq!(payload["tags"][0], "team:llm");
    }

    #[test]
    fn test_load_rule_file() {
        let json = serde_json::json!({
            "slos": [{
                "id": "avail",
                "name": "Availability",
                "target": 99.5,
                "good_metric": "good",
                "total_metric": "total"
            }],
            "rules": [{
                "name": "budget",
                "kind": "slo-error-budget",
                "query": "error_budget(\"avail\").over(\"7d\") >= 100",
                "thresholds": { "critical": 100, "warning": 80 },
                "message": "budget gone",
                "tags": ["slo"],
                "on_missing_data": "resolve"
            }]
        });

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();

        let set = RuleSet::load(file.path()).unwrap();
        assert_eq!(set.slos[0].timeframe, "7d");
        assert_eq!(set.rules[0].on_missing_data, MissingDataPolicy::Resolve);
        assert_eq!(set.rules[0].thresholds.warning, Some(80.0));
        assert!(set.compile().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuleSet::load(Path::new("/nonexistent/rules.json")).unwrap_err();
        assert!(matches!(err, RuleError::Io { .. }));
    }
}
