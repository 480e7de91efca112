//! Built-in monitor catalog for the chat service

use super::rule::{AlertRule, MissingDataPolicy, RuleError, RuleKind, RuleSet, Slo};
use crate::config::AlertSettings;
use crate::telemetry::MetricNames;

pub const AVAILABILITY_SLO: &str = "chat-availability";

/// Rules shipped with the service, scoped to `service`
pub fn builtin_rule_set(names: &MetricNames, service: &str) -> RuleSet {
    let scope = format!("service:{}", service);
    let service_tag = scope.clone();

    let slo = Slo {
        id: AVAILABILITY_SLO.to_string(),
        name: "Chat availability".to_string(),
        target: 99.0,
        timeframe: "7d".to_string(),
        good_metric: names.chat_success_total.clone(),
        total_metric: names.requests_total.clone(),
        scope: vec![scope.clone()],
    };

    let rules = vec![
        AlertRule::new(
            "LLM_Traffic_Stopped",
            RuleKind::Threshold,
            format!(
                "sum(last_5m):sum:{}{{{}}}.as_count() < 1",
                names.requests_total, scope
            ),
            1.0,
        )
        .with_message(
            "{{#is_alert}}No chat requests received in the last 5 minutes.{{/is_alert}}\
             {{#is_recovery}}Chat traffic resumed.{{/is_recovery}}",
        ),
        AlertRule::new(
            "LLM_Error_Detected",
            RuleKind::Threshold,
            format!(
                "sum(last_5m):sum:{}{{{}}}.as_count() >= 1",
                names.chat_error_total, scope
            ),
            1.0,
        )
        .with_message(
            "{{#is_alert}}{{value}} error(s) on the chat endpoint in the last 5 minutes.{{/is_alert}}\
             {{#is_recovery}}No chat errors in the last 5 minutes.{{/is_recovery}}",
        ),
        AlertRule::new(
            "LLM_High_Latency",
            RuleKind::Threshold,
            format!("avg(last_5m):avg:{}{{{}}} > 3000", names.latency_ms, scope),
            3000.0,
        )
        .with_warning(2000.0)
        .with_message(
            "{{#is_alert}}Average chat latency is {{value}} ms (critical {{threshold}} ms).{{/is_alert}}\
             {{#is_warning}}Average chat latency is {{value}} ms (warning {{warn_threshold}} ms).{{/is_warning}}\
             {{#is_recovery}}Chat latency back to {{value}} ms.{{/is_recovery}}",
        ),
        AlertRule::new(
            "LLM_SLO_Burn_Rate",
            RuleKind::SloBurnRate,
            format!(
                r#"burn_rate("{}").over("7d").long_window("1h").short_window("5m") > 14.4"#,
                AVAILABILITY_SLO
            ),
            14.4,
        )
        .with_warning(6.0)
        .with_message(
            "{{#is_alert}}Availability error budget burning at {{value}}x the sustainable rate.{{/is_alert}}\
             {{#is_warning}}Availability error budget burning at {{value}}x.{{/is_warning}}\
             {{#is_recovery}}Burn rate back to {{value}}x.{{/is_recovery}}",
        ),
        AlertRule::new(
            "LLM_SLO_Error_Budget",
            RuleKind::SloErrorBudget,
            format!(r#"error_budget("{}").over("7d") >= 100"#, AVAILABILITY_SLO),
            100.0,
        )
        .with_warning(80.0)
        .with_message(
            "{{#is_alert}}Availability error budget exhausted ({{value}}% spent).{{/is_alert}}\
             {{#is_warning}}{{value}}% of the availability error budget spent.{{/is_warning}}\
             {{#is_recovery}}Error budget spend down to {{value}}%.{{/is_recovery}}",
        ),
    ];

    RuleSet {
        slos: vec![slo],
        rules: rules
            .into_iter()
            .map(|rule| {
                rule.with_tag(service_tag.clone())
                    .with_tag("team:llm")
                    .with_missing_data(MissingDataPolicy::Default)
            })
            .collect(),
    }
}

/// Rule file from settings if one is configured, otherwise the catalog
pub fn load_rule_set(
    settings: &AlertSettings,
    names: &MetricNames,
    service: &str,
) -> Result<RuleSet, RuleError> {
    match &settings.rules_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading alert rules from file");
            RuleSet::load(path)
        }
        None => Ok(builtin_rule_set(names, service)),
    }
}
