//! Message templates with Datadog-style conditional sections
//!
//! `{{#is_alert}}...{{/is_alert}}` renders only while alerting,
//! `{{^is_alert}}...{{/is_alert}}` only while not. `{{value}}` and friends
//! substitute; unknown variables render empty. Anything else, including
//! `@notification-handles`, passes through untouched.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::rule::AlertRule;
use super::state::{AlertState, NotificationKind, Transition};

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([#^/]?)\s*([\w.]+)\s*\}\}").expect("template tag regex"))
}

/// Variables and section flags available to a template
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<String, String>,
    flags: HashMap<String, bool>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    pub fn with_flag(mut self, name: &str, value: bool) -> Self {
        self.flags.insert(name.to_string(), value);
        self
    }

    /// Context for a rule's state change
    pub fn for_transition(rule: &AlertRule, transition: &Transition, value: Option<f64>) -> Self {
        let recovery = transition.notify == Some(NotificationKind::Recovery);

        Self::new()
            .with_var("name", rule.name.clone())
            .with_var("value", value.map(format_number).unwrap_or_default())
            .with_var("threshold", format_number(rule.thresholds.critical))
            .with_var(
                "warn_threshold",
                rule.thresholds.warning.map(format_number).unwrap_or_default(),
            )
            .with_var("state", transition.to.as_str())
            .with_var("previous_state", transition.from.as_str())
            .with_flag("is_alert", transition.to == AlertState::Alert)
            .with_flag("is_warning", transition.to == AlertState::Warn)
            .with_flag("is_no_data", transition.to == AlertState::NoData)
            .with_flag("is_recovery", recovery)
            .with_flag("is_alert_recovery", transition.is_alert_recovery())
            .with_flag("is_warning_recovery", transition.is_warning_recovery())
    }

    fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    fn var(&self, name: &str) -> &str {
        self.vars.get(name).map(String::as_str).unwrap_or("")
    }
}

/// Two decimal places, without trailing zeros
pub fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    format!("{}", rounded)
}

/// Render a template against a context
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len());
    // (section name, renders)
    let mut sections: Vec<(String, bool)> = Vec::new();
    let mut last = 0;

    for caps in tag_re().captures_iter(template) {
        let Some(tag) = caps.get(0) else { continue };
        let active = sections.iter().all(|(_, on)| *on);
        if active {
            out.push_str(&template[last..tag.start()]);
        }
        last = tag.end();

        let name = &caps[2];
        match &caps[1] {
            "#" => sections.push((name.to_string(), ctx.flag(name))),
            "^" => sections.push((name.to_string(), !ctx.flag(name))),
            "/" => {
                // Stray closers are dropped
                if let Some(pos) = sections.iter().rposition(|(open, _)| open == name) {
                    sections.truncate(pos);
                }
            }
            _ => {
                if active {
                    out.push_str(ctx.var(name));
                }
            }
        }
    }

    if sections.iter().all(|(_, on)| *on) {
        out.push_str(&template[last..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::rule::RuleKind;

    const TEMPLATE: &str = "{{#is_alert}}ALERT {{name}} at {{value}} (>= {{threshold}}){{/is_alert}}\
{{#is_warning}}WARN at {{value}}{{/is_warning}}\
{{#is_recovery}}Recovered{{/is_recovery}} @ops-team";

    fn rule() -> AlertRule {
        AlertRule::new(
            "LLM_Error_Detected",
            RuleKind::Threshold,
            "sum(last_5m):sum:errors{*}.as_count() >= 5",
            5.0,
        )
        .with_warning(2.0)
        .with_message(TEMPLATE)
    }

    fn transition(
        from: AlertState,
        to: AlertState,
        notify: Option<NotificationKind>,
    ) -> Transition {
        Transition { from, to, notify }
    }

    #[test]
    fn test_alert_section() {
        let t = transition(AlertState::Ok, AlertState::Alert, Some(NotificationKind::Alert));
        let ctx = TemplateContext::for_transition(&rule(), &t, Some(7.0));
        assert_eq!(render(TEMPLATE, &ctx), "ALERT LLM_Error_Detected at 7 (>= 5) @ops-team");
    }

    #[test]
    fn test_warning_and_recovery_sections() {
        let t = transition(AlertState::Ok, AlertState::Warn, Some(NotificationKind::Warn));
        let ctx = TemplateContext::for_transition(&rule(), &t, Some(2.5));
        assert_eq!(render(TEMPLATE, &ctx), "WARN at 2.5 @ops-team");

        let t = transition(AlertState::Alert, AlertState::Ok, Some(NotificationKind::Recovery));
        let ctx = TemplateContext::for_transition(&rule(), &t, Some(0.0));
        assert_eq!(render(TEMPLATE, &ctx), "Recovered @ops-team");
    }

    #[test]
    fn test_inverted_and_nested_sections() {
        let ctx = TemplateContext::new()
            .with_flag("is_alert", false)
            .with_flag("is_alert_recovery", true)
            .with_var("value", "3");
        let template = "{{^is_alert}}not alerting{{#is_alert_recovery}} (was {{value}}){{/is_alert_recovery}}{{/is_alert}}.";
        assert_eq!(render(template, &ctx), "not alerting (was 3).");

        let ctx = ctx.with_flag("is_alert", true);
        assert_eq!(render(template, &ctx), ".");
    }

    #[test]
    fn test_unknown_variables_and_stray_closers() {
        let ctx = TemplateContext::new();
        assert_eq!(render("host={{host.name}}{{/is_alert}}!", &ctx), "host=!");
        assert_eq!(render("no tags here", &ctx), "no tags here");
    }

    #[test]
    fn test_unclosed_section_hides_tail() {
        let ctx = TemplateContext::new();
        assert_eq!(render("start {{#is_alert}}hidden", &ctx), "start ");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(14.4), "14.4");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(1234.5678), "1234.57");
    }
}
