//! Background alert checker

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time;

use super::evaluator::Evaluator;
use super::notifier::{AlertNotification, Notifier};
use super::rule::{CompiledRule, CompiledRuleSet, RuleKind, Slo, Thresholds};
use super::state::AlertState;
use super::template::{render, TemplateContext};
use crate::telemetry::MetricStore;

/// Current state of one rule
#[derive(Debug, Clone, Serialize)]
pub struct RuleStatus {
    pub name: String,
    pub kind: RuleKind,
    pub query: String,
    pub thresholds: Thresholds,
    pub tags: BTreeSet<String>,
    pub state: AlertState,
    pub last_value: Option<f64>,
    /// Unix millis
    pub last_checked: Option<i64>,
    /// Unix millis of the last state change
    pub last_transition: Option<i64>,
    pub last_error: Option<String>,
}

struct TrackedRule {
    compiled: CompiledRule,
    status: RuleStatus,
}

impl TrackedRule {
    fn new(compiled: CompiledRule) -> Self {
        let rule = &compiled.rule;
        let status = RuleStatus {
            name: rule.name.clone(),
            kind: rule.kind,
            query: rule.query.clone(),
            thresholds: rule.thresholds,
            tags: rule.tags.clone(),
            state: AlertState::Ok,
            last_value: None,
            last_checked: None,
            last_transition: None,
            last_error: None,
        };
        Self { compiled, status }
    }
}

/// Evaluates every rule against the metric store on an interval
pub struct AlertChecker {
    rules: RwLock<Vec<TrackedRule>>,
    slos: HashMap<String, Slo>,
    store: Arc<MetricStore>,
    notifier: Notifier,
    running: AtomicBool,
}

impl AlertChecker {
    pub fn new(rule_set: CompiledRuleSet, store: Arc<MetricStore>, notifier: Notifier) -> Self {
        let rules = rule_set.rules.into_iter().map(TrackedRule::new).collect();
        Self {
            rules: RwLock::new(rules),
            slos: rule_set.slos,
            store,
            notifier,
            running: AtomicBool::new(false),
        }
    }

    /// Status of every rule, in rule-set order
    pub fn statuses(&self) -> Vec<RuleStatus> {
        self.rules.read().iter().map(|r| r.status.clone()).collect()
    }

    pub fn status(&self, name: &str) -> Option<RuleStatus> {
        self.rules
            .read()
            .iter()
            .find(|r| r.status.name == name)
            .map(|r| r.status.clone())
    }

    pub fn slos(&self) -> Vec<Slo> {
        let mut slos: Vec<Slo> = self.slos.values().cloned().collect();
        slos.sort_by(|a, b| a.id.cmp(&b.id));
        slos
    }

    /// Evaluate all rules at `now_ms`, updating state, and return the
    /// notifications produced by state changes
    pub fn evaluate(&self, now_ms: i64) -> Vec<AlertNotification> {
        let evaluator = Evaluator::new(&self.store, &self.slos);
        let mut notifications = Vec::new();
        let mut rules = self.rules.write();

        for tracked in rules.iter_mut() {
            let rule = &tracked.compiled.rule;
            tracked.status.last_checked = Some(now_ms);

            let value = match evaluator.value(&tracked.compiled.parsed.expr, now_ms) {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(rule = %rule.name, error = %e, "Alert check failed");
                    tracked.status.last_error = Some(e.to_string());
                    continue;
                }
            };

            let transition = tracked.status.state.next(
                value,
                tracked.compiled.comparator(),
                &rule.thresholds,
                rule.on_missing_data,
            );

            tracked.status.last_error = None;
            tracked.status.last_value = value;
            tracked.status.state = transition.to;
            if transition.changed() {
                tracked.status.last_transition = Some(now_ms);
                tracing::debug!(
                    rule = %rule.name,
                    from = %transition.from,
                    to = %transition.to,
                    "Alert state changed"
                );
            }

            if let Some(kind) = transition.notify {
                let ctx = TemplateContext::for_transition(rule, &transition, value);
                notifications.push(AlertNotification {
                    rule: rule.name.clone(),
                    kind,
                    from: transition.from,
                    to: transition.to,
                    value,
                    message: render(&rule.message_template, &ctx),
                    tags: rule.tags.iter().cloned().collect(),
                    timestamp: now_ms,
                });
            }
        }

        notifications
    }

    /// Evaluate once and deliver any notifications
    pub async fn check_once(&self, now_ms: i64) -> Vec<AlertNotification> {
        let notifications = self.evaluate(now_ms);

        for notification in &notifications {
            if let Err(e) = self.notifier.notify(notification).await {
                tracing::error!(
                    rule = %notification.rule,
                    error = %e,
                    "Failed to send notification"
                );
            }
        }

        notifications
    }

    /// Start the background checker
    pub fn start(self: Arc<Self>, check_interval: Duration) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                rules = self.rules.read().len(),
                "Alert checker started with interval {:?}",
                check_interval
            );

            let mut ticker = time::interval(check_interval);

            while self.running.load(Ordering::SeqCst) {
                ticker.tick().await;

                let now = chrono::Utc::now().timestamp_millis();
                self.check_once(now).await;

                let pruned = self.store.prune(now);
                if pruned > 0 {
                    tracing::debug!("Pruned {} expired metric points", pruned);
                }
            }

            tracing::info!("Alert checker stopped");
        })
    }

    /// Stop the background checker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
