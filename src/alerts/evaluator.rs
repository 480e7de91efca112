//! Computes the value a rule's query refers to from the local metric store

use std::collections::HashMap;
use std::time::Duration;

use super::query::{BurnRateQuery, ErrorBudgetQuery, MetricQuery, QueryExpr};
use super::rule::Slo;
use crate::telemetry::{Aggregation, MetricStore};

/// Reads windows out of a [`MetricStore`]
pub struct Evaluator<'a> {
    store: &'a MetricStore,
    slos: &'a HashMap<String, Slo>,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a MetricStore, slos: &'a HashMap<String, Slo>) -> Self {
        Self { store, slos }
    }

    /// Value of the expression at `now_ms`, or `None` when there is no data
    pub fn value(&self, expr: &QueryExpr, now_ms: i64) -> Result<Option<f64>, CheckError> {
        match expr {
            QueryExpr::Metric(query) => Ok(self.metric(query, now_ms)),
            QueryExpr::BurnRate(query) => self.burn_rate(query, now_ms),
            QueryExpr::ErrorBudget(query) => self.error_budget(query, now_ms),
        }
    }

    fn metric(&self, query: &MetricQuery, now_ms: i64) -> Option<f64> {
        let from = now_ms - window_ms(query.window);
        self.store
            .aggregate(&query.metric, &query.scope, query.time_aggregation, from, now_ms)
    }

    fn slo(&self, id: &str) -> Result<&Slo, CheckError> {
        self.slos
            .get(id)
            .ok_or_else(|| CheckError::UnknownSlo(id.to_string()))
    }

    /// Bad / total over the window; `None` when no requests were counted
    pub fn error_ratio(&self, slo: &Slo, window: Duration, now_ms: i64) -> Option<f64> {
        let from = now_ms - window_ms(window);
        let total = self
            .store
            .aggregate(&slo.total_metric, &slo.scope, Aggregation::Sum, from, now_ms)?;
        if total <= 0.0 {
            return None;
        }
        let good = self
            .store
            .aggregate(&slo.good_metric, &slo.scope, Aggregation::Sum, from, now_ms)
            .unwrap_or(0.0);

        Some(((total - good) / total).clamp(0.0, 1.0))
    }

    /// Burn rate over a single window: error ratio over the budgeted ratio
    pub fn window_burn_rate(&self, slo: &Slo, window: Duration, now_ms: i64) -> Option<f64> {
        let ratio = self.error_ratio(slo, window, now_ms)?;
        Some(ratio / slo.error_budget_fraction())
    }

    /// Both windows have to burn fast for the rule to fire, so the
    /// evaluated value is the smaller of the two
    fn burn_rate(&self, query: &BurnRateQuery, now_ms: i64) -> Result<Option<f64>, CheckError> {
        let slo = self.slo(&query.slo_id)?;
        let long = self.window_burn_rate(slo, query.long_window, now_ms);
        let short = self.window_burn_rate(slo, query.short_window, now_ms);

        Ok(match (long, short) {
            (Some(long), Some(short)) => Some(long.min(short)),
            _ => None,
        })
    }

    /// Percentage of the timeframe's error budget already spent
    fn error_budget(
        &self,
        query: &ErrorBudgetQuery,
        now_ms: i64,
    ) -> Result<Option<f64>, CheckError> {
        let slo = self.slo(&query.slo_id)?;
        Ok(self
            .error_ratio(slo, query.timeframe, now_ms)
            .map(|ratio| ratio / slo.error_budget_fraction() * 100.0))
    }
}

fn window_ms(window: Duration) -> i64 {
    window.as_millis().min(i64::MAX as u128) as i64
}

/// Alert check errors
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Unknown SLO: {0}")]
    UnknownSlo(String),
}
