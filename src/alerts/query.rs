//! Parsing of the Datadog monitor query subset used by the rule set
//!
//! Supported shapes:
//!
//! ```text
//! sum(last_5m):sum:dd_gemini.requests_total{service:app}.as_count() < 1
//! burn_rate("slo-id").over("7d").long_window("1h").short_window("5m") > 14.4
//! error_budget("slo-id").over("7d") >= 100
//! ```

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::telemetry::Aggregation;

/// Comparison between an evaluated value and a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl Comparator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(Comparator::GreaterThan),
            ">=" => Some(Comparator::GreaterOrEqual),
            "<" => Some(Comparator::LessThan),
            "<=" => Some(Comparator::LessOrEqual),
            _ => None,
        }
    }

    /// True if `value` is on the breaching side of `threshold`
    pub fn breached(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterThan => value > threshold,
            Comparator::GreaterOrEqual => value >= threshold,
            Comparator::LessThan => value < threshold,
            Comparator::LessOrEqual => value <= threshold,
        }
    }

    /// True if larger values are more severe
    pub fn is_upper_bound(&self) -> bool {
        matches!(self, Comparator::GreaterThan | Comparator::GreaterOrEqual)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::GreaterThan => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::LessThan => "<",
            Comparator::LessOrEqual => "<=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated metric compared against a threshold
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub time_aggregation: Aggregation,
    pub space_aggregation: Aggregation,
    pub window: Duration,
    pub metric: String,
    /// Tags every point must carry; empty for `{*}`
    pub scope: Vec<String>,
    pub as_count: bool,
}

/// Multi-window SLO burn rate
#[derive(Debug, Clone, PartialEq)]
pub struct BurnRateQuery {
    pub slo_id: String,
    pub timeframe: Duration,
    pub long_window: Duration,
    pub short_window: Duration,
}

/// Share of the SLO error budget consumed
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBudgetQuery {
    pub slo_id: String,
    pub timeframe: Duration,
}

/// What a rule evaluates
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Metric(MetricQuery),
    BurnRate(BurnRateQuery),
    ErrorBudget(ErrorBudgetQuery),
}

/// A parsed monitor query
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub expr: QueryExpr,
    pub comparator: Comparator,
    pub threshold: f64,
}

fn metric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<time>\w+)\(last_(?P<window>\d+[smhdw])\):(?P<space>\w+):(?P<metric>[\w.]+)\{(?P<scope>[^}]*)\}(?P<count>\.as_count\(\))?$",
        )
        .expect("metric query regex")
    })
}

fn burn_rate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^burn_rate\("(?P<slo>[^"]+)"\)\.over\("(?P<over>[^"]+)"\)\.long_window\("(?P<long>[^"]+)"\)\.short_window\("(?P<short>[^"]+)"\)$"#,
        )
        .expect("burn rate regex")
    })
}

fn error_budget_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^error_budget\("(?P<slo>[^"]+)"\)\.over\("(?P<over>[^"]+)"\)$"#)
            .expect("error budget regex")
    })
}

fn condition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<expr>.+?)\s*(?P<op>>=|<=|>|<)\s*(?P<threshold>-?\d+(?:\.\d+)?)$")
            .expect("condition regex")
    })
}

/// Parse a window such as `30s`, `5m`, `1h`, `7d` or `1w`
pub fn parse_window(s: &str) -> Result<Duration, QueryError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| QueryError::InvalidWindow(s.to_string()))?;
    let (amount, unit) = s.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| QueryError::InvalidWindow(s.to_string()))?;

    let unit_secs: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return Err(QueryError::InvalidWindow(s.to_string())),
    };

    match amount.checked_mul(unit_secs) {
        Some(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(QueryError::InvalidWindow(s.to_string())),
    }
}

fn parse_aggregation(s: &str) -> Result<Aggregation, QueryError> {
    Aggregation::parse(s).ok_or_else(|| QueryError::UnknownAggregation(s.to_string()))
}

/// Parse a full monitor query including its trailing condition
pub fn parse_query(query: &str) -> Result<ParsedQuery, QueryError> {
    let query = query.trim();
    let caps = condition_re()
        .captures(query)
        .ok_or_else(|| QueryError::MissingCondition(query.to_string()))?;

    let comparator = Comparator::parse(&caps["op"])
        .ok_or_else(|| QueryError::MissingCondition(query.to_string()))?;
    let threshold: f64 = caps["threshold"]
        .parse()
        .map_err(|_| QueryError::MissingCondition(query.to_string()))?;

    let expr = parse_expr(caps["expr"].trim())?;

    Ok(ParsedQuery {
        expr,
        comparator,
        threshold,
    })
}

fn parse_expr(expr: &str) -> Result<QueryExpr, QueryError> {
    if let Some(caps) = metric_re().captures(expr) {
        let scope = caps["scope"]
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != "*")
            .map(String::from)
            .collect();

        return Ok(QueryExpr::Metric(MetricQuery {
            time_aggregation: parse_aggregation(&caps["time"])?,
            space_aggregation: parse_aggregation(&caps["space"])?,
            window: parse_window(&caps["window"])?,
            metric: caps["metric"].to_string(),
            scope,
            as_count: caps.name("count").is_some(),
        }));
    }

    if let Some(caps) = burn_rate_re().captures(expr) {
        let long_window = parse_window(&caps["long"])?;
        let short_window = parse_window(&caps["short"])?;
        if short_window >= long_window {
            return Err(QueryError::InvalidWindow(format!(
                "short window {} must be shorter than long window {}",
                &caps["short"], &caps["long"]
            )));
        }
        return Ok(QueryExpr::BurnRate(BurnRateQuery {
            slo_id: caps["slo"].to_string(),
            timeframe: parse_window(&caps["over"])?,
            long_window,
            short_window,
        }));
    }

    if let Some(caps) = error_budget_re().captures(expr) {
        return Ok(QueryExpr::ErrorBudget(ErrorBudgetQuery {
            slo_id: caps["slo"].to_string(),
            timeframe: parse_window(&caps["over"])?,
        }));
    }

    Err(QueryError::Unsupported(expr.to_string()))
}

/// Query parse errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueryError {
    #[error("Query has no trailing comparison: {0}")]
    MissingCondition(String),

    #[error("Unsupported query expression: {0}")]
    Unsupported(String),

    #[error("Unknown aggregation: {0}")]
    UnknownAggregation(String),

    #[error("Invalid window: {0}")]
    InvalidWindow(String),
}
