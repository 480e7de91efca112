//! Alert state machine
//!
//! States move between OK, WARN and ALERT as evaluated values cross the
//! rule's thresholds. NO_DATA is entered only through the missing-data
//! policy. A notification is produced on every state change that the
//! recipient needs to hear about; repeated evaluations in the same state
//! produce nothing.

use serde::{Deserialize, Serialize};

use super::query::Comparator;
use super::rule::{MissingDataPolicy, Thresholds};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    #[default]
    Ok,
    Warn,
    Alert,
    NoData,
}

impl AlertState {
    /// Classify a value against critical and optional warning thresholds
    pub fn classify(value: f64, comparator: Comparator, thresholds: &Thresholds) -> Self {
        if comparator.breached(value, thresholds.critical) {
            AlertState::Alert
        } else if thresholds
            .warning
            .map_or(false, |warning| comparator.breached(value, warning))
        {
            AlertState::Warn
        } else {
            AlertState::Ok
        }
    }

    /// Apply an evaluation outcome under a missing-data policy
    pub fn next(
        self,
        outcome: Option<f64>,
        comparator: Comparator,
        thresholds: &Thresholds,
        policy: MissingDataPolicy,
    ) -> Transition {
        let to = match outcome {
            Some(value) => AlertState::classify(value, comparator, thresholds),
            None => match policy {
                MissingDataPolicy::Default => self,
                MissingDataPolicy::ShowNoData | MissingDataPolicy::ShowAndNotifyNoData => {
                    AlertState::NoData
                }
                MissingDataPolicy::Resolve => AlertState::Ok,
            },
        };

        let notify = if to == self {
            None
        } else {
            match to {
                AlertState::Alert => Some(NotificationKind::Alert),
                AlertState::Warn => Some(NotificationKind::Warn),
                AlertState::Ok if self.is_triggered() => Some(NotificationKind::Recovery),
                AlertState::Ok => None,
                AlertState::NoData if policy == MissingDataPolicy::ShowAndNotifyNoData => {
                    Some(NotificationKind::NoData)
                }
                AlertState::NoData => None,
            }
        };

        Transition {
            from: self,
            to,
            notify,
        }
    }

    /// WARN or ALERT
    pub fn is_triggered(&self) -> bool {
        matches!(self, AlertState::Warn | AlertState::Alert)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Ok => "OK",
            AlertState::Warn => "WARN",
            AlertState::Alert => "ALERT",
            AlertState::NoData => "NO_DATA",
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a notification is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    Warn,
    Recovery,
    NoData,
}

/// Result of one evaluation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: AlertState,
    pub to: AlertState,
    pub notify: Option<NotificationKind>,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn is_alert_recovery(&self) -> bool {
        self.from == AlertState::Alert && matches!(self.to, AlertState::Warn | AlertState::Ok)
    }

    pub fn is_warning_recovery(&self) -> bool {
        self.from == AlertState::Warn && self.to == AlertState::Ok
    }
}
