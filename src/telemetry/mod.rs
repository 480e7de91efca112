//! Service telemetry: metric emission, local metric storage and the
//! Datadog intake client.

pub mod datadog;
pub mod emitter;
pub mod store;

pub use datadog::{DatadogClient, DatadogError, SeriesPoint};
pub use emitter::{MetricEmitter, MetricNames, TotalsSnapshot};
pub use store::{Aggregation, MetricStore, SeriesKind};
