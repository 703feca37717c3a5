//! Common types for metric definitions.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Timer,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Timer => "timer",
        }
    }
}

/// Name, kind and meaning of one emitted series.
///
/// Crates declare the series they emit as consts in a `metrics_defs`
/// module, so the full catalog stays greppable in one place.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}
