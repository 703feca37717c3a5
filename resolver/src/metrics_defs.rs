use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "resolver.requests",
    metric_type: MetricType::Counter,
    description: "Resolutions performed. Tagged with project, result, status.",
};

pub const RESOLVE_DURATION: MetricDef = MetricDef {
    name: "resolver.resolve.duration",
    metric_type: MetricType::Timer,
    description: "End-to-end resolution time. Tagged with project.",
};

pub const LOOKUP_DURATION: MetricDef = MetricDef {
    name: "resolver.lookup.duration",
    metric_type: MetricType::Timer,
    description: "Tier-walk time until an answer. Tagged with result.",
};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "resolver.cache.hit",
    metric_type: MetricType::Counter,
    description: "Cache hits. Tagged with tier (local, redis, database).",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "resolver.cache.miss",
    metric_type: MetricType::Counter,
    description: "Cache misses. Tagged with tier (local, redis, database).",
};

pub const SYNC_CYCLE_DURATION: MetricDef = MetricDef {
    name: "resolver.sync.cycle.duration",
    metric_type: MetricType::Timer,
    description: "Wall time of one shared-tier refresh cycle.",
};

pub const SYNC_KEYS_PUSHED: MetricDef = MetricDef {
    name: "resolver.sync.keys.pushed",
    metric_type: MetricType::Counter,
    description: "Keys written to the shared tier by refresh cycles. Tagged with project.",
};

pub const SYNC_PROJECT_FAILURES: MetricDef = MetricDef {
    name: "resolver.sync.project.failures",
    metric_type: MetricType::Counter,
    description: "Refresh failures, one per project per cycle. Tagged with project.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    RESOLVE_DURATION,
    LOOKUP_DURATION,
    CACHE_HIT,
    CACHE_MISS,
    SYNC_CYCLE_DURATION,
    SYNC_KEYS_PUSHED,
    SYNC_PROJECT_FAILURES,
];
