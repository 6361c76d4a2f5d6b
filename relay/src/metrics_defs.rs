use shared::metrics_defs::{MetricDef, MetricType};

pub const RELAY_REQUESTS: MetricDef = MetricDef {
    name: "relay.requests",
    metric_type: MetricType::Counter,
    description: "Relay requests handled. Tagged with outcome.",
};

pub const ALL_METRICS: &[MetricDef] = &[RELAY_REQUESTS];
