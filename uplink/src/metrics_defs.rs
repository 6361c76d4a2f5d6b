use shared::metrics_defs::{MetricDef, MetricType};

pub const SUBMISSIONS: MetricDef = MetricDef {
    name: "uplink.submissions",
    metric_type: MetricType::Counter,
    description: "Completed submissions. Tagged with outcome.",
};

pub const STALE_RECORDS_FAILED: MetricDef = MetricDef {
    name: "uplink.stale_records_failed",
    metric_type: MetricType::Counter,
    description: "Processing records failed by the staleness sweep.",
};

pub const ALL_METRICS: &[MetricDef] = &[SUBMISSIONS, STALE_RECORDS_FAILED];
