//! Metrics definitions for the data receiver.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "receiver.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent handling a request in seconds. Tagged with status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "receiver.requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being handled",
};

pub const BATCH_DURATION: MetricDef = MetricDef {
    name: "receiver.batch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to decode, stage and commit one batch in seconds",
};

pub const BATCH_RECORDS: MetricDef = MetricDef {
    name: "receiver.batch.records",
    metric_type: MetricType::Histogram,
    description: "Number of records in a received batch",
};

pub const ROWS_INSERTED: MetricDef = MetricDef {
    name: "receiver.rows.inserted",
    metric_type: MetricType::Counter,
    description: "Rows inserted by committed batches. Tagged with entity.",
};

pub const ROWS_UPDATED: MetricDef = MetricDef {
    name: "receiver.rows.updated",
    metric_type: MetricType::Counter,
    description: "Rows replaced by committed batches. Tagged with entity.",
};

pub const BATCHES_FAILED: MetricDef = MetricDef {
    name: "receiver.batches.failed",
    metric_type: MetricType::Counter,
    description: "Batches rejected without changing the store. Tagged with reason.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    BATCH_DURATION,
    BATCH_RECORDS,
    ROWS_INSERTED,
    ROWS_UPDATED,
    BATCHES_FAILED,
];
