//! Metrics definitions for the row store.

use shared::metrics_defs::{MetricDef, MetricType};

pub const COMMIT_DURATION: MetricDef = MetricDef {
    name: "store.commit.duration",
    metric_type: MetricType::Histogram,
    description: "Time to validate and apply a transaction in seconds. Tagged with status.",
};

pub const COMMIT_WRITES: MetricDef = MetricDef {
    name: "store.commit.writes",
    metric_type: MetricType::Histogram,
    description: "Number of staged writes applied by a successful commit",
};

pub const SNAPSHOT_WRITE_DURATION: MetricDef = MetricDef {
    name: "store.snapshot.write.duration",
    metric_type: MetricType::Histogram,
    description: "Time to encode and persist a snapshot in seconds",
};

pub const SNAPSHOT_BYTES: MetricDef = MetricDef {
    name: "store.snapshot.bytes",
    metric_type: MetricType::Gauge,
    description: "Uncompressed size of the last persisted snapshot",
};

pub const ALL_METRICS: &[MetricDef] = &[
    COMMIT_DURATION,
    COMMIT_WRITES,
    SNAPSHOT_WRITE_DURATION,
    SNAPSHOT_BYTES,
];
