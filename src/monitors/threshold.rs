//! Threshold evaluator
//!
//! Aggregates the per-process metrics of a resource target, classifies the
//! result against the target's [`ThresholdConfig`] and decides whether the
//! classification escalated.
//!
//! ```text
//! value <  threshold                      → Normal
//! threshold <= value < threshold × mult   → Warning
//! value >= threshold × mult               → Critical
//! ```
//!
//! The overall classification is the worst one across CPU, RAM and disk.

use chrono::{DateTime, Utc};

use crate::config::ThresholdDefaults;
use crate::model::{AggregationPolicy, Classification, MetricSample, TargetId, ThresholdConfig};
use crate::probe::{ProcessMetrics, ResourceMetrics};

/// Aggregated view of a target's resource usage
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub pids: Vec<u32>,
    pub cpu_percent: f32,
    pub ram_mb: f64,
    pub ram_percent: Option<f32>,
    pub disk_percent: Option<f32>,
}

/// Result of one evaluator pass
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdEvaluation {
    pub sample: MetricSample,
    pub previous: Classification,
    /// Classification got worse compared to the previous pass
    pub escalated: bool,
}

pub fn aggregate(metrics: &ResourceMetrics, policy: AggregationPolicy) -> Aggregate {
    match metrics {
        ResourceMetrics::Processes(processes) => aggregate_processes(processes, policy),
        ResourceMetrics::System(system) => Aggregate {
            pids: Vec::new(),
            cpu_percent: system.cpu_percent,
            ram_mb: system.ram_used_mb,
            ram_percent: Some(system.ram_percent),
            disk_percent: system.disk_percent,
        },
    }
}

fn combine(values: impl Iterator<Item = f64>, policy: AggregationPolicy) -> f64 {
    match policy {
        AggregationPolicy::Sum => values.sum(),
        AggregationPolicy::Max => values.fold(0.0, f64::max),
    }
}

fn aggregate_processes(processes: &[ProcessMetrics], policy: AggregationPolicy) -> Aggregate {
    let cpu_percent = combine(processes.iter().map(|p| p.cpu_percent as f64), policy) as f32;
    let ram_percent = combine(processes.iter().map(|p| p.ram_percent as f64), policy) as f32;
    let ram_mb = combine(processes.iter().map(|p| p.ram_mb), policy);

    Aggregate {
        pids: processes.iter().map(|p| p.pid).collect(),
        cpu_percent,
        ram_mb,
        ram_percent: (!processes.is_empty()).then_some(ram_percent),
        disk_percent: None,
    }
}

/// Classify a single value against an optional threshold
pub fn classify_value(value: f32, threshold: Option<f32>, multiplier: f32) -> Classification {
    let Some(threshold) = threshold else {
        return Classification::Normal;
    };

    if value >= threshold * multiplier {
        Classification::Critical
    } else if value >= threshold {
        Classification::Warning
    } else {
        Classification::Normal
    }
}

pub fn classify(aggregate: &Aggregate, config: &ThresholdConfig, multiplier: f32) -> Classification {
    let cpu = classify_value(aggregate.cpu_percent, config.cpu_threshold, multiplier);
    let ram = aggregate
        .ram_percent
        .map_or(Classification::Normal, |ram| {
            classify_value(ram, config.ram_threshold, multiplier)
        });
    let disk = aggregate
        .disk_percent
        .map_or(Classification::Normal, |disk| {
            classify_value(disk, config.disk_threshold, multiplier)
        });

    cpu.max(ram).max(disk)
}

/// Run one evaluator pass
pub fn evaluate(
    target_id: TargetId,
    config: &ThresholdConfig,
    defaults: &ThresholdDefaults,
    metrics: &ResourceMetrics,
    previous: Classification,
    at: DateTime<Utc>,
) -> ThresholdEvaluation {
    let policy = config.aggregation.unwrap_or(defaults.aggregation);
    let multiplier = config
        .critical_multiplier
        .unwrap_or(defaults.critical_multiplier);

    let aggregate = aggregate(metrics, policy);
    let classification = classify(&aggregate, config, multiplier);

    ThresholdEvaluation {
        sample: MetricSample {
            target_id,
            pids: aggregate.pids,
            cpu_percent: aggregate.cpu_percent,
            ram_mb: aggregate.ram_mb,
            ram_percent: aggregate.ram_percent,
            disk_percent: aggregate.disk_percent,
            classification,
            timestamp: at,
        },
        previous,
        escalated: classification > previous,
    }
}
