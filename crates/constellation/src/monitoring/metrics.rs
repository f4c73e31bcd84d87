// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scheduled metric callbacks.

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::protocol::pack::{self, MetaMap, Value};
use crate::protocol::{Metric, MetricsType};

/// A metric callback returns the current value; errors are logged and do
/// not affect other metrics.
pub type MetricCallback = Box<dyn FnMut() -> Result<Value> + Send>;

struct ScheduledMetric {
    name: String,
    unit: String,
    handling: MetricsType,
    interval: Duration,
    callback: MetricCallback,
    last_run: Option<Instant>,
}

/// Registry of metrics polled by the scheduling worker.
#[derive(Default)]
pub struct MetricsRegistry {
    metrics: Vec<ScheduledMetric>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a scheduled metric.
    pub fn schedule(
        &mut self,
        name: &str,
        unit: &str,
        handling: MetricsType,
        interval: Duration,
        callback: MetricCallback,
    ) {
        self.metrics.retain(|m| m.name != name);
        self.metrics.push(ScheduledMetric {
            name: name.to_string(),
            unit: unit.to_string(),
            handling,
            interval,
            callback,
            last_run: None,
        });
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Invoke every callback whose interval has elapsed and collect the
    /// samples, stamped with the given sender name.
    pub fn collect_due(&mut self, sender: &str) -> Vec<Metric> {
        let now = Instant::now();
        let mut samples = Vec::new();
        for metric in &mut self.metrics {
            let due = metric
                .last_run
                .map(|last| now.duration_since(last) >= metric.interval)
                .unwrap_or(true);
            if !due {
                continue;
            }
            metric.last_run = Some(now);
            match (metric.callback)() {
                Ok(value) => samples.push(Metric {
                    name: metric.name.clone(),
                    unit: metric.unit.clone(),
                    handling: metric.handling,
                    value,
                    sender: sender.to_string(),
                    timestamp_ns: pack::now_nanos(),
                    meta: MetaMap::new(),
                }),
                Err(e) => {
                    log::error!("[CMDP] could not retrieve metric {}: {}", metric.name, e);
                }
            }
        }
        samples
    }
}
