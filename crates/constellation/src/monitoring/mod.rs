// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CMDP monitoring pipeline.
//!
//! The sender side owns one publish socket serving two paths: log records
//! (teed from the process logger onto an in-process queue, drained by the
//! publisher worker) and scheduled metric callbacks (polled every 100 ms).
//! The listener side subscribes to discovered peers, reconstructs log
//! records locally and appends metric samples to CSV files.

pub mod listener;
pub mod logging;
pub mod metrics;
pub mod sender;

pub use listener::MonitoringListener;
pub use metrics::{MetricCallback, MetricsRegistry};
pub use sender::{MonitoringSender, SCHEDULER_TICK};
