//! Metric registry: the set of published metrics, their current snapshots,
//! and the concurrent refresh that recomputes them from disk.
//!
//! Each metric owns one slot behind its own lock. A refresh computes every
//! metric in a separate task and replaces each slot as its result arrives, so
//! readers see either the previous or the new value of a metric, never a mix.
//! A failed extraction leaves that metric's previous value in place.

use crate::extract::{self, ScanError};
use crate::storage_dir::StorageDir;
use crate::version::{VersionClient, VersionInfo};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

/// Prefix shared by every published metric name.
pub const PREFIX: &str = "owntracks";

/// The current value of one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricValue {
    Count(u64),
    Bytes(u64),
    Timestamp(i64),
    Version(VersionInfo),
}

impl MetricValue {
    /// Append this value in Prometheus text format.
    ///
    /// Gauges are published as `<name> <value>`; the version record as an
    /// info metric `<name>_info{git="..",version=".."} 1`.
    pub fn publish(&self, name: &str, help: &str, out: &mut String) {
        match self {
            MetricValue::Count(n) | MetricValue::Bytes(n) => write_gauge(out, name, help, *n),
            MetricValue::Timestamp(ts) => write_gauge(out, name, help, *ts),
            MetricValue::Version(info) => {
                let name = format!("{name}_info");
                let _ = writeln!(out, "# HELP {name} {help}");
                let _ = writeln!(out, "# TYPE {name} gauge");
                let _ = writeln!(
                    out,
                    "{name}{{git=\"{}\",version=\"{}\"}} 1",
                    escape_label(&info.git),
                    escape_label(&info.version)
                );
            }
        }
    }
}

fn write_gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// A synchronous extractor over the storage directory.
pub type StorageExtractor = fn(&StorageDir) -> Result<MetricValue, ScanError>;

/// Where a metric's value comes from.
#[derive(Clone, Copy)]
pub enum Source {
    /// Computed from the storage directory on a blocking thread.
    Storage(StorageExtractor),
    /// Asked from the recorder's HTTP API.
    Version,
}

impl Source {
    async fn extract(self, ctx: &ScanContext) -> Result<MetricValue, ScanError> {
        match self {
            Source::Storage(f) => {
                let storage = ctx.storage.clone();
                tokio::task::spawn_blocking(move || f(&storage))
                    .await
                    .map_err(|e| ScanError::Task {
                        message: e.to_string(),
                    })?
            }
            Source::Version => Ok(MetricValue::Version(ctx.version.fetch().await)),
        }
    }
}

/// Static description of a published metric.
#[derive(Clone)]
pub struct MetricDef {
    /// Name without the `owntracks_` prefix.
    pub name: &'static str,
    pub help: &'static str,
    /// Value published before the first successful extraction.
    pub initial: MetricValue,
    pub source: Source,
}

impl MetricDef {
    pub fn storage(
        name: &'static str,
        help: &'static str,
        initial: MetricValue,
        extract: StorageExtractor,
    ) -> Self {
        Self {
            name,
            help,
            initial,
            source: Source::Storage(extract),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{PREFIX}_{}", self.name)
    }
}

/// The metrics published by the exporter.
pub fn owntracks_metrics() -> Vec<MetricDef> {
    vec![
        MetricDef::storage(
            "users_count",
            "Total number of users",
            MetricValue::Count(0),
            |s| extract::users_count(s).map(MetricValue::Count),
        ),
        MetricDef::storage(
            "devices_count",
            "Total number of devices",
            MetricValue::Count(0),
            |s| extract::devices_count(s).map(MetricValue::Count),
        ),
        MetricDef::storage(
            "cards_count",
            "Total number of cards",
            MetricValue::Count(0),
            |s| extract::cards_count(s).map(MetricValue::Count),
        ),
        MetricDef::storage(
            "waypoints_count",
            "Total number of waypoints",
            MetricValue::Count(0),
            |s| extract::waypoints_count(s).map(MetricValue::Count),
        ),
        MetricDef::storage(
            "last_locations_count",
            "Total number of last locations",
            MetricValue::Count(0),
            |s| extract::last_locations_count(s).map(MetricValue::Count),
        ),
        MetricDef::storage(
            "locations_count",
            "Total number of locations",
            MetricValue::Count(0),
            |s| extract::locations_count(s).map(MetricValue::Count),
        ),
        MetricDef::storage(
            "last_received_timestamp",
            "Timestamp of the last received message",
            MetricValue::Timestamp(0),
            |s| extract::last_received_timestamp(s).map(MetricValue::Timestamp),
        ),
        MetricDef::storage(
            "storagedir_size",
            "Size of the OwnTracks Recorder's storage directory in bytes",
            MetricValue::Bytes(0),
            |s| extract::storagedir_size(s).map(MetricValue::Bytes),
        ),
        MetricDef {
            name: "version",
            help: "OwnTracks Recorder version",
            initial: MetricValue::Version(VersionInfo::default()),
            source: Source::Version,
        },
    ]
}

/// Everything an extraction needs. Cheap to clone into each task.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub storage: StorageDir,
    pub version: VersionClient,
}

struct Metric {
    def: MetricDef,
    value: RwLock<MetricValue>,
}

/// Owns every metric's current snapshot. Shared between the scheduler, which
/// refreshes it, and the exposition layer, which reads it.
pub struct MetricStore {
    metrics: Vec<Metric>,
    cycles: AtomicU64,
}

impl MetricStore {
    pub fn new(defs: Vec<MetricDef>) -> Self {
        let metrics = defs
            .into_iter()
            .map(|def| Metric {
                value: RwLock::new(def.initial.clone()),
                def,
            })
            .collect();
        Self {
            metrics,
            cycles: AtomicU64::new(0),
        }
    }

    /// A store holding the exporter's standard metric set.
    pub fn owntracks() -> Self {
        Self::new(owntracks_metrics())
    }

    /// Current snapshot of the metric named `name` (without prefix).
    #[cfg(test)]
    pub async fn get(&self, name: &str) -> Option<MetricValue> {
        let metric = self.metrics.iter().find(|m| m.def.name == name)?;
        Some(metric.value.read().await.clone())
    }

    /// Number of completed [`refresh_all`](Self::refresh_all) calls.
    pub fn completed_cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Recompute every metric concurrently and commit the results.
    ///
    /// Failures are isolated per metric: the failed metric keeps its previous
    /// snapshot and the others are still committed.
    pub async fn refresh_all(&self, ctx: &ScanContext) {
        let start = Instant::now();

        let handles: Vec<_> = self
            .metrics
            .iter()
            .map(|metric| {
                let ctx = ctx.clone();
                let source = metric.def.source;
                tokio::spawn(async move { source.extract(&ctx).await })
            })
            .collect();

        let mut failed = 0u32;
        for (metric, handle) in self.metrics.iter().zip(handles) {
            let name = metric.def.name;
            match handle.await {
                Ok(Ok(value)) => {
                    tracing::debug!(metric = name, value = ?value, "metric refreshed");
                    *metric.value.write().await = value;
                }
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(
                        metric = name,
                        error = %e,
                        "metric extraction failed, keeping previous value"
                    );
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        metric = name,
                        error = %e,
                        "metric task failed, keeping previous value"
                    );
                }
            }
        }

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            cycle,
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "scan cycle complete"
        );
    }

    /// Render every metric in Prometheus text exposition format.
    pub async fn render(&self) -> String {
        let mut out = String::new();
        for metric in &self.metrics {
            let value = metric.value.read().await.clone();
            value.publish(&metric.def.full_name(), metric.def.help, &mut out);
        }
        out
    }
}
