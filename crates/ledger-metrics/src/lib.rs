//! Observer fed per committed posting (spec §4.8, C7).
//!
//! Split add/remove counters and sums, labeled by asset symbol plus static
//! process metadata. Grounded on `pkg/metrics/collector.go`'s `TxCollector`:
//! four `CounterVec`s, labels `[asset, host, database, immudb]` plus
//! conditional `namespace`/`ip`, and a panic-safe `observe` boundary (the
//! source's `defer recover()`).

use std::panic::{catch_unwind, AssertUnwindSafe};

use prometheus::{CounterVec, Opts, Registry};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Fed once per committed posting with the asset symbol and its signed
/// amount. Implementations split add/remove counters and sums; errors
/// inside an implementation must never propagate to the caller (see
/// [`observe_panic_safe`], which every [`MetricsSink::observe`] caller should
/// route through).
pub trait MetricsSink: Send + Sync {
    fn observe(&self, asset: &str, amount: Decimal);
}

/// Invoke `sink.observe` behind a panic boundary, logging and swallowing any
/// panic so a misbehaving sink can never fail the posting it was notified
/// about.
pub fn observe_panic_safe(sink: &dyn MetricsSink, asset: &str, amount: Decimal) {
    let result = catch_unwind(AssertUnwindSafe(|| sink.observe(asset, amount)));
    if let Err(panic) = result {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(%detail, "metrics sink panicked; posting still committed");
    }
}

/// Static process metadata attached to every metric label set, mirroring the
/// source's `os.Getenv("POD_NAMESPACE")`/`POD_IP` conditional labels.
#[derive(Clone, Debug, Default)]
pub struct ProcessLabels {
    pub hostname: String,
    pub database: String,
    pub kv_server: String,
    pub namespace: Option<String>,
    pub pod_ip: Option<String>,
}

impl ProcessLabels {
    pub fn discover(database: impl Into<String>, kv_server: impl Into<String>) -> Self {
        Self {
            hostname: hostname_or_unknown(),
            database: database.into(),
            kv_server: kv_server.into(),
            namespace: std::env::var("POD_NAMESPACE").ok().filter(|s| !s.is_empty()),
            pod_ip: std::env::var("POD_IP").ok().filter(|s| !s.is_empty()),
        }
    }

    fn label_names(&self) -> Vec<&'static str> {
        let mut names = vec!["asset", "host", "database", "immudb"];
        if self.namespace.is_some() {
            names.push("namespace");
        }
        if self.pod_ip.is_some() {
            names.push("ip");
        }
        names
    }

    fn label_values<'a>(&'a self, asset: &'a str) -> Vec<&'a str> {
        let mut values = vec![asset, self.hostname.as_str(), self.database.as_str(), self.kv_server.as_str()];
        if let Some(ns) = &self.namespace {
            values.push(ns.as_str());
        }
        if let Some(ip) = &self.pod_ip {
            values.push(ip.as_str());
        }
        values
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").ok().unwrap_or_else(|| "unknown".to_string())
}

/// Prometheus-backed [`MetricsSink`], registered under the `core_ledger_*`
/// namespace/subsystem exactly as the source's `TxCollector`.
pub struct PrometheusMetricsSink {
    labels: ProcessLabels,
    add_sum: CounterVec,
    add_count: CounterVec,
    remove_sum: CounterVec,
    remove_count: CounterVec,
}

impl PrometheusMetricsSink {
    pub fn new(registry: &Registry, labels: ProcessLabels) -> Result<Self, prometheus::Error> {
        let label_names = labels.label_names();

        let add_sum = CounterVec::new(
            Opts::new("add_sum", "Sum of add transactions")
                .namespace("core")
                .subsystem("ledger"),
            &label_names,
        )?;
        let add_count = CounterVec::new(
            Opts::new("add_counter", "Number of add transactions")
                .namespace("core")
                .subsystem("ledger"),
            &label_names,
        )?;
        let remove_sum = CounterVec::new(
            Opts::new("remove_sum", "Sum of remove transactions")
                .namespace("core")
                .subsystem("ledger"),
            &label_names,
        )?;
        let remove_count = CounterVec::new(
            Opts::new("remove_counter", "Number of remove transactions")
                .namespace("core")
                .subsystem("ledger"),
            &label_names,
        )?;

        registry.register(Box::new(add_sum.clone()))?;
        registry.register(Box::new(add_count.clone()))?;
        registry.register(Box::new(remove_sum.clone()))?;
        registry.register(Box::new(remove_count.clone()))?;

        Ok(Self {
            labels,
            add_sum,
            add_count,
            remove_sum,
            remove_count,
        })
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn observe(&self, asset: &str, amount: Decimal) {
        let values = self.labels.label_values(asset);
        let fvalue = amount.to_f64().unwrap_or(0.0);

        if amount.is_sign_negative() {
            self.remove_sum.with_label_values(&values).inc_by(-fvalue);
            self.remove_count.with_label_values(&values).inc();
        } else {
            self.add_sum.with_label_values(&values).inc_by(fvalue);
            self.add_count.with_label_values(&values).inc();
        }
    }
}

/// A sink that discards every observation; used in tests and by embeddings
/// that do not want Prometheus wired in.
#[derive(Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn observe(&self, _asset: &str, _amount: Decimal) {}
}

/// A sink used in tests to assert what was observed.
#[cfg(any(test, feature = "test-util"))]
pub struct RecordingMetricsSink {
    pub observations: std::sync::Mutex<Vec<(String, Decimal)>>,
}

#[cfg(any(test, feature = "test-util"))]
impl Default for RecordingMetricsSink {
    fn default() -> Self {
        Self {
            observations: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl MetricsSink for RecordingMetricsSink {
    fn observe(&self, asset: &str, amount: Decimal) {
        self.observations
            .lock()
            .expect("recording sink lock poisoned")
            .push((asset.to_string(), amount));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingSink;
    impl MetricsSink for PanickingSink {
        fn observe(&self, _asset: &str, _amount: Decimal) {
            panic!("boom");
        }
    }

    #[test]
    fn panic_in_sink_does_not_propagate() {
        observe_panic_safe(&PanickingSink, "XRP", Decimal::ONE);
    }

    #[test]
    fn recording_sink_splits_add_and_remove() {
        let sink = RecordingMetricsSink::default();
        sink.observe("XRP", Decimal::new(5, 0));
        sink.observe("XRP", Decimal::new(-3, 0));
        let observed = sink.observations.lock().unwrap();
        assert_eq!(observed.len(), 2);
    }

    #[test]
    fn prometheus_sink_registers_without_namespace_labels() {
        let registry = Registry::new();
        let labels = ProcessLabels {
            hostname: "host-1".to_string(),
            database: "ledgerdb".to_string(),
            kv_server: "kv:3322".to_string(),
            namespace: None,
            pod_ip: None,
        };
        let sink = PrometheusMetricsSink::new(&registry, labels).unwrap();
        sink.observe("BTC", Decimal::new(100, 2));
        sink.observe("BTC", Decimal::new(-50, 2));
        let families = registry.gather();
        assert!(!families.is_empty());
    }
}
