//! Prometheus metrics.
//!
//! Gauges produced by the retention reporter reach Prometheus through
//! [`PrometheusSink`], which forwards them to the global `metrics` recorder.
//! [`RecordingSink`] keeps the last value of every gauge in memory instead.

use crate::config::MetricsSettings;
use crate::retention::report::{GaugeValue, SCHEDULE_LABEL, STATUS_LABEL};
use crate::store::MetricsSink;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Mutex, MutexGuard};
use std::thread;

/// Metrics configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Address to bind the metrics exporter.
    pub listen_addr: SocketAddr,
}

impl MetricsConfig {
    /// Builds metrics configuration from settings.
    #[must_use]
    pub const fn from_settings(settings: &MetricsSettings) -> Self {
        Self {
            enabled: settings.enabled,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.port),
        }
    }
}

/// Installs the Prometheus recorder, and the HTTP listener when `expose` is set.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener cannot
/// be started.
pub fn install_prometheus(config: &MetricsConfig, expose: bool) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = PrometheusBuilder::new();
    let handle = if expose {
        let builder = builder.with_http_listener(config.listen_addr);
        install_listener(builder)?
    } else {
        builder
            .install_recorder()
            .map_err(|e| Error::OperationFailed {
                operation: "metrics_recorder_install".to_string(),
                cause: e.to_string(),
            })?
    };

    tracing::debug!(addr = %config.listen_addr, expose, "Prometheus recorder installed");
    Ok(Some(handle))
}

fn install_listener(builder: PrometheusBuilder) -> Result<PrometheusHandle> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return install_with_runtime(builder, &handle);
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_runtime_init".to_string(),
            cause: e.to_string(),
        })?;
    let handle = runtime.handle().clone();
    let prometheus = install_with_runtime(builder, &handle)?;
    thread::Builder::new()
        .name("taweret-metrics-http".to_string())
        .spawn(move || runtime.block_on(async { std::future::pending::<()>().await }))
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_runtime_thread".to_string(),
            cause: e.to_string(),
        })?;
    Ok(prometheus)
}

fn install_with_runtime(
    builder: PrometheusBuilder,
    runtime_handle: &tokio::runtime::Handle,
) -> Result<PrometheusHandle> {
    let (recorder, exporter) = {
        let _guard = runtime_handle.enter();
        builder.build().map_err(|e| Error::OperationFailed {
            operation: "metrics_exporter_build".to_string(),
            cause: e.to_string(),
        })?
    };
    let handle = recorder.handle();
    set_global_recorder(recorder)?;
    runtime_handle.spawn(exporter);
    Ok(handle)
}

fn set_global_recorder(recorder: PrometheusRecorder) -> Result<()> {
    metrics::set_global_recorder(recorder).map_err(|e| Error::OperationFailed {
        operation: "metrics_recorder_install".to_string(),
        cause: e.to_string(),
    })
}

/// Forwards gauges to the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl PrometheusSink {
    /// Creates a sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MetricsSink for PrometheusSink {
    fn set_gauge(&self, gauge: &GaugeValue) {
        let labels: Vec<metrics::Label> = gauge
            .labels
            .iter()
            .map(|(key, value)| metrics::Label::new(*key, value.clone()))
            .collect();
        metrics::gauge!(gauge.name, labels).set(gauge.value);
    }
}

type GaugeKey = (String, Vec<(String, String)>);

/// Keeps the latest value of each gauge in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    gauges: Mutex<BTreeMap<GaugeKey, f64>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<GaugeKey, f64>> {
        match self.gauges.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Latest value of a schedule's gauge, optionally for one status.
    #[must_use]
    pub fn value(&self, name: &str, schedule: &str, status: Option<&str>) -> Option<f64> {
        let has = |labels: &[(String, String)], key: &str, expected: &str| {
            labels.iter().any(|(k, v)| k == key && v == expected)
        };
        self.lock()
            .iter()
            .find(|((gauge, labels), _)| {
                gauge == name
                    && has(labels, SCHEDULE_LABEL, schedule)
                    && status.is_none_or(|s| has(labels, STATUS_LABEL, s))
            })
            .map(|(_, value)| *value)
    }

    /// Number of distinct gauge series written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl MetricsSink for RecordingSink {
    fn set_gauge(&self, gauge: &GaugeValue) {
        let labels = gauge
            .labels
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect();
        self.lock()
            .insert((gauge.name.to_string(), labels), gauge.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::report::BACKUP_COUNT;

    fn gauge(schedule: &str, status: &str, value: f64) -> GaugeValue {
        GaugeValue {
            name: BACKUP_COUNT,
            labels: vec![
                (SCHEDULE_LABEL, schedule.to_string()),
                (STATUS_LABEL, status.to_string()),
            ],
            value,
        }
    }

    #[test]
    fn test_metrics_config_from_settings() {
        let config = MetricsConfig::from_settings(&MetricsSettings::default());
        assert!(config.enabled);
        assert_eq!(config.listen_addr.to_string(), "0.0.0.0:2112");
    }

    #[test]
    fn test_recording_sink_overwrites() {
        let sink = RecordingSink::new();
        sink.set_gauge(&gauge("daily", "pending", 3.0));
        sink.set_gauge(&gauge("daily", "pending", 1.0));
        sink.set_gauge(&gauge("weekly", "pending", 7.0));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.value(BACKUP_COUNT, "daily", Some("pending")), Some(1.0));
        assert_eq!(sink.value(BACKUP_COUNT, "weekly", None), Some(7.0));
        assert_eq!(sink.value(BACKUP_COUNT, "daily", Some("failed")), None);
    }

    #[test]
    fn test_prometheus_sink_renders_gauges() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            PrometheusSink::new().set_gauge(&gauge("daily", "completed", 4.0));
        });

        let rendered = handle.render();
        assert!(rendered.contains("backup_count"));
        assert!(rendered.contains("backup_config_name=\"daily\""));
        assert!(rendered.contains("backup_status=\"completed\""));
    }
}
