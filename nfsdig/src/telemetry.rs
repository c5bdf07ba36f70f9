//! OpenTelemetry metrics export
//!
//! Mirrors what the exporters print to an OTLP collector. Export is enabled
//! only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set; every `record_*` helper
//! is a no-op otherwise.

use anyhow::{Context, Result};
use log::{info, warn};
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use crate::domain::TraceDomain;

/// Metric export interval in seconds
const METRIC_EXPORT_INTERVAL_SECS: u64 = 30;

static METRICS: OnceLock<NfsDigMetrics> = OnceLock::new();

static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Attachments per domain, read by the `active_probes` gauge callback.
static ACTIVE_PROBES: OnceLock<RwLock<HashMap<String, u64>>> = OnceLock::new();

fn active_probes_map() -> &'static RwLock<HashMap<String, u64>> {
    ACTIVE_PROBES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Note: Do NOT add _total suffix to Counter names (Prometheus adds it automatically)
pub struct NfsDigMetrics {
    pub nfs_op_calls: Counter<u64>,
    pub nfs_op_latency_us: Histogram<u64>,

    pub rpc_calls: Counter<u64>,
    pub rpc_latency_us: Histogram<u64>,

    pub io_bytes: Counter<u64>,
    pub io_latency_us: Histogram<u64>,

    pub nfs_errors: Counter<u64>,

    pub xdp_packets: Counter<u64>,
    pub flows_evicted: Counter<u64>,
}

impl NfsDigMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            nfs_op_calls: meter
                .u64_counter("nfs_op_calls")
                .with_description("Number of traced NFS client and server operations")
                .with_unit("calls")
                .build(),
            nfs_op_latency_us: meter
                .u64_histogram("nfs_op_latency_us")
                .with_description("Mean NFS operation latency per sampling interval")
                .with_unit("us")
                .build(),

            rpc_calls: meter
                .u64_counter("rpc_calls")
                .with_description("Number of completed RPC tasks")
                .with_unit("calls")
                .build(),
            rpc_latency_us: meter
                .u64_histogram("rpc_latency_us")
                .with_description("RPC round-trip latency")
                .with_unit("us")
                .build(),

            io_bytes: meter
                .u64_counter("io_bytes")
                .with_description("Bytes moved by NFS file reads and writes")
                .with_unit("bytes")
                .build(),
            io_latency_us: meter
                .u64_histogram("io_latency_us")
                .with_description("NFS file I/O call latency")
                .with_unit("us")
                .build(),

            nfs_errors: meter
                .u64_counter("nfs_errors")
                .with_description("RPC tasks that completed with an error status")
                .with_unit("events")
                .build(),

            xdp_packets: meter
                .u64_counter("xdp_packets")
                .with_description("Packets seen by the ingress filter")
                .with_unit("packets")
                .build(),
            flows_evicted: meter
                .u64_counter("flows_evicted")
                .with_description("Flow records removed after exceeding their TTL")
                .with_unit("flows")
                .build(),
        }
    }
}

/// OTEL_EXPORTER_OTLP_ENDPOINT, with `http://` added when no scheme is
/// given. Unset or empty disables export.
fn get_otlp_endpoint() -> Option<String> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    if endpoint.is_empty() {
        return None;
    }

    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        Some(format!("http://{}", endpoint))
    } else {
        Some(endpoint)
    }
}

/// Initialize OpenTelemetry metrics provider
///
/// Must run inside the tokio runtime. Skips initialization if
/// OTEL_EXPORTER_OTLP_ENDPOINT is not set.
pub fn init_metrics() -> Result<()> {
    let endpoint = match get_otlp_endpoint() {
        Some(ep) => ep,
        None => {
            info!("OTEL_EXPORTER_OTLP_ENDPOINT not set. Metrics export disabled.");
            return Ok(());
        }
    };

    info!("OTLP endpoint: {}", endpoint);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_interval(Duration::from_secs(METRIC_EXPORT_INTERVAL_SECS))
        .build();

    let resource = Resource::default().merge(&Resource::new(vec![
        KeyValue::new("service.name", "nfsdig"),
        KeyValue::new("telemetry.sdk.language", "rust"),
    ]));

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(provider.clone());
    let _ = METER_PROVIDER.set(provider);

    let meter = global::meter("nfsdig");

    let _active_probes_gauge = meter
        .u64_observable_gauge("active_probes")
        .with_description("Number of kernel hooks currently attached")
        .with_unit("probes")
        .with_callback(|observer| {
            if let Ok(probes) = active_probes_map().read() {
                for (domain, count) in probes.iter() {
                    observer.observe(*count, &[KeyValue::new("domain", domain.clone())]);
                }
            }
        })
        .build();

    let _ = METRICS.set(NfsDigMetrics::new(&meter));

    info!("OpenTelemetry metrics initialized");
    Ok(())
}

pub fn metrics() -> Option<&'static NfsDigMetrics> {
    METRICS.get()
}

pub fn record_active_probe(domain: TraceDomain, count: u64) {
    if let Ok(mut probes) = active_probes_map().write() {
        probes.insert(domain.name().to_string(), count);
    }
}

#[cfg(test)]
pub fn active_probes(domain: TraceDomain) -> Option<u64> {
    active_probes_map().read().ok()?.get(domain.name()).copied()
}

/// One op/nfsd table row: `calls` in the last interval at `mean_us` each.
pub fn record_op_interval(domain: TraceDomain, op: &str, calls: u64, mean_us: u64) {
    if let Some(m) = metrics() {
        let attrs = [
            KeyValue::new("domain", domain.name()),
            KeyValue::new("operation", op.to_string()),
        ];
        m.nfs_op_calls.add(calls, &attrs);
        m.nfs_op_latency_us.record(mean_us, &attrs);
    }
}

pub fn record_rpc_call(procedure: &str, rtt_ns: u64) {
    if let Some(m) = metrics() {
        let attrs = [KeyValue::new("procedure", procedure.to_string())];
        m.rpc_calls.add(1, &attrs);
        m.rpc_latency_us.record(rtt_ns / 1_000, &attrs);
    }
}

pub fn record_io_event(op: &str, bytes: u64, latency_ns: u64) {
    if let Some(m) = metrics() {
        let attrs = [KeyValue::new("operation", op.to_string())];
        m.io_bytes.add(bytes, &attrs);
        m.io_latency_us.record(latency_ns / 1_000, &attrs);
    }
}

pub fn record_nfs_error(procedure: &str, status: i64) {
    if let Some(m) = metrics() {
        let attrs = [
            KeyValue::new("procedure", procedure.to_string()),
            KeyValue::new("status", status),
        ];
        m.nfs_errors.add(1, &attrs);
    }
}

pub fn record_xdp_packets(total: u64, nfs: u64) {
    if let Some(m) = metrics() {
        m.xdp_packets.add(total, &[KeyValue::new("class", "all")]);
        m.xdp_packets.add(nfs, &[KeyValue::new("class", "nfs")]);
    }
}

pub fn record_flows_evicted(count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = metrics() {
        m.flows_evicted.add(count, &[]);
    }
}

/// Flushes pending metrics and shuts down the MeterProvider
pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            warn!("Failed to shutdown MeterProvider: {}", e);
        } else {
            info!("OpenTelemetry metrics shutdown complete");
        }
    }
}
