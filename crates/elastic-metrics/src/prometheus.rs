//! Prometheus text exposition format.
//!
//! Renders controller gauges into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::gauges::PolicyGauges;

/// A metric family: name, type, help text, and how to read the value.
type Family = (&'static str, &'static str, &'static str, fn(&PolicyGauges) -> String);

const FAMILIES: [Family; 9] = [
    ("elastic_measured_rate", "gauge", "Last measured ingestion rate.", |g| {
        format!("{:.2}", g.measured_rate)
    }),
    ("elastic_desired_replicas", "gauge", "Total replicas computed by the last cycle.", |g| {
        g.desired_replicas.to_string()
    }),
    ("elastic_buffered_replicas", "gauge", "Buffer replicas computed by the last cycle.", |g| {
        g.buffered_replicas.to_string()
    }),
    ("elastic_declared_replicas", "gauge", "Declared replicas of the managed deployment.", |g| {
        g.declared_replicas.to_string()
    }),
    ("elastic_actual_replicas", "gauge", "Observed replicas of the managed deployment.", |g| {
        g.actual_replicas.to_string()
    }),
    ("elastic_reconciles_total", "counter", "Completed reconciliation cycles.", |g| {
        g.reconciles_total.to_string()
    }),
    ("elastic_reconcile_failures_total", "counter", "Failed reconciliation cycles.", |g| {
        g.failures_total.to_string()
    }),
    ("elastic_scale_ups_total", "counter", "Executed scale-up actions.", |g| {
        g.scale_ups_total.to_string()
    }),
    ("elastic_scale_downs_total", "counter", "Executed scale-down actions.", |g| {
        g.scale_downs_total.to_string()
    }),
];

/// Render per-policy gauges into Prometheus text format.
///
/// Produces GAUGE and COUNTER metrics with `policy` labels.
pub fn render_prometheus(gauges: &[PolicyGauges]) -> String {
    let mut out = String::new();

    for (name, kind, help, value) in FAMILIES {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} {kind}");
        for g in gauges {
            let _ = writeln!(out, "{name}{{policy=\"{}\"}} {}", g.policy, value(g));
        }
    }

    out
}
