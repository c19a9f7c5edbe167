use std::time::Duration;

/// Key/value labels attached to a measurement.
pub type Attributes<'a> = &'a [(&'static str, &'a str)];

/// Instrumentation sink for engine operations.
pub trait Metrics: Send + Sync {
    fn increment(&self, name: &'static str, value: u64, attrs: Attributes<'_>);

    fn timing(&self, name: &'static str, elapsed: Duration, attrs: Attributes<'_>);

    fn gauge(&self, name: &'static str, value: f64, attrs: Attributes<'_>);
}

pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment(&self, _name: &'static str, _value: u64, _attrs: Attributes<'_>) {}

    fn timing(&self, _name: &'static str, _elapsed: Duration, _attrs: Attributes<'_>) {}

    fn gauge(&self, _name: &'static str, _value: f64, _attrs: Attributes<'_>) {}
}

/// Emits every measurement as a `tracing` event under the `metrics` target.
pub struct TracingMetrics;

fn render(attrs: Attributes<'_>) -> String {
    attrs
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

impl Metrics for TracingMetrics {
    fn increment(&self, name: &'static str, value: u64, attrs: Attributes<'_>) {
        tracing::info!(target: "metrics", metric = name, kind = "counter", value, attrs = %render(attrs));
    }

    fn timing(&self, name: &'static str, elapsed: Duration, attrs: Attributes<'_>) {
        tracing::info!(
            target: "metrics",
            metric = name,
            kind = "timing",
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            attrs = %render(attrs)
        );
    }

    fn gauge(&self, name: &'static str, value: f64, attrs: Attributes<'_>) {
        tracing::info!(target: "metrics", metric = name, kind = "gauge", value, attrs = %render(attrs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_attributes() {
        assert_eq!(render(&[]), "");
        assert_eq!(
            render(&[("backend", "disk"), ("status", "completed")]),
            "backend=disk,status=completed"
        );
    }

    #[test]
    fn test_tracing_metrics_do_not_panic_without_subscriber() {
        let metrics = TracingMetrics;
        metrics.increment("upload.create", 1, &[("backend", "disk")]);
        metrics.timing("upload.write", Duration::from_millis(3), &[]);
        metrics.gauge("upload.bytes", 42.0, &[]);
    }
}
