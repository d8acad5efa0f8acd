use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub queue_length: IntGauge,
    pub queue_operations_total: IntCounterVec,
    pub assignments_total: IntCounter,
    pub geofence_checks_total: IntCounterVec,
    pub operation_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let queue_length = IntGauge::new("queue_length", "Couriers currently waiting in the queue")
            .expect("valid queue_length metric");

        let queue_operations_total = IntCounterVec::new(
            Opts::new(
                "queue_operations_total",
                "Queue operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("valid queue_operations_total metric");

        let assignments_total =
            IntCounter::new("assignments_total", "Order assignments recorded")
                .expect("valid assignments_total metric");

        let geofence_checks_total = IntCounterVec::new(
            Opts::new("geofence_checks_total", "Geofence evaluations by outcome"),
            &["outcome"],
        )
        .expect("valid geofence_checks_total metric");

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Latency of store-backed operations in seconds",
            ),
            &["operation"],
        )
        .expect("valid operation_latency_seconds metric");

        registry
            .register(Box::new(queue_length.clone()))
            .expect("register queue_length");
        registry
            .register(Box::new(queue_operations_total.clone()))
            .expect("register queue_operations_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(geofence_checks_total.clone()))
            .expect("register geofence_checks_total");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("register operation_latency_seconds");

        Self {
            registry,
            queue_length,
            queue_operations_total,
            assignments_total,
            geofence_checks_total,
            operation_latency_seconds,
        }
    }

    pub fn record_operation(&self, operation: &str, outcome: &str, elapsed_secs: f64) {
        self.queue_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_latency_seconds
            .with_label_values(&[operation])
            .observe(elapsed_secs);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn recorded_operations_show_up_in_text_output() {
        let metrics = Metrics::new();
        metrics.record_operation("join", "joined", 0.002);
        metrics.queue_length.set(3);

        let body = metrics.encode().unwrap();
        assert!(body.contains("queue_operations_total{operation=\"join\",outcome=\"joined\"} 1"));
        assert!(body.contains("queue_length 3"));
    }
}
