use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub requests_submitted_total: IntCounter,
    pub transitions_total: IntCounterVec,
    pub operation_errors_total: IntCounterVec,
    pub rate_limited_total: IntCounter,
    pub operation_latency_seconds: HistogramVec,
    pub rate_limit_buckets: IntGauge,
    pub quotes_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_submitted_total = IntCounter::new(
            "requests_submitted_total",
            "Delivery requests accepted by submit",
        )
        .expect("valid requests_submitted_total metric");

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Committed status transitions by target status"),
            &["to"],
        )
        .expect("valid transitions_total metric");

        let operation_errors_total = IntCounterVec::new(
            Opts::new("operation_errors_total", "Failed operations by operation and error kind"),
            &["operation", "kind"],
        )
        .expect("valid operation_errors_total metric");

        let rate_limited_total =
            IntCounter::new("rate_limited_total", "Actions denied by the rate limiter")
                .expect("valid rate_limited_total metric");

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Latency of request service operations in seconds",
            ),
            &["operation", "outcome"],
        )
        .expect("valid operation_latency_seconds metric");

        let rate_limit_buckets =
            IntGauge::new("rate_limit_buckets", "Rate limiter buckets currently tracked")
                .expect("valid rate_limit_buckets metric");

        let quotes_total = IntCounterVec::new(
            Opts::new("quotes_total", "Price quotes computed by service type"),
            &["service_type"],
        )
        .expect("valid quotes_total metric");

        registry
            .register(Box::new(requests_submitted_total.clone()))
            .expect("register requests_submitted_total");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(operation_errors_total.clone()))
            .expect("register operation_errors_total");
        registry
            .register(Box::new(rate_limited_total.clone()))
            .expect("register rate_limited_total");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("register operation_latency_seconds");
        registry
            .register(Box::new(rate_limit_buckets.clone()))
            .expect("register rate_limit_buckets");
        registry
            .register(Box::new(quotes_total.clone()))
            .expect("register quotes_total");

        Self {
            registry,
            requests_submitted_total,
            transitions_total,
            operation_errors_total,
            rate_limited_total,
            operation_latency_seconds,
            rate_limit_buckets,
            quotes_total,
        }
    }

    pub fn observe(&self, operation: &str, outcome: Result<(), &str>, elapsed_secs: f64) {
        let label = match outcome {
            Ok(()) => "success",
            Err(kind) => {
                self.operation_errors_total
                    .with_label_values(&[operation, kind])
                    .inc();
                "error"
            }
        };

        self.operation_latency_seconds
            .with_label_values(&[operation, label])
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
