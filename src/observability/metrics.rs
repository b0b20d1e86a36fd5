use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub orders_in_queue: IntGauge,
    pub assignment_latency_seconds: HistogramVec,
    pub active_offers: IntGauge,
    pub deliveries_completed_total: IntCounter,
    pub payouts_total: IntCounterVec,
    pub payout_amount_cents_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Assignment lifecycle events by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let orders_in_queue = IntGauge::new("orders_in_queue", "Current number of orders in queue")
            .expect("valid orders_in_queue metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of a dispatch pass in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let active_offers = IntGauge::new("active_offers", "Offers waiting for a courier response")
            .expect("valid active_offers metric");

        let deliveries_completed_total =
            IntCounter::new("deliveries_completed_total", "Orders delivered")
                .expect("valid deliveries_completed_total metric");

        let payouts_total = IntCounterVec::new(
            Opts::new("payouts_total", "Courier payout transfer attempts by outcome"),
            &["outcome"],
        )
        .expect("valid payouts_total metric");

        let payout_amount_cents_total = IntCounter::new(
            "payout_amount_cents_total",
            "Minor currency units successfully paid out",
        )
        .expect("valid payout_amount_cents_total metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(orders_in_queue.clone()))
            .expect("register orders_in_queue");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(active_offers.clone()))
            .expect("register active_offers");
        registry
            .register(Box::new(deliveries_completed_total.clone()))
            .expect("register deliveries_completed_total");
        registry
            .register(Box::new(payouts_total.clone()))
            .expect("register payouts_total");
        registry
            .register(Box::new(payout_amount_cents_total.clone()))
            .expect("register payout_amount_cents_total");

        Self {
            registry,
            assignments_total,
            orders_in_queue,
            assignment_latency_seconds,
            active_offers,
            deliveries_completed_total,
            payouts_total,
            payout_amount_cents_total,
        }
    }

    pub fn assignment_outcome(&self, outcome: &str) {
        self.assignments_total.with_label_values(&[outcome]).inc();
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
