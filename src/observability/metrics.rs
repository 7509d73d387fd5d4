use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub jobs_total: IntCounterVec,
    pub job_duration_seconds: HistogramVec,
    pub transitions_total: IntCounterVec,
    pub bids_total: IntCounterVec,
    pub open_bid_windows: IntGauge,
    pub notifications_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let jobs_total = IntCounterVec::new(
            Opts::new("dispatch_jobs_total", "Batch job runs by job and outcome"),
            &["job", "outcome"],
        )
        .expect("valid dispatch_jobs_total metric");

        let job_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_job_duration_seconds",
                "Batch job wall time in seconds",
            ),
            &["job"],
        )
        .expect("valid dispatch_job_duration_seconds metric");

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "dispatch_transitions_total",
                "Assignment lifecycle transitions by name",
            ),
            &["transition"],
        )
        .expect("valid dispatch_transitions_total metric");

        let bids_total = IntCounterVec::new(
            Opts::new("dispatch_bids_total", "Bids by window mode and outcome"),
            &["mode", "outcome"],
        )
        .expect("valid dispatch_bids_total metric");

        let open_bid_windows =
            IntGauge::new("dispatch_open_bid_windows", "Bid windows currently open")
                .expect("valid dispatch_open_bid_windows metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("dispatch_notifications_total", "Notifications sent by kind"),
            &["kind"],
        )
        .expect("valid dispatch_notifications_total metric");

        registry
            .register(Box::new(jobs_total.clone()))
            .expect("register dispatch_jobs_total");
        registry
            .register(Box::new(job_duration_seconds.clone()))
            .expect("register dispatch_job_duration_seconds");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register dispatch_transitions_total");
        registry
            .register(Box::new(bids_total.clone()))
            .expect("register dispatch_bids_total");
        registry
            .register(Box::new(open_bid_windows.clone()))
            .expect("register dispatch_open_bid_windows");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register dispatch_notifications_total");

        Self {
            registry,
            jobs_total,
            job_duration_seconds,
            transitions_total,
            bids_total,
            open_bid_windows,
            notifications_total,
        }
    }

    pub fn transition(&self, name: &str) {
        self.transitions_total.with_label_values(&[name]).inc();
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
