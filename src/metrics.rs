use lazy_static::lazy_static;
use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::Opts;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref ZOO_CONNECTION_COUNT: Counter = Counter::new(
        "replicore_zookeeper_connect",
        "Number of sessions to the zookeeper ensemble since the process started"
    )
    .expect("Failed to create ZOO_CONNECTION_COUNT counter");
    pub static ref ZOO_LISTENER_PANICS: Counter = Counter::new(
        "replicore_zookeeper_listener_panics",
        "Number of child or state listener invocations that panicked"
    )
    .expect("Failed to create ZOO_LISTENER_PANICS counter");
    pub static ref ZOO_OP_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "replicore_zookeeper_op_duration",
            "Duration (in seconds) of Zookeeper operations"
        ),
        &["operation"]
    )
    .expect("Failed to create ZOO_OP_DURATION histogram");
    pub static ref ZOO_OP_ERRORS_COUNT: CounterVec = CounterVec::new(
        Opts::new(
            "replicore_zookeeper_op_errors",
            "Number of Zookeeper operations that failed"
        ),
        &["operation"]
    )
    .expect("Failed to create ZOO_OP_ERRORS_COUNT counter");
    pub static ref ZOO_STATE_EVENTS: CounterVec = CounterVec::new(
        Opts::new(
            "replicore_zookeeper_state_events",
            "Number of connection state events dispatched to state listeners"
        ),
        &["event"]
    )
    .expect("Failed to create ZOO_STATE_EVENTS counter");
    pub static ref ZOO_TIMEOUTS_COUNT: Counter = Counter::new(
        "replicore_zookeeper_timeouts",
        "Number of operations that failed due to timeouts"
    )
    .expect("Failed to create ZOO_TIMEOUTS_COUNT counter");
    pub static ref ZOO_WATCH_FIRED: Counter = Counter::new(
        "replicore_zookeeper_watch_fired",
        "Number of children watches triggered by the ensemble"
    )
    .expect("Failed to create ZOO_WATCH_FIRED counter");
    pub static ref ZOO_WATCH_LOST: Counter = Counter::new(
        "replicore_zookeeper_watch_lost",
        "Number of children watches that could not be re-registered"
    )
    .expect("Failed to create ZOO_WATCH_LOST counter");
}

/// Attemps to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(err) = registry.register(Box::new(ZOO_CONNECTION_COUNT.clone())) {
        debug!(logger, "Failed to register ZOO_CONNECTION_COUNT"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ZOO_LISTENER_PANICS.clone())) {
        debug!(logger, "Failed to register ZOO_LISTENER_PANICS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ZOO_OP_DURATION.clone())) {
        debug!(logger, "Failed to register ZOO_OP_DURATION"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ZOO_OP_ERRORS_COUNT.clone())) {
        debug!(logger, "Failed to register ZOO_OP_ERRORS_COUNT"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ZOO_STATE_EVENTS.clone())) {
        debug!(logger, "Failed to register ZOO_STATE_EVENTS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ZOO_TIMEOUTS_COUNT.clone())) {
        debug!(logger, "Failed to register ZOO_TIMEOUTS_COUNT"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ZOO_WATCH_FIRED.clone())) {
        debug!(logger, "Failed to register ZOO_WATCH_FIRED"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(ZOO_WATCH_LOST.clone())) {
        debug!(logger, "Failed to register ZOO_WATCH_LOST"; "error" => ?err);
    }
}
