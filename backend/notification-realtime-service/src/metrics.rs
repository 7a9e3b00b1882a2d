use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "notification_realtime_ws_connections_active",
        "WebSocket connections currently registered",
    )
    .expect("failed to create notification_realtime_ws_connections_active");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register notification_realtime_ws_connections_active");
    gauge
});

static WS_UPGRADES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notification_realtime_ws_upgrades_total",
            "WebSocket upgrade attempts by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create notification_realtime_ws_upgrades_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register notification_realtime_ws_upgrades_total");
    counter
});

static FRAMES_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "notification_realtime_frames_delivered_total",
        "Frames queued onto client connections",
    )
    .expect("failed to create notification_realtime_frames_delivered_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register notification_realtime_frames_delivered_total");
    counter
});

static BUS_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notification_realtime_bus_messages_total",
            "Pub/sub messages received by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create notification_realtime_bus_messages_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register notification_realtime_bus_messages_total");
    counter
});

pub fn connection_opened() {
    WS_CONNECTIONS_ACTIVE.inc();
}

pub fn connection_closed() {
    WS_CONNECTIONS_ACTIVE.dec();
}

/// `accepted`, `unauthorized`, `bad_request` or `rejected_limit`
pub fn observe_upgrade(outcome: &str) {
    WS_UPGRADES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn frames_delivered(count: usize) {
    if count > 0 {
        FRAMES_DELIVERED_TOTAL.inc_by(count as u64);
    }
}

/// `delivered`, `no_recipient` or `dropped`
pub fn observe_bus_message(outcome: &str) {
    BUS_MESSAGES_TOTAL.with_label_values(&[outcome]).inc();
}

pub async fn serve_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
