use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, TextEncoder};

pub static MESSAGES_APPENDED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_messages_appended_total",
            "Messages persisted, by message type",
        ),
        &["message_type"],
    )
    .expect("failed to create chat_messages_appended_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_messages_appended_total");
    counter
});

pub static REALTIME_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "chat_realtime_sessions",
        "Open realtime channel sessions on this instance",
    )
    .expect("failed to create chat_realtime_sessions");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register chat_realtime_sessions");
    gauge
});

pub static REALTIME_FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_realtime_frames_total",
            "Frames fanned out on realtime channels, by kind",
        ),
        &["kind"],
    )
    .expect("failed to create chat_realtime_frames_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_realtime_frames_total");
    counter
});

pub static BLOB_DELETIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_blob_deletions_total",
            "Attachment blob deletions, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create chat_blob_deletions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_blob_deletions_total");
    counter
});

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
