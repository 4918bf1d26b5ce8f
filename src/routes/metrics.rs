use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: job counters, durations and queue depth in Prometheus text format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the orchestrator emits.
pub fn describe() {
    metrics::describe_counter!(
        "raster_jobs_submitted_total",
        "Jobs accepted and queued, by operation"
    );
    metrics::describe_counter!(
        "raster_jobs_finished_total",
        "Jobs that reached a terminal state, by status and operation"
    );
    metrics::describe_histogram!(
        "raster_job_duration_seconds",
        "Wall time from job start to terminal state"
    );
    metrics::describe_gauge!(
        "raster_queue_depth",
        "Tasks waiting to be reserved by an executor"
    );
}
