use std::future::ready;

use axum::{http::StatusCode, routing::get, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Probe handler tied to the pipeline scope: 200 while it runs, 503 once it is cancelled.
#[derive(Clone)]
pub struct ProbeHandler {
    cancel: CancellationToken,
}

impl ProbeHandler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn check(&self) -> StatusCode {
        if self.cancel.is_cancelled() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        }
    }
}

pub async fn index() -> &'static str {
    "tweet indexer"
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

pub fn router(cancel: CancellationToken, recorder_handle: PrometheusHandle) -> Router {
    let readiness = ProbeHandler::new(cancel.clone());
    let liveness = ProbeHandler::new(cancel);

    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(move || ready(readiness.check())))
        .route("/_liveness", get(move || ready(liveness.check())))
        .route(
            "/metrics",
            get(move || ready(recorder_handle.render())),
        )
}

/// Serve the router until the token is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
