mod support;

use std::collections::HashSet;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use mermaid_gateway::{
    application::render::{METRIC_RENDER_DURATION_MS, METRIC_RENDER_TOTAL},
    infra::{
        artifacts::METRIC_ARTIFACT_SWEPT,
        browser::session::{METRIC_BROWSER_LAUNCH, METRIC_BROWSER_READY},
    },
};
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;
use tower::ServiceExt;

use support::{FakeLauncher, PageBehavior, pipeline_with, router_with};

#[tokio::test]
async fn render_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = pipeline_with(FakeLauncher::new(PageBehavior::default()), dir.path());
    let router = router_with(pipeline.clone(), false);

    for format in ["svg", "url", "gif"] {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/render")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "mermaid": "graph TD\n A --> B", "format": format }).to_string(),
            ))
            .expect("request");
        let response = router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        let expected = if format == "gif" {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::OK
        };
        assert_eq!(response.status(), expected, "{format}");
    }

    let stale = dir.path().join("mermaid-0-000000000000.png");
    std::fs::write(&stale, b"old").expect("write stale artifact");
    let store = pipeline.artifacts().clone();
    let report = store.sweep_at(std::time::SystemTime::now() + std::time::Duration::from_secs(7200));
    assert_eq!(report.removed, 2);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        METRIC_RENDER_TOTAL,
        METRIC_RENDER_DURATION_MS,
        METRIC_BROWSER_LAUNCH,
        METRIC_BROWSER_READY,
        METRIC_ARTIFACT_SWEPT,
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
