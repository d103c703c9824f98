//! Dispatch engine tests against in-process mock targets.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use load_engine::{DispatchEngine, RequestSpec, RunContext, RunSummary};
use serde_json::{json, Map, Value};
use test_utils::{assert_approx_eq, refused_url, Behavior, MockTarget};

fn body() -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("user".to_string(), json!("alice"));
    body
}

fn json_spec(url: &str) -> Arc<RequestSpec> {
    Arc::new(RequestSpec::structured("echo", url, body(), None).unwrap())
}

fn read_errors(ctx: &RunContext, summary: &RunSummary) -> Vec<Value> {
    let name = summary.error_file.as_ref().expect("error artifact");
    let raw = std::fs::read_to_string(ctx.artifact_dir().join(name)).unwrap();
    let doc: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["service_name"], summary.service_name);
    doc["errors"].as_array().unwrap().clone()
}

// ============================================================================
// Success paths
// ============================================================================

#[tokio::test]
async fn test_all_success_run() {
    let target = MockTarget::spawn(Behavior::Ok {
        delay: Duration::from_millis(2),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(5)).unwrap();

    let summary = engine
        .run(json_spec(&target.url("/api")), 5, 50, &ctx)
        .await
        .unwrap();

    assert_eq!(summary.success_count, 50);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(summary.total_requests, 50);
    assert_eq!(summary.concurrency, 5);
    assert!(summary.error_file.is_none());
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);

    assert!(summary.total_elapsed_secs > 0.0);
    assert!(summary.qps > 0.0);
    assert_approx_eq!(summary.qps, 50.0 / summary.total_elapsed_secs, 1e-6);

    assert!(summary.latency_min_secs <= summary.latency_avg_secs);
    assert!(summary.latency_avg_secs <= summary.latency_max_secs);

    assert_eq!(target.stats.requests(), 50);
    assert!(target.stats.max_in_flight() <= 5);
}

#[tokio::test]
async fn test_each_attempt_carries_its_own_correlation_id() {
    let target = MockTarget::spawn(Behavior::Ok {
        delay: Duration::ZERO,
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(5)).unwrap();

    engine
        .run(json_spec(&target.url("/api")), 4, 40, &ctx)
        .await
        .unwrap();

    let bodies = target.stats.bodies();
    assert_eq!(bodies.len(), 40);
    let ids: HashSet<String> = bodies
        .iter()
        .map(|b| b["bizno"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 40);
    assert!(bodies.iter().all(|b| b["user"] == "alice"));
}

#[tokio::test]
async fn test_binary_payload_is_sent_unchanged() {
    let target = MockTarget::spawn(Behavior::Ok {
        delay: Duration::ZERO,
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(5)).unwrap();
    let spec = Arc::new(
        RequestSpec::blob(
            "ocr",
            &target.url("/ocr"),
            Bytes::from_static(b"\x89PNG\r\n\x1a\n"),
            None,
        )
        .unwrap(),
    );

    let summary = engine.run(spec, 3, 12, &ctx).await.unwrap();
    assert_eq!(summary.success_count, 12);
    assert_eq!(target.stats.requests(), 12);
    // not JSON, so nothing was captured as a body
    assert!(target.stats.bodies().is_empty());
}

#[tokio::test]
async fn test_concurrency_above_total_issues_exact_count() {
    let target = MockTarget::spawn(Behavior::Ok {
        delay: Duration::from_millis(5),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(5)).unwrap();

    let summary = engine
        .run(json_spec(&target.url("/api")), 10, 3, &ctx)
        .await
        .unwrap();

    assert_eq!(summary.success_count + summary.failure_count, 3);
    assert_eq!(target.stats.requests(), 3);
}

// ============================================================================
// Concurrency bound
// ============================================================================

#[tokio::test]
async fn test_never_more_than_limit_in_flight() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(5)).unwrap();

    for limit in [1u32, 3, 8] {
        let target = MockTarget::spawn(Behavior::Ok {
            delay: Duration::from_millis(20),
        })
        .await;

        let summary = engine
            .run(json_spec(&target.url("/api")), limit, 24, &ctx)
            .await
            .unwrap();

        assert_eq!(summary.success_count, 24);
        assert_eq!(target.stats.requests(), 24);
        assert!(
            target.stats.max_in_flight() <= limit as usize,
            "limit {} but {} were in flight",
            limit,
            target.stats.max_in_flight()
        );
    }
}

#[tokio::test]
async fn test_single_worker_is_serial() {
    let target = MockTarget::spawn(Behavior::Ok {
        delay: Duration::from_millis(10),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(5)).unwrap();

    engine
        .run(json_spec(&target.url("/api")), 1, 10, &ctx)
        .await
        .unwrap();
    assert_eq!(target.stats.max_in_flight(), 1);
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_application_failures_are_recorded_with_body() {
    let target = MockTarget::spawn(Behavior::Status {
        status: 500,
        body: r#"{"error": "internal", "code": 5001}"#.to_string(),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(5)).unwrap();

    let summary = engine
        .run(json_spec(&target.url("/api")), 5, 30, &ctx)
        .await
        .unwrap();

    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.failure_count, 30);
    // application failures still produce latency samples
    assert!(summary.latency_max_secs > 0.0);

    let errors = read_errors(&ctx, &summary);
    assert_eq!(errors.len(), 30);
    for error in &errors {
        assert_eq!(error["status_code"], 500);
        assert_eq!(error["error_response"]["code"], 5001);
        assert!(error["request_info"]["body"]["bizno"]
            .as_str()
            .unwrap()
            .starts_with("BIZ"));
    }
}

#[tokio::test]
async fn test_raw_text_error_body_is_kept_verbatim() {
    let target = MockTarget::spawn(Behavior::Status {
        status: 404,
        body: "no such route".to_string(),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(5)).unwrap();

    let summary = engine
        .run(json_spec(&target.url("/missing")), 2, 4, &ctx)
        .await
        .unwrap();

    let errors = read_errors(&ctx, &summary);
    assert_eq!(errors.len(), 4);
    assert!(errors
        .iter()
        .all(|e| e["status_code"] == 404 && e["error_response"] == "no such route"));
}

#[tokio::test]
async fn test_non_200_success_class_counts_as_success() {
    let target = MockTarget::spawn(Behavior::Status {
        status: 201,
        body: "{}".to_string(),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(5)).unwrap();

    let summary = engine
        .run(json_spec(&target.url("/api")), 2, 6, &ctx)
        .await
        .unwrap();
    assert_eq!(summary.success_count, 6);
    assert!(summary.error_file.is_none());
}

#[tokio::test]
async fn test_refused_connections_become_transport_failures() {
    let url = refused_url().await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_secs(2)).unwrap();

    let summary = engine.run(json_spec(&url), 3, 9, &ctx).await.unwrap();

    assert_eq!(summary.failure_count, 9);
    assert_eq!(summary.success_count, 0);
    // transport failures are not latency samples
    assert_eq!(summary.latency_max_secs, 0.0);

    let errors = read_errors(&ctx, &summary);
    assert_eq!(errors.len(), 9);
    assert!(errors.iter().all(|e| e["status_code"] == 0));
    assert!(errors.iter().all(|e| e["error_response"].is_string()));
}

#[tokio::test]
async fn test_timeouts_are_recorded_per_attempt() {
    let target = MockTarget::spawn(Behavior::Hang {
        first: usize::MAX,
        delay: Duration::from_secs(10),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_millis(200)).unwrap();

    let summary = engine
        .run(json_spec(&target.url("/slow")), 5, 10, &ctx)
        .await
        .unwrap();

    assert_eq!(summary.failure_count, 10);
    assert_eq!(read_errors(&ctx, &summary).len(), 10);
    // five slots, two waves of timeouts
    assert!(summary.total_elapsed_secs < 5.0);
}

#[tokio::test]
async fn test_hung_attempt_does_not_block_siblings() {
    let target = MockTarget::spawn(Behavior::Hang {
        first: 1,
        delay: Duration::from_secs(10),
    })
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let ctx = RunContext::create(tmp.path()).unwrap();
    let engine = DispatchEngine::new(Duration::from_millis(500)).unwrap();

    let summary = engine
        .run(json_spec(&target.url("/api")), 4, 20, &ctx)
        .await
        .unwrap();

    assert_eq!(summary.success_count, 19);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(target.stats.requests(), 20);

    let errors = read_errors(&ctx, &summary);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["status_code"], 0);
}
