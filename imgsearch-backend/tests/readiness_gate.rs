//! Readiness gate against real processes and a real health endpoint.
#![cfg(unix)]

mod common;

use common::*;
use imgsearch_backend::{
    HttpHealthCheck, ProcessSupervisor, ReadinessConfig, ReadinessGate, ReadySignal, Supervisor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

fn unreachable_origin() -> Url {
    // Port 9 (discard) is closed on test machines; connections are refused.
    Url::parse("http://127.0.0.1:9/").unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stdout_marker_resolves_gate() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script(
                "backend.sh",
                "#!/bin/sh\necho 'INFO:     Started server process'\nsleep 0.1\necho 'INFO:     Uvicorn running on http://127.0.0.1:8000 (Press CTRL+C to quit)'\nexec sleep 30\n",
            )
            .await;
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();

        let check = HttpHealthCheck::for_origin(&unreachable_origin(), Duration::from_secs(2))
            .unwrap();
        let readiness = ReadinessGate::new(ReadinessConfig::default())
            .wait(&handle, Arc::new(check))
            .await;

        match readiness.signal {
            ReadySignal::StdoutMarker { line } => assert!(line.contains("Uvicorn running")),
            other => panic!("expected a stdout marker, got {:?}", other),
        }
        assert!(readiness.elapsed < Duration::from_secs(3));

        supervisor.terminate(&handle);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_endpoint_resolves_silent_backend() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\nexec sleep 30\n")
            .await;
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();
        let (origin, _server) = spawn_health_server(2).await;

        let config = ReadinessConfig {
            probe_interval_ms: 50,
            grace_timeout_ms: 10_000,
            ..Default::default()
        };
        let check = HttpHealthCheck::for_origin(&origin, config.probe_timeout()).unwrap();
        let readiness = ReadinessGate::new(config).wait(&handle, Arc::new(check)).await;

        assert_eq!(readiness.signal, ReadySignal::HealthCheck { attempt: 3 });

        supervisor.terminate(&handle);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_grace_timer_for_unresponsive_backend() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\necho loading models\nexec sleep 30\n")
            .await;
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();

        let config = ReadinessConfig {
            grace_timeout_ms: 300,
            ..Default::default()
        };
        let check =
            HttpHealthCheck::for_origin(&unreachable_origin(), config.probe_timeout()).unwrap();
        let readiness = ReadinessGate::new(config).wait(&handle, Arc::new(check)).await;

        assert_eq!(readiness.signal, ReadySignal::GraceTimer);
        assert!(readiness.elapsed >= Duration::from_millis(300));

        supervisor.terminate(&handle);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_marker_on_stderr_does_not_resolve_gate() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script(
                "backend.sh",
                "#!/bin/sh\necho 'INFO:     Application startup complete.' >&2\nexec sleep 30\n",
            )
            .await;
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();

        let config = ReadinessConfig {
            grace_timeout_ms: 300,
            ..Default::default()
        };
        let check =
            HttpHealthCheck::for_origin(&unreachable_origin(), config.probe_timeout()).unwrap();
        let readiness = ReadinessGate::new(config).wait(&handle, Arc::new(check)).await;

        assert_eq!(readiness.signal, ReadySignal::GraceTimer);

        // The line still reached the stderr stream
        let mut stderr = handle.take_stderr_lines().expect("stderr available");
        assert_eq!(
            stderr.next_line().await.as_deref(),
            Some("INFO:     Application startup complete.")
        );

        supervisor.terminate(&handle);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
    })
    .await
    .expect("Test timed out");
}
