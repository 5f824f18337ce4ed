//! Process lifecycle integration tests for ProcessSupervisor.
#![cfg(unix)]

mod common;

use common::*;
use imgsearch_backend::{ProcessState, ProcessSupervisor, SpawnError, Supervisor};
use std::time::Duration;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread")]
async fn test_stdout_lines_are_delivered() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\necho hello\necho world\nexec sleep 30\n")
            .await;
        let supervisor = ProcessSupervisor::new();

        let handle = supervisor
            .spawn(&ctx.script_backend(&script))
            .await
            .expect("Failed to spawn");
        let mut lines = handle.take_stdout_lines().expect("stdout available");

        assert_eq!(lines.next_line().await.as_deref(), Some("hello"));
        assert_eq!(lines.next_line().await.as_deref(), Some("world"));
        assert_eq!(handle.state(), ProcessState::Running);

        // Only the first caller gets the stream
        assert!(handle.take_stdout_lines().is_none());

        supervisor.terminate(&handle);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stderr_is_separate_from_stdout() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script(
                "backend.sh",
                "#!/bin/sh\necho to-stdout\necho to-stderr >&2\nexec sleep 30\n",
            )
            .await;
        let supervisor = ProcessSupervisor::new();

        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();
        let mut stdout = handle.take_stdout_lines().unwrap();
        let mut stderr = handle.take_stderr_lines().unwrap();

        assert_eq!(stdout.next_line().await.as_deref(), Some("to-stdout"));
        assert_eq!(stderr.next_line().await.as_deref(), Some("to-stderr"));

        supervisor.terminate(&handle);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unterminated_last_line_and_end_of_stream() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\nprintf 'partial'\n")
            .await;
        let supervisor = ProcessSupervisor::new();

        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();
        let mut lines = handle.take_stdout_lines().unwrap();

        assert_eq!(lines.next_line().await.as_deref(), Some("partial"));
        assert_eq!(lines.next_line().await, None);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_terminate_is_idempotent() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\nexec sleep 30\n")
            .await;
        let supervisor = ProcessSupervisor::new();

        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();
        supervisor.terminate(&handle);
        supervisor.terminate(&handle);

        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
        // Killed by SIGTERM, so no exit code
        assert_eq!(handle.state(), ProcessState::Exited { code: None });

        supervisor.terminate(&handle);
        assert_eq!(handle.state(), ProcessState::Exited { code: None });
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exit_code_is_captured() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\necho crashing >&2\nexit 3\n")
            .await;
        let supervisor = ProcessSupervisor::new();

        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();
        let state = handle.exited().await;

        assert_eq!(state, ProcessState::Exited { code: Some(3) });
        assert_eq!(handle.exit_code(), Some(3));
        assert!(supervisor.current().is_none());

        // Terminating an exited process is a no-op
        supervisor.terminate(&handle);
        assert_eq!(handle.exit_code(), Some(3));
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_live_backend() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\nexec sleep 30\n")
            .await;
        let supervisor = ProcessSupervisor::new();
        let descriptor = ctx.script_backend(&script);

        let first = supervisor.spawn(&descriptor).await.unwrap();
        match supervisor.spawn(&descriptor).await {
            Err(SpawnError::AlreadyRunning { pid }) => assert_eq!(pid, first.pid()),
            other => panic!("expected AlreadyRunning, got {:?}", other),
        }

        supervisor.terminate(&first);
        assert!(wait_for_exit(&first, SHUTDOWN_TIMEOUT).await);

        let second = supervisor.spawn(&descriptor).await.expect("respawn after exit");
        assert_ne!(first.pid(), second.pid());
        supervisor.terminate(&second);
        assert!(wait_for_exit(&second, SHUTDOWN_TIMEOUT).await);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_executable_fails_to_launch() {
    let ctx = TestContext::new();
    let supervisor = ProcessSupervisor::new();
    let descriptor = ctx.script_backend(&ctx.temp_path().join("does-not-exist"));

    match supervisor.spawn(&descriptor).await {
        Err(SpawnError::Launch { executable, .. }) => {
            assert_eq!(executable, ctx.temp_path().join("does-not-exist"))
        }
        other => panic!("expected a launch failure, got {:?}", other),
    }
    assert!(supervisor.current().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pid_file_lifecycle() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\nexec sleep 30\n")
            .await;
        let supervisor = ProcessSupervisor::new().with_pid_file(ctx.pid_file());

        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();
        let recorded = std::fs::read_to_string(ctx.pid_file()).expect("PID file written");
        assert_eq!(recorded, format!("{}\n{}\n", handle.pid(), script.display()));

        supervisor.terminate(&handle);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
        assert!(!ctx.pid_file().exists(), "PID file should be removed on exit");
    })
    .await
    .expect("Test timed out");
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn test_slow_leftover_backend_exits_before_spawn() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        // Takes a second to wind down after SIGTERM, like a server draining connections
        let old_backend = ctx
            .create_script(
                "old-backend.sh",
                "#!/bin/sh\ntrap 'sleep 1; exit 0' TERM\ntouch trapped\nwhile true; do sleep 0.1; done\n",
            )
            .await;
        let mut leftover = tokio::process::Command::new(&old_backend)
            .current_dir(ctx.temp_path())
            .kill_on_drop(true)
            .spawn()
            .expect("Failed to spawn leftover");
        assert!(wait_for_file(&ctx.temp_path().join("trapped"), STARTUP_TIMEOUT).await);
        std::fs::write(
            ctx.pid_file(),
            format!("{}\n{}\n", leftover.id().unwrap(), old_backend.display()),
        )
        .unwrap();

        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\nexec sleep 30\n")
            .await;
        let supervisor = ProcessSupervisor::new().with_pid_file(ctx.pid_file());
        let started = std::time::Instant::now();
        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();

        // Already gone by the time the new backend exists
        let status = leftover
            .try_wait()
            .unwrap()
            .expect("leftover backend should have exited before the new one started");
        assert!(status.success(), "leftover should exit through its TERM handler");
        assert!(started.elapsed() >= Duration::from_millis(900));

        let recorded = std::fs::read_to_string(ctx.pid_file()).unwrap();
        assert_eq!(recorded, format!("{}\n{}\n", handle.pid(), script.display()));

        supervisor.terminate(&handle);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reused_pid_is_left_alone() {
    timeout(TEST_TIMEOUT, async {
        let ctx = TestContext::new();
        let script = ctx
            .create_script("backend.sh", "#!/bin/sh\nexec sleep 30\n")
            .await;
        // The recorded PID now belongs to a program that is not the backend
        let mut unrelated = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .expect("Failed to spawn unrelated process");
        std::fs::write(
            ctx.pid_file(),
            format!("{}\n{}\n", unrelated.id().unwrap(), script.display()),
        )
        .unwrap();

        let supervisor = ProcessSupervisor::new().with_pid_file(ctx.pid_file());
        let handle = supervisor.spawn(&ctx.script_backend(&script)).await.unwrap();

        assert!(
            unrelated.try_wait().unwrap().is_none(),
            "unrelated process must not be signalled"
        );
        let recorded = std::fs::read_to_string(ctx.pid_file()).unwrap();
        assert_eq!(recorded, format!("{}\n{}\n", handle.pid(), script.display()));

        supervisor.terminate(&handle);
        assert!(wait_for_exit(&handle, SHUTDOWN_TIMEOUT).await);
        unrelated.kill().await.unwrap();
    })
    .await
    .expect("Test timed out");
}
