//! Shared test utilities for imgsearch-backend integration tests.

// Each test file compiles separately, so not all helpers are used in each binary
#![allow(dead_code)]

use imgsearch_backend::{BackendDescriptor, BackendKind, ProcessHandle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::fs;
use url::Url;

pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Test context that manages temp directories and cleanup
pub struct TestContext {
    pub temp_dir: TempDir,
    pub state_dir: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let state_dir = temp_dir.path().join("state");
        std::fs::create_dir_all(&state_dir).expect("Failed to create state dir");
        Self {
            temp_dir,
            state_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join("backend.pid")
    }

    /// Create an executable script in the temp directory
    pub async fn create_script(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, content)
            .await
            .expect("Failed to write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .expect("Failed to set permissions");
        }
        path
    }

    /// Descriptor that runs `script` with no arguments from the temp dir
    pub fn script_backend(&self, script: &Path) -> BackendDescriptor {
        BackendDescriptor::custom(
            script.to_path_buf(),
            BackendKind::NativeExecutable,
            vec![],
            self.temp_path().to_path_buf(),
        )
    }
}

/// Wait for a condition with exponential backoff
pub async fn wait_for_condition<F, Fut>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    let mut delay = Duration::from_millis(10);
    let max_delay = Duration::from_millis(500);

    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(max_delay);
    }
    false
}

/// Wait for the backend to be reported gone
pub async fn wait_for_exit(handle: &ProcessHandle, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, handle.exited()).await.is_ok()
}

/// Wait for a file to exist
pub async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let path = path.to_path_buf();
    wait_for_condition(|| async { path.exists() }, timeout).await
}

/// Minimal HTTP server answering the first `num_503` requests with 503
/// and every later one with 200.
pub async fn spawn_health_server(num_503: usize) -> (Url, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = Url::parse(&format!("http://{}/", addr)).unwrap();

    let handle = tokio::spawn(async move {
        let mut served = 0usize;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let mut buf = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;

            let response = if served < num_503 {
                "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            } else {
                "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            };
            let _ = tokio::io::AsyncWriteExt::write_all(&mut stream, response.as_bytes()).await;
            served += 1;
        }
    });

    (url, handle)
}
