//! Shared test utilities for imgsearch-shell integration tests.

// Each test file compiles separately, so not all helpers are used in each binary
#![allow(dead_code)]

use async_trait::async_trait;
use imgsearch_backend::{
    BackendDescriptor, HealthCheck, ProbeFailure, ProcessHandle, ProcessSupervisor,
    ResourceLayout, SpawnError, Supervisor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Printed by the stub backend once it is "listening".
pub const READY_LINE: &str = "INFO:     Application startup complete.";

/// Test context with a throwaway resource and app directory
pub struct TestContext {
    pub temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn layout(&self) -> ResourceLayout {
        ResourceLayout {
            resource_dir: self.temp_dir.path().join("resources"),
            app_dir: self.temp_dir.path().join("app"),
        }
    }

    /// Install an executable at the packaged backend location
    pub fn install_packaged_backend(&self, content: &str) -> PathBuf {
        let path = self.layout().resource_dir.join("python_backend").join(format!(
            "local-image-search-api{}",
            std::env::consts::EXE_SUFFIX
        ));
        write_file(&path, content);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("Failed to set permissions");
        }
        path
    }

    /// Backend that reports readiness on stdout and then idles
    pub fn install_ready_backend(&self) -> PathBuf {
        self.install_packaged_backend(&format!("#!/bin/sh\necho \"{READY_LINE}\"\nexec sleep 30\n"))
    }

    pub fn install_packaged_frontend(&self) -> PathBuf {
        let path = self.layout().resource_dir.join("frontend").join("index.html");
        write_file(&path, "<!doctype html><title>Local Image Search</title>");
        path
    }
}

fn write_file(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().expect("path has a parent"))
        .expect("Failed to create parent dir");
    std::fs::write(path, content).expect("Failed to write file");
}

/// Real supervisor that counts calls
#[derive(Default)]
pub struct CountingSupervisor {
    inner: ProcessSupervisor,
    pub spawns: AtomicUsize,
    pub terminates: AtomicUsize,
}

impl CountingSupervisor {
    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Supervisor for CountingSupervisor {
    async fn spawn(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<ProcessHandle>, SpawnError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.inner.spawn(descriptor).await
    }

    fn terminate(&self, handle: &ProcessHandle) {
        self.terminates.fetch_add(1, Ordering::SeqCst);
        self.inner.terminate(handle)
    }
}

/// Supervisor whose launches always fail
#[derive(Default)]
pub struct FailingSupervisor {
    pub spawns: AtomicUsize,
}

#[async_trait]
impl Supervisor for FailingSupervisor {
    async fn spawn(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<ProcessHandle>, SpawnError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        Err(SpawnError::Launch {
            executable: descriptor.executable().to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        })
    }

    fn terminate(&self, _handle: &ProcessHandle) {
        panic!("nothing was spawned");
    }
}

/// Health check that never passes, so only stdout or the grace timer can win
pub struct NeverHealthy;

#[async_trait]
impl HealthCheck for NeverHealthy {
    async fn check(&self) -> Result<(), ProbeFailure> {
        Err(ProbeFailure::Connect {
            url: "http://127.0.0.1:8000/health".to_string(),
        })
    }
}
