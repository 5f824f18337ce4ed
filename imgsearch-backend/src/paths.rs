//! Where the backend and the frontend bundle live on disk.
//!
//! Packaged builds ship a self-contained backend executable and the built
//! frontend under the resource directory. Development checkouts run the API
//! module with the project's virtualenv interpreter and load the frontend
//! from the Vite build output.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::BackendDescriptor;

const BUNDLED_BACKEND_DIR: &str = "python_backend";
const BUNDLED_BACKEND_NAME: &str = "local-image-search-api";
const VENV_DIR: &str = "env";
const PACKAGED_FRONTEND_DIR: &str = "frontend";
const DEV_FRONTEND_DIR: &str = "frontend-vite/dist";
const FRONTEND_ENTRY: &str = "index.html";

/// Root directories the resolver searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLayout {
    /// Resources shipped next to a packaged shell
    pub resource_dir: PathBuf,
    /// Project root of a development checkout
    pub app_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    layout: ResourceLayout,
    port: u16,
}

impl PathResolver {
    pub fn new(layout: ResourceLayout, port: u16) -> Self {
        Self { layout, port }
    }

    pub fn layout(&self) -> &ResourceLayout {
        &self.layout
    }

    /// Locate the backend for the given packaging mode.
    ///
    /// `None` is a normal outcome: the shell then runs without a backend.
    pub fn resolve_backend(&self, packaged: bool) -> Option<BackendDescriptor> {
        if packaged {
            let executable = self.bundled_executable();
            if executable.is_file() {
                return Some(BackendDescriptor::native(executable, self.port));
            }
            debug!("No bundled backend at {}", executable.display());
        } else {
            let interpreter = self.venv_interpreter();
            if interpreter.is_file() {
                return Some(BackendDescriptor::interpreted(
                    interpreter,
                    self.layout.app_dir.clone(),
                    self.port,
                ));
            }
            debug!("No virtualenv interpreter at {}", interpreter.display());
        }
        None
    }

    /// Entry page of the frontend bundle. Existence is checked when loading.
    pub fn resolve_frontend_asset(&self, packaged: bool) -> PathBuf {
        if packaged {
            self.layout
                .resource_dir
                .join(PACKAGED_FRONTEND_DIR)
                .join(FRONTEND_ENTRY)
        } else {
            self.layout
                .app_dir
                .join(DEV_FRONTEND_DIR)
                .join(FRONTEND_ENTRY)
        }
    }

    fn bundled_executable(&self) -> PathBuf {
        self.layout.resource_dir.join(BUNDLED_BACKEND_DIR).join(format!(
            "{}{}",
            BUNDLED_BACKEND_NAME,
            std::env::consts::EXE_SUFFIX
        ))
    }

    fn venv_interpreter(&self) -> PathBuf {
        venv_interpreter(&self.layout.app_dir.join(VENV_DIR))
    }
}

#[cfg(windows)]
fn venv_interpreter(venv: &Path) -> PathBuf {
    venv.join("Scripts").join("python.exe")
}

#[cfg(not(windows))]
fn venv_interpreter(venv: &Path) -> PathBuf {
    venv.join("bin").join("python")
}
