//! The presentation window seam.
//!
//! The controller only needs to open one window at a URL; whatever renders
//! it lives behind [`WindowHost`]. [`BrowserWindow`] hands the frontend to the
//! system browser, [`HeadlessWindow`] only checks and logs it.

use async_trait::async_trait;
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const WINDOW_TITLE: &str = "Local Image Search";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: WINDOW_TITLE.to_string(),
            width: 1200,
            height: 800,
            min_width: 800,
            min_height: 600,
        }
    }
}

/// Values handed to the frontend page before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendBridge {
    /// Host platform, using the names the frontend expects (`darwin`, `win32`, `linux`)
    pub platform: String,
    pub api_base_url: Url,
}

impl FrontendBridge {
    pub fn new(api_base_url: Url) -> Self {
        Self {
            platform: platform_name().to_string(),
            api_base_url,
        }
    }
}

pub fn platform_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// Whether closing the last window should quit the shell.
///
/// macOS apps keep running with no windows open.
pub fn quits_on_last_window_closed() -> bool {
    !cfg!(target_os = "macos")
}

#[derive(Debug, Error, Diagnostic)]
pub enum WindowError {
    #[error("frontend asset not found: {}", path.display())]
    #[diagnostic(
        code(imgsearch::window::missing_asset),
        help("build the frontend or run from a packaged install")
    )]
    MissingAsset { path: PathBuf },

    #[error("cannot load {url}: unsupported scheme")]
    #[diagnostic(code(imgsearch::window::unsupported_target))]
    UnsupportedTarget { url: Url },

    #[error("failed to load {url}: {reason}")]
    #[diagnostic(code(imgsearch::window::load))]
    Load { url: Url, reason: String },
}

#[async_trait]
pub trait WindowHost: Send {
    /// Open (or navigate) the main window to `target`.
    async fn open(
        &mut self,
        options: &WindowOptions,
        bridge: &FrontendBridge,
        target: &Url,
    ) -> Result<(), WindowError>;
}

/// Check that `target` is something a window can load.
async fn check_target(target: &Url) -> Result<(), WindowError> {
    match target.scheme() {
        "file" => {
            let path = target.to_file_path().map_err(|()| WindowError::Load {
                url: target.clone(),
                reason: "not a local path".to_string(),
            })?;
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(WindowError::MissingAsset { path });
            }
            Ok(())
        }
        "http" | "https" => Ok(()),
        _ => Err(WindowError::UnsupportedTarget {
            url: target.clone(),
        }),
    }
}

/// `target` with the bridge values appended to its query string.
///
/// A page opened in a browser cannot have globals injected, so the frontend
/// reads `platform` and `apiBaseUrl` from its own location instead.
pub fn bridged_url(target: &Url, bridge: &FrontendBridge) -> Url {
    let mut url = target.clone();
    url.query_pairs_mut()
        .append_pair("platform", &bridge.platform)
        .append_pair("apiBaseUrl", bridge.api_base_url.as_str());
    url
}

/// Shows the frontend in the user's default browser.
///
/// Browsers do not report when a tab closes, so this host never produces
/// [`crate::ShutdownTrigger::AllWindowsClosed`]; the shell quits on a signal.
#[derive(Debug, Default)]
pub struct BrowserWindow {
    loaded: Option<Url>,
}

impl BrowserWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last URL handed to the browser, bridge values included.
    pub fn loaded(&self) -> Option<&Url> {
        self.loaded.as_ref()
    }
}

#[async_trait]
impl WindowHost for BrowserWindow {
    async fn open(
        &mut self,
        options: &WindowOptions,
        bridge: &FrontendBridge,
        target: &Url,
    ) -> Result<(), WindowError> {
        check_target(target).await?;

        let url = bridged_url(target, bridge);
        debug!(
            "Browser ignores window size {}x{} for \"{}\"",
            options.width, options.height, options.title
        );
        info!("Opening {} in the default browser", url);

        let launch = url.to_string();
        // Launching may wait on a helper such as xdg-open.
        let opened = tokio::task::spawn_blocking(move || webbrowser::open(&launch))
            .await
            .map_err(|e| WindowError::Load {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        opened.map_err(|e| WindowError::Load {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        self.loaded = Some(url);
        Ok(())
    }
}

/// Window host without a UI toolkit.
///
/// Checks the target is loadable and logs it, so the shell can run on a
/// headless machine or under test.
#[derive(Debug, Default)]
pub struct HeadlessWindow {
    loaded: Option<Url>,
}

impl HeadlessWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last URL loaded successfully.
    pub fn loaded(&self) -> Option<&Url> {
        self.loaded.as_ref()
    }
}

#[async_trait]
impl WindowHost for HeadlessWindow {
    async fn open(
        &mut self,
        options: &WindowOptions,
        bridge: &FrontendBridge,
        target: &Url,
    ) -> Result<(), WindowError> {
        check_target(target).await?;

        debug!(
            "Frontend bridge: platform={} apiBaseUrl={}",
            bridge.platform, bridge.api_base_url
        );
        info!(
            "Opening window \"{}\" ({}x{}, min {}x{}) at {}",
            options.title,
            options.width,
            options.height,
            options.min_width,
            options.min_height,
            target
        );
        self.loaded = Some(target.clone());
        Ok(())
    }
}
