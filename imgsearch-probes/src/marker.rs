use futures::{Stream, StreamExt};
use tracing::debug;

/// Lines the backend prints to stdout once it accepts connections.
pub const DEFAULT_MARKERS: &[&str] = &["Uvicorn running", "Application startup complete"];

/// Case-insensitive substring matcher for startup lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdoutMarkers {
    needles: Vec<String>,
}

impl StdoutMarkers {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let needles = markers
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { needles }
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }

    pub fn matches(&self, line: &str) -> bool {
        let line = line.to_lowercase();
        self.needles.iter().any(|needle| line.contains(needle))
    }

    /// Consume `lines` until one matches, returning that line.
    ///
    /// Returns `None` when the stream ends first (the process closed stdout).
    pub async fn scan<S>(&self, lines: &mut S) -> Option<String>
    where
        S: Stream<Item = String> + Unpin,
    {
        if self.is_empty() {
            return None;
        }
        while let Some(line) = lines.next().await {
            if self.matches(&line) {
                return Some(line);
            }
        }
        debug!("stdout closed before any startup marker appeared");
        None
    }
}

impl Default for StdoutMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_MARKERS)
    }
}
