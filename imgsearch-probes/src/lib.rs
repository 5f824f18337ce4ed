pub mod error;
pub mod http_probe;
pub mod marker;
pub mod poller;

pub use error::ProbeFailure;
pub use http_probe::HttpHealthCheck;
pub use marker::StdoutMarkers;
pub use poller::{HealthCheck, HealthPoller, PollOutcome, PollSchedule};
