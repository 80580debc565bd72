//! Progress bus
//!
//! Live, per-job streams of progress frames for a server-push transport.

pub mod bus;
pub mod events;
pub mod job;

pub use bus::ProgressBus;
pub use events::{BufferingSink, DownloadProgress, ProgressEvent, ProgressSink, HEARTBEAT_FRAME};
pub use job::JobChannel;
