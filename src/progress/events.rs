//! Progress event taxonomy and server-push frame encoding

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::catalog::ModuleId;

/// Keep-alive comment frame; carries no event
pub const HEARTBEAT_FRAME: &str = ": heartbeat\n\n";

/// Model download state reported by an executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DownloadProgress {
    Percent(u8),
    Status(String),
}

/// Live state of one orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        module: ModuleId,
        percent: u8,
    },
    ResolvingDependency {
        module: ModuleId,
        parent: ModuleId,
    },
    ModelDownloading {
        module: ModuleId,
        model: String,
        progress: DownloadProgress,
    },
    Error {
        message: String,
    },
    Completed {
        module: ModuleId,
    },
    IdChanged {
        new_id: String,
    },
    Done,
}

impl ProgressEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Event name on the wire
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Progress { .. } | Self::ResolvingDependency { .. } | Self::Completed { .. } => {
                "module_processing"
            }
            Self::ModelDownloading { .. } => "download",
            Self::Error { .. } => "error",
            Self::IdChanged { .. } => "id_changed",
            Self::Done => "done",
        }
    }

    /// JSON body of the frame
    pub fn payload(&self) -> Value {
        match self {
            Self::Progress { module, percent } => {
                json!({ "module": module, "status": "running", "message": percent })
            }
            Self::ResolvingDependency { module, parent } => {
                json!({ "module": module, "status": "resolving_dependency", "message": parent })
            }
            Self::Completed { module } => {
                json!({ "module": module, "status": "completed", "message": 100 })
            }
            Self::ModelDownloading {
                module,
                model,
                progress,
            } => match progress {
                DownloadProgress::Percent(percent) => {
                    json!({ "module": module, "model": model, "percent": percent })
                }
                DownloadProgress::Status(status) => {
                    json!({ "module": module, "model": model, "status": status })
                }
            },
            Self::Error { message } => json!({ "message": message }),
            Self::IdChanged { new_id } => json!({ "new_id": new_id }),
            Self::Done => json!({}),
        }
    }

    /// `event: <tag>\ndata: <json>\n\n`
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.tag(), self.payload())
    }
}

/// Receives progress events for one job
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Collects events in memory
#[derive(Clone, Default)]
pub struct BufferingSink {
    events: Arc<parking_lot::RwLock<Vec<ProgressEvent>>>,
}

impl BufferingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.read().clone()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl ProgressSink for BufferingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_progress_frame() {
        let event = ProgressEvent::Progress {
            module: "vocal_instrumental".into(),
            percent: 42,
        };
        let frame = event.to_frame();
        assert!(frame.starts_with("event: module_processing\ndata: "));
        assert!(frame.ends_with("\n\n"));
        let data: Value = serde_json::from_str(
            frame
                .trim_end()
                .strip_prefix("event: module_processing\ndata: ")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            data,
            json!({ "module": "vocal_instrumental", "status": "running", "message": 42 })
        );
    }

    #[test]
    fn test_completed_payload_reports_full_progress() {
        let completed = ProgressEvent::Completed {
            module: "lead_backing".into(),
        };
        assert_eq!(completed.tag(), "module_processing");
        assert_eq!(
            completed.payload(),
            json!({ "module": "lead_backing", "status": "completed", "message": 100 })
        );
    }

    #[test]
    fn test_frame_tags() {
        let resolving = ProgressEvent::ResolvingDependency {
            module: "child".into(),
            parent: "root".into(),
        };
        assert_eq!(resolving.tag(), "module_processing");
        assert_eq!(resolving.payload()["status"], "resolving_dependency");
        assert_eq!(resolving.payload()["message"], "root");

        let download = ProgressEvent::ModelDownloading {
            module: "m".into(),
            model: "model.ckpt".into(),
            progress: DownloadProgress::Percent(10),
        };
        assert_eq!(download.tag(), "download");
        assert_eq!(download.payload()["percent"], 10);

        assert_eq!(ProgressEvent::error("boom").tag(), "error");
        assert_eq!(
            ProgressEvent::IdChanged { new_id: "p".into() }.to_frame(),
            "event: id_changed\ndata: {\"new_id\":\"p\"}\n\n"
        );
        assert_eq!(ProgressEvent::Done.to_frame(), "event: done\ndata: {}\n\n");
    }

    #[test]
    fn test_buffering_sink_keeps_order() {
        let sink = BufferingSink::new();
        sink.emit(ProgressEvent::Completed { module: "a".into() });
        sink.emit(ProgressEvent::Completed { module: "b".into() });
        assert_eq!(
            sink.events(),
            vec![
                ProgressEvent::Completed { module: "a".into() },
                ProgressEvent::Completed { module: "b".into() },
            ]
        );
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
