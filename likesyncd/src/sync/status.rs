use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

/// Why a single item did not complete. Never aborts the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoResultFound,
    NetworkFailure,
    ConversionFailure,
    MetadataFailure,
    StoreFailure,
    Timeout,
    /// The session was cancelled before the item was dispatched.
    Cancelled,
    /// The worker running the item stopped unexpectedly.
    Internal,
}

impl FailureReason {
    fn describe(self) -> &'static str {
        match self {
            FailureReason::NoResultFound => "no matching track found",
            FailureReason::NetworkFailure => "search or download failed",
            FailureReason::ConversionFailure => "audio conversion failed",
            FailureReason::MetadataFailure => "could not write tags",
            FailureReason::StoreFailure => "could not record track in index",
            FailureReason::Timeout => "timed out",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Internal => "internal error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Searching,
    Converting,
    Tagging,
    Completed,
    Failed(FailureReason),
}

impl DownloadStatus {
    fn stage(self) -> u8 {
        match self {
            DownloadStatus::Pending => 0,
            DownloadStatus::Searching => 1,
            DownloadStatus::Converting => 2,
            DownloadStatus::Tagging => 3,
            DownloadStatus::Completed | DownloadStatus::Failed(_) => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed(_))
    }

    pub fn is_failed(self) -> bool {
        matches!(self, DownloadStatus::Failed(_))
    }

    /// Within one attempt a status only moves forward; terminal states are final.
    pub fn can_advance_to(self, next: DownloadStatus) -> bool {
        !self.is_terminal() && next.stage() > self.stage()
    }

    pub fn kind(self) -> StatusKind {
        match self {
            DownloadStatus::Pending => StatusKind::Pending,
            DownloadStatus::Searching => StatusKind::Downloading,
            DownloadStatus::Converting | DownloadStatus::Tagging => StatusKind::Processing,
            DownloadStatus::Completed => StatusKind::Completed,
            DownloadStatus::Failed(_) => StatusKind::Failed,
        }
    }

    pub fn message(self) -> String {
        match self {
            DownloadStatus::Pending => "Waiting".to_string(),
            DownloadStatus::Searching => "Searching for track...".to_string(),
            DownloadStatus::Converting => "Converting audio...".to_string(),
            DownloadStatus::Tagging => "Writing tags...".to_string(),
            DownloadStatus::Completed => "Done".to_string(),
            DownloadStatus::Failed(reason) => format!("Failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Processing,
    Downloading,
    Completed,
    Failed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub id: String,
    pub message: String,
    pub kind: StatusKind,
    #[serde(skip)]
    pub status: DownloadStatus,
}

impl StatusEvent {
    pub fn new(id: impl Into<String>, status: DownloadStatus) -> Self {
        Self {
            id: id.into(),
            message: status.message(),
            kind: status.kind(),
            status,
        }
    }
}

/// Producer half of the status channel. Cheap to clone; each worker holds
/// its own clone, so events of one id arrive in the order they were sent.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl StatusReporter {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, id: &str, status: DownloadStatus) {
        let Some(tx) = &self.tx else {
            return;
        };
        // A dropped consumer only loses progress display, never results.
        let _ = tx.send(StatusEvent::new(id, status));
    }
}

/// Consumer half of the status channel.
#[derive(Debug)]
pub struct StatusStream {
    rx: mpsc::UnboundedReceiver<StatusEvent>,
}

impl StatusStream {
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    pub fn drain(&mut self) -> Vec<StatusEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn status_channel() -> (StatusReporter, StatusStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StatusReporter { tx: Some(tx) }, StatusStream { rx })
}
