use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a recording session. Transitions once,
/// `Recording` → `Completed`, and never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Recording,
    Completed,
}

/// One kiosk recording-to-download transaction.
///
/// Field names serialize in camelCase — the kiosk displays and the phone
/// landing page consume this shape directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: Uuid,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub video_path: Option<String>,
    pub qr_code: Option<String>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SessionStatus::Recording,
            start_time: Utc::now(),
            end_time: None,
            video_path: None,
            qr_code: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Age relative to `now`, measured from `start_time`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.start_time
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}
