//! Upload receiver — multipart video receipt for stop-recording.
//!
//! Accepts the single `video` field, constrained to `video/*` MIME types and
//! a configurable byte cap (100 MiB by default). Accepted payloads stream to
//! `<upload_dir>/video-<millis>-<rand>.mp4`; the client's own filename is
//! ignored and the extension is always `.mp4`. A request with no `video`
//! field is not an error — the kiosk is allowed to close a session without a
//! capture, and the caller completes it with `videoPath: null`.
//!
//! Rejections and IO failures never leave partial files behind.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, Multipart, MultipartError};
use chrono::Utc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// The one multipart field the kiosk device sends.
pub const VIDEO_FIELD: &str = "video";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Only video files are allowed (got {0})")]
    UnsupportedType(String),

    #[error("Video exceeds the {limit_bytes} byte upload limit")]
    TooLarge { limit_bytes: u64 },

    #[error("Malformed upload payload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Failed to store video: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Rejections are the caller's fault (400); storage failures are ours.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, UploadError::Io(_))
    }
}

/// A video accepted and persisted by the receiver.
#[derive(Debug, Clone)]
pub struct StoredVideo {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Drain the multipart stream, persisting the first `video` field found.
/// Returns `Ok(None)` when the request carried no video at all.
pub async fn receive_video(
    mut multipart: Multipart,
    dir: &Path,
    max_bytes: u64,
) -> Result<Option<StoredVideo>, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or("").to_string();
        if !content_type.starts_with("video/") {
            let shown = if content_type.is_empty() {
                "unknown".to_string()
            } else {
                content_type
            };
            return Err(UploadError::UnsupportedType(shown));
        }

        let path = dir.join(unique_video_filename());
        match stream_field_to_file(field, &path, max_bytes).await {
            Ok(size_bytes) => {
                tracing::info!("Stored video {} ({} bytes)", path.display(), size_bytes);
                return Ok(Some(StoredVideo { path, size_bytes }));
            }
            Err(e) => {
                // Never leave a partial file behind
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
        }
    }

    Ok(None)
}

/// Collision-avoiding name: millisecond timestamp plus a random suffix,
/// always with the fixed `.mp4` extension.
pub fn unique_video_filename() -> String {
    format!(
        "video-{}-{}.mp4",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

async fn stream_field_to_file(
    mut field: Field<'_>,
    path: &Path,
    max_bytes: u64,
) -> Result<u64, UploadError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await? {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(UploadError::TooLarge {
                limit_bytes: max_bytes,
            });
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(written)
}
