//! QR encoding collaborator.
//!
//! The endpoint layer only ever sees the `QrEncoder` trait; the production
//! implementation renders a PNG via the `qrcode` crate and returns a
//! `data:image/png;base64,...` payload the kiosk display can drop straight
//! into an `<img>` tag. Tests substitute mock encoders through the trait.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Prefix of every successfully rendered payload.
pub const DATA_URL_PREFIX: &str = "data:image/png;base64,";

// ============================================================================
// QrEncoder trait
// ============================================================================

/// Abstraction over QR rendering providers.
#[async_trait]
pub trait QrEncoder: Send + Sync {
    /// Render `url` into a base64 PNG data URL.
    async fn encode(&self, url: &str) -> Result<String, QrError>;

    /// Encoder name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum QrError {
    #[error("QR encoding failed: {0}")]
    Encode(String),

    #[error("PNG rendering failed: {0}")]
    Render(String),
}

// ============================================================================
// PNG implementation
// ============================================================================

/// Default encoder: `qrcode` matrix → luma PNG → base64 data URL.
#[derive(Debug, Clone, Default)]
pub struct PngQrEncoder;

impl PngQrEncoder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QrEncoder for PngQrEncoder {
    async fn encode(&self, url: &str) -> Result<String, QrError> {
        let code = qrcode::QrCode::new(url.as_bytes())
            .map_err(|e| QrError::Encode(e.to_string()))?;

        // 240px minimum: scannable from a phone at arm's length
        let luma = code
            .render::<image::Luma<u8>>()
            .min_dimensions(240, 240)
            .build();

        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(luma)
            .write_to(
                &mut std::io::Cursor::new(&mut png),
                image::ImageFormat::Png,
            )
            .map_err(|e| QrError::Render(e.to_string()))?;

        Ok(format!("{}{}", DATA_URL_PREFIX, STANDARD.encode(&png)))
    }

    fn name(&self) -> &str {
        "png"
    }
}
