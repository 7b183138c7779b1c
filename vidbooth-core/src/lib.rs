pub mod config;
pub mod models;
pub mod qr;
pub mod store;

pub use config::VidboothConfig;
pub use models::session::{RecordingSession, SessionStatus};
pub use qr::{PngQrEncoder, QrEncoder, QrError};
pub use store::SessionStore;
