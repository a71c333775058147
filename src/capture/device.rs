//! Capture device collaborators.
//!
//! Screen grabbing, encoding, and screenshot rendering live behind these
//! traits; the session only manages lifecycle and exclusive ownership.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{Result, TraqError};

/// Factory for exclusive capture streams. `open` acquires the device and the
/// returned stream owns it until dropped or finished.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn open(&self, output: &Path, fps: u32) -> Result<Box<dyn CaptureStream>>;
}

/// An open recording: one frame grabbed and encoded per call.
#[async_trait]
pub trait CaptureStream: Send {
    /// Grab and encode one frame. An error here means the device was lost or
    /// encoding failed; the session tears down in response.
    async fn record_frame(&mut self) -> Result<()>;

    /// Flush and close the output artifact.
    async fn finish(self: Box<Self>) -> Result<()>;
}

/// One-shot screenshot collaborator.
#[async_trait]
pub trait ScreenshotBackend: Send + Sync {
    async fn capture(&self, output: &Path) -> Result<()>;
}

/// Placeholder backend for builds without a platform capture integration.
/// Fails fast so the lifecycle error paths stay exercised.
pub struct DisabledCaptureBackend;

#[async_trait]
impl CaptureBackend for DisabledCaptureBackend {
    async fn open(&self, _output: &Path, _fps: u32) -> Result<Box<dyn CaptureStream>> {
        Err(TraqError::ResourceUnavailable(
            "no screen capture backend configured".to_string(),
        ))
    }
}

/// Placeholder screenshot backend; see [`DisabledCaptureBackend`].
pub struct DisabledScreenshotBackend;

#[async_trait]
impl ScreenshotBackend for DisabledScreenshotBackend {
    async fn capture(&self, _output: &Path) -> Result<()> {
        Err(TraqError::ResourceUnavailable(
            "no screenshot backend configured".to_string(),
        ))
    }
}
