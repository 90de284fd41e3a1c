//! Browser capability seam
//!
//! The capture operations only talk to these traits, so the Chromium backend
//! can be swapped for a fake in tests.

use crate::{ClipRect, OutputFormat, Result, WaitUntil};
use async_trait::async_trait;

/// Parameters of a single screenshot call
#[derive(Debug, Clone, PartialEq)]
pub struct ShotSettings {
    pub clip: Option<ClipRect>,
    pub format: OutputFormat,
    /// Only meaningful for lossy formats
    pub quality: Option<u8>,
    pub full_page: bool,
}

/// Starts browser processes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// A running browser owned by exactly one capture.
#[async_trait]
pub trait BrowserSession: Send {
    async fn new_page(&mut self) -> Result<Box<dyn PageSession>>;

    /// Shuts the browser process down. Must be safe to call once per session.
    async fn close(&mut self) -> Result<()>;
}

/// An open tab.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn navigate(&self, address: &str, wait_until: WaitUntil) -> Result<()>;

    /// Bounding box of the first element matching `selector`, `None` on no match.
    async fn bounding_box(&self, selector: &str) -> Result<Option<ClipRect>>;

    /// The visible viewport in page coordinates.
    async fn viewport(&self) -> Result<ClipRect>;

    /// Encoded image bytes in `settings.format`.
    async fn screenshot(&self, settings: &ShotSettings) -> Result<Vec<u8>>;

    async fn close(&self) -> Result<()>;
}
