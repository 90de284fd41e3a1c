//! Configuration management with serde serialization/deserialization
//!
//! This module provides the configuration structures for the capture
//! operations: browser launch settings, navigation wait conditions, the
//! selector fallback policy, per-stage timeouts and the static server.

use crate::CaptureError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
///
/// Every field has a default, so a JSON file only needs the keys it changes.
///
/// # Examples
///
/// ```rust
/// use page_capture::{Config, SelectorFallback};
///
/// let config = Config {
///     selector_fallback: SelectorFallback::Viewport,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Browser viewport used for every page
    pub viewport: Viewport,

    /// Custom User-Agent string (default: Chrome default)
    pub user_agent: Option<String>,

    /// Navigation wait condition when a request does not name one (default: load)
    pub wait_until: WaitUntil,

    /// What capture-from-URL does when its selector matches nothing
    ///
    /// `CallerClip` falls back to the caller-supplied clip (or no clip),
    /// `Viewport` falls back to the full visible viewport.
    pub selector_fallback: SelectorFallback,

    /// Padding added on each side of an element's bounding box (default: 0)
    pub element_padding: f64,

    /// Capture the whole scrollable page when no clip applies (default: false)
    pub full_page: bool,

    /// Quality for lossy output formats, 1-100 (default: 90)
    pub jpeg_quality: u8,

    /// Upper bound on starting the browser process
    pub launch_timeout: Duration,

    /// Upper bound on navigation including the wait condition
    pub navigation_timeout: Duration,

    /// Upper bound on each in-page script evaluation
    pub evaluate_timeout: Duration,

    /// Upper bound on the screenshot call and the file write
    pub capture_timeout: Duration,

    /// Upper bound on closing the page and the browser
    pub teardown_timeout: Duration,

    /// Ephemeral static server used for local captures
    pub server: ServerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chrome_path: None,
            viewport: Viewport::default(),
            user_agent: None,
            wait_until: WaitUntil::Load,
            selector_fallback: SelectorFallback::CallerClip,
            element_padding: 0.0,
            full_page: false,
            jpeg_quality: 90,
            launch_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(30),
            evaluate_timeout: Duration::from_secs(10),
            capture_timeout: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(5),
            server: ServerSettings::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(CaptureError::ConfigurationError(
                "Viewport dimensions must be greater than 0".to_string(),
            ));
        }

        if !(self.viewport.device_scale_factor > 0.0) {
            return Err(CaptureError::ConfigurationError(
                "Device scale factor must be greater than 0".to_string(),
            ));
        }

        let timeouts = [
            ("launch_timeout", self.launch_timeout),
            ("navigation_timeout", self.navigation_timeout),
            ("evaluate_timeout", self.evaluate_timeout),
            ("capture_timeout", self.capture_timeout),
            ("teardown_timeout", self.teardown_timeout),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, limit)| limit.is_zero()) {
            return Err(CaptureError::ConfigurationError(format!(
                "{name} must be greater than 0"
            )));
        }

        if !self.element_padding.is_finite() || self.element_padding < 0.0 {
            return Err(CaptureError::ConfigurationError(
                "Element padding must be a finite, non-negative number".to_string(),
            ));
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(CaptureError::ConfigurationError(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        Ok(())
    }

    /// Loads and validates a JSON configuration file.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Browser viewport configuration
///
/// # Examples
///
/// ```rust
/// use page_capture::Viewport;
///
/// let mobile = Viewport {
///     width: 375,
///     height: 667,
///     device_scale_factor: 2.0,
///     mobile: true,
/// };
/// assert!(mobile.mobile);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1920)
    pub width: u32,

    /// Viewport height in pixels (default: 1080)
    pub height: u32,

    /// Device pixel ratio (default: 1.0)
    ///
    /// Clip rectangles are in CSS pixels, so values other than 1.0 scale the
    /// pixel size of the written image.
    pub device_scale_factor: f64,

    /// Whether to emulate a mobile device (default: false)
    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

/// Navigation-completion signal to wait for before a page counts as loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    /// The `load` event fired
    Load,
    /// The `DOMContentLoaded` event fired
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    /// Load, then no requests in flight for 500 ms
    #[serde(rename = "networkidle0")]
    NetworkIdle0,
    /// Load, then at most two requests in flight for 500 ms
    #[serde(rename = "networkidle2")]
    NetworkIdle2,
}

impl Default for WaitUntil {
    fn default() -> Self {
        Self::Load
    }
}

impl FromStr for WaitUntil {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "load" => Ok(Self::Load),
            "domcontentloaded" => Ok(Self::DomContentLoaded),
            "networkidle" | "networkidle0" => Ok(Self::NetworkIdle0),
            "networkidle2" => Ok(Self::NetworkIdle2),
            other => Err(CaptureError::ConfigurationError(format!(
                "Unknown wait condition: {other}"
            ))),
        }
    }
}

/// Behaviour of capture-from-URL when its selector matches no element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorFallback {
    /// Use the caller-supplied clip, or capture unclipped when there is none
    CallerClip,
    /// Clip to the full visible viewport
    Viewport,
}

impl Default for SelectorFallback {
    fn default() -> Self {
        Self::CallerClip
    }
}

impl FromStr for SelectorFallback {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "caller-clip" | "caller_clip" | "clip" => Ok(Self::CallerClip),
            "viewport" => Ok(Self::Viewport),
            other => Err(CaptureError::ConfigurationError(format!(
                "Unknown selector fallback: {other}"
            ))),
        }
    }
}

/// Supported output image formats
///
/// The format is picked from the output path's extension, the way the
/// browser's own screenshot helpers do it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum OutputFormat {
    /// PNG format - lossless compression, best quality
    Png,
    /// JPEG format - lossy compression, smaller files
    Jpeg,
    /// WebP format - modern compression, good balance of size and quality
    Webp,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => Self::Jpeg,
            Some("webp") => Self::Webp,
            _ => Self::Png,
        }
    }

    pub fn is_lossy(&self) -> bool {
        !matches!(self, Self::Png)
    }
}

/// Settings for the ephemeral static file server
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the server binds to (default: 127.0.0.1)
    pub bind_address: IpAddr,

    /// How long `stop` waits for open connections before aborting (default: 2s)
    pub shutdown_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Generate Chrome command-line arguments based on configuration
///
/// The profile directory is not part of these; it goes through
/// [`create_browser_config`] so chromiumoxide does not add its own.
///
/// # Examples
///
/// ```rust
/// use page_capture::{Config, get_chrome_args};
///
/// let config = Config::default();
/// let args = get_chrome_args(&config);
/// assert!(args.contains(&"--headless".to_string()));
/// ```
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
        "--disable-process-singleton-dialog".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(
    config: &Config,
    user_data_dir: &Path,
) -> Result<chromiumoxide::browser::BrowserConfig, CaptureError> {
    use chromiumoxide::browser::BrowserConfig;
    use chromiumoxide::handler::viewport::Viewport as ChromeViewport;

    let viewport = ChromeViewport {
        width: config.viewport.width,
        height: config.viewport.height,
        device_scale_factor: Some(config.viewport.device_scale_factor),
        emulating_mobile: config.viewport.mobile,
        is_landscape: config.viewport.width > config.viewport.height,
        has_touch: config.viewport.mobile,
    };

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .viewport(viewport)
        .user_data_dir(user_data_dir)
        .args(get_chrome_args(config));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(CaptureError::LaunchFailed)
}
