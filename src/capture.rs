//! Capture operations
//!
//! All three capture sources share one pipeline: optionally start a static
//! server, launch a browser, navigate, optionally query the DOM for a clip,
//! capture, write the file, then tear everything down. Teardown runs on every
//! exit path, including timeouts and cancellation.

use crate::artifact::probe_dimensions;
use crate::metrics::{record_capture, record_clip_origin};
use crate::{
    BrowserEngine, BrowserSession, CaptureError, ChromiumEngine, ClipRect, Config, OutputFormat,
    PageSession, Result, SelectorFallback, ShotSettings, Stage, StaticServer, WaitUntil,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Which input drives a capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureSource {
    /// A remote (or `file://`) address
    Url {
        address: String,
        wait_until: Option<WaitUntil>,
        selector: Option<String>,
        clip: Option<ClipRect>,
        fallback: Option<SelectorFallback>,
    },
    /// A local directory served over an ephemeral HTTP server
    Path {
        root: PathBuf,
        clip: Option<ClipRect>,
    },
    /// A local directory, clipped to one element's bounding box
    Element { root: PathBuf, selector: String },
}

impl CaptureSource {
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureSource::Url { .. } => "url",
            CaptureSource::Path { .. } => "path",
            CaptureSource::Element { .. } => "element",
        }
    }

    fn local_root(&self) -> Option<&Path> {
        match self {
            CaptureSource::Url { .. } => None,
            CaptureSource::Path { root, .. } | CaptureSource::Element { root, .. } => Some(root),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub id: String,
    pub source: CaptureSource,
    pub output: PathBuf,
}

impl CaptureRequest {
    pub fn new(source: CaptureSource, output: impl Into<PathBuf>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            output: output.into(),
        }
    }
}

/// Optional parameters of a URL capture
#[derive(Debug, Clone, Default)]
pub struct UrlOptions {
    pub wait_until: Option<WaitUntil>,
    pub selector: Option<String>,
    pub clip: Option<ClipRect>,
    /// Overrides `Config::selector_fallback` for this call
    pub fallback: Option<SelectorFallback>,
}

/// Optional parameters of a local-path capture
#[derive(Debug, Clone, Default)]
pub struct PathOptions {
    pub clip: Option<ClipRect>,
}

/// Where the clip of a finished capture came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipOrigin {
    Selector,
    CallerClip,
    Viewport,
    Unclipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub request_id: String,
    pub kind: &'static str,
    pub output: PathBuf,
    pub clip: Option<ClipRect>,
    pub clip_origin: ClipOrigin,
    pub bytes_written: usize,
    /// Pixel size of the written image, when its header could be read
    pub dimensions: Option<(u32, u32)>,
    /// Port of the static server for local captures
    pub served_port: Option<u16>,
    pub duration: Duration,
    pub captured_at: DateTime<Utc>,
}

struct Shot {
    clip: Option<ClipRect>,
    clip_origin: ClipOrigin,
    bytes_written: usize,
    dimensions: Option<(u32, u32)>,
}

/// Runs capture requests against a browser engine
///
/// # Examples
///
/// ```rust,no_run
/// use page_capture::{Capturer, ChromiumEngine, Config, UrlOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let capturer = Capturer::new(ChromiumEngine::new(config.clone()), config);
///
///     let report = capturer
///         .from_url(
///             "https://example.com",
///             "example.png",
///             UrlOptions {
///                 selector: Some("h1".to_string()),
///                 ..Default::default()
///             },
///         )
///         .await?;
///     println!("Wrote {} bytes", report.bytes_written);
///     Ok(())
/// }
/// ```
pub struct Capturer<E> {
    engine: E,
    config: Config,
}

impl<E: BrowserEngine> Capturer<E> {
    pub fn new(engine: E, config: Config) -> Self {
        Self { engine, config }
    }

    pub async fn from_url(
        &self,
        address: &str,
        output: impl Into<PathBuf>,
        options: UrlOptions,
    ) -> Result<CaptureReport> {
        let source = CaptureSource::Url {
            address: address.to_string(),
            wait_until: options.wait_until,
            selector: options.selector,
            clip: options.clip,
            fallback: options.fallback,
        };
        self.capture(CaptureRequest::new(source, output)).await
    }

    pub async fn from_path(
        &self,
        root: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        options: PathOptions,
    ) -> Result<CaptureReport> {
        let source = CaptureSource::Path {
            root: root.into(),
            clip: options.clip,
        };
        self.capture(CaptureRequest::new(source, output)).await
    }

    pub async fn from_element(
        &self,
        root: impl Into<PathBuf>,
        selector: &str,
        output: impl Into<PathBuf>,
    ) -> Result<CaptureReport> {
        let source = CaptureSource::Element {
            root: root.into(),
            selector: selector.to_string(),
        };
        self.capture(CaptureRequest::new(source, output)).await
    }

    pub async fn capture(&self, request: CaptureRequest) -> Result<CaptureReport> {
        self.capture_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Runs one capture; cancelling `cancel` aborts the current stage and still
    /// tears down the browser and server.
    #[instrument(skip_all, fields(id = %request.id, kind = request.source.kind()))]
    pub async fn capture_with_cancel(
        &self,
        request: CaptureRequest,
        cancel: CancellationToken,
    ) -> Result<CaptureReport> {
        let start_time = Instant::now();
        let kind = request.source.kind();
        info!("Starting {} capture -> {}", kind, request.output.display());

        let result = self.run(&request, &cancel).await;
        let duration = start_time.elapsed();
        record_capture(kind, duration, result.is_ok());

        match result {
            Ok((shot, served_port)) => {
                record_clip_origin(shot.clip_origin);
                info!(
                    "Captured {} bytes to {} in {:?}",
                    shot.bytes_written,
                    request.output.display(),
                    duration
                );
                Ok(CaptureReport {
                    request_id: request.id,
                    kind,
                    output: request.output,
                    clip: shot.clip,
                    clip_origin: shot.clip_origin,
                    bytes_written: shot.bytes_written,
                    dimensions: shot.dimensions,
                    served_port,
                    duration,
                    captured_at: Utc::now(),
                })
            }
            Err(e) => {
                warn!("{} capture failed after {:?}: {}", kind, duration, e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<(Shot, Option<u16>)> {
        self.check_request(request)?;

        let server = match request.source.local_root() {
            Some(root) => Some(StaticServer::start(root, &self.config.server).await?),
            None => None,
        };

        let (address, served_port) = match (&request.source, &server) {
            (CaptureSource::Url { address, .. }, _) => (address.clone(), None),
            (_, Some(server)) => {
                debug!("Capturing {} via {}", server.root().display(), server.base_url());
                (server.base_url(), Some(server.port()))
            }
            (_, None) => {
                return Err(CaptureError::InvalidRoot(
                    "local capture without a server".to_string(),
                ))
            }
        };

        let result = self.in_browser(request, &address, cancel).await;

        if let Some(server) = server {
            server.stop().await;
        }

        result.map(|shot| (shot, served_port))
    }

    /// Everything that can be rejected before a server or browser starts.
    fn check_request(&self, request: &CaptureRequest) -> Result<()> {
        match &request.source {
            CaptureSource::Url { address, clip, .. } => {
                check_address(address)?;
                if let Some(clip) = clip {
                    clip.validate()?;
                }
            }
            CaptureSource::Path { clip, .. } => {
                if let Some(clip) = clip {
                    clip.validate()?;
                }
            }
            CaptureSource::Element { selector, .. } => {
                if selector.trim().is_empty() {
                    return Err(CaptureError::SelectorNotFound(
                        "empty selector".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn in_browser(
        &self,
        request: &CaptureRequest,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<Shot> {
        let mut browser = self
            .bounded(Stage::Launch, self.config.launch_timeout, cancel, self.engine.launch())
            .await?;

        let opened = self
            .bounded(Stage::Launch, self.config.launch_timeout, cancel, browser.new_page())
            .await;
        let page = match opened {
            Ok(page) => page,
            Err(e) => {
                self.close_browser(browser.as_mut()).await;
                return Err(e);
            }
        };

        let result = self.drive(page.as_ref(), request, address, cancel).await;

        self.close_page(page.as_ref()).await;
        self.close_browser(browser.as_mut()).await;

        result
    }

    async fn drive(
        &self,
        page: &dyn PageSession,
        request: &CaptureRequest,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<Shot> {
        let wait_until = match &request.source {
            CaptureSource::Url {
                wait_until: Some(wait_until),
                ..
            } => *wait_until,
            _ => self.config.wait_until,
        };

        debug!("Navigating to {} (wait until {:?})", address, wait_until);
        self.bounded(
            Stage::Navigate,
            self.config.navigation_timeout,
            cancel,
            page.navigate(address, wait_until),
        )
        .await?;

        let (clip, clip_origin) = self.resolve_clip(page, &request.source, cancel).await?;
        if let Some(clip) = &clip {
            clip.validate()?;
            debug!("Clipping capture to {}", clip);
        }

        let format = OutputFormat::from_path(&request.output);
        let settings = ShotSettings {
            clip,
            format,
            quality: format.is_lossy().then_some(self.config.jpeg_quality),
            full_page: self.config.full_page,
        };

        let data = self
            .bounded(
                Stage::Capture,
                self.config.capture_timeout,
                cancel,
                page.screenshot(&settings),
            )
            .await?;

        // Not cancellable: the output appears whole or not at all
        write_output(&request.output, &data).await?;

        Ok(Shot {
            clip,
            clip_origin,
            bytes_written: data.len(),
            dimensions: probe_dimensions(&data),
        })
    }

    async fn resolve_clip(
        &self,
        page: &dyn PageSession,
        source: &CaptureSource,
        cancel: &CancellationToken,
    ) -> Result<(Option<ClipRect>, ClipOrigin)> {
        match source {
            CaptureSource::Url {
                selector: Some(selector),
                clip,
                fallback,
                ..
            } => {
                if let Some(found) = self.element_box(page, selector, cancel).await? {
                    return Ok((Some(found), ClipOrigin::Selector));
                }

                let fallback = fallback.unwrap_or(self.config.selector_fallback);
                debug!("Selector {:?} matched nothing, falling back to {:?}", selector, fallback);
                match (fallback, clip) {
                    (SelectorFallback::CallerClip, Some(clip)) => {
                        Ok((Some(*clip), ClipOrigin::CallerClip))
                    }
                    (SelectorFallback::CallerClip, None) => Ok((None, ClipOrigin::Unclipped)),
                    (SelectorFallback::Viewport, _) => {
                        let viewport = self
                            .bounded(
                                Stage::Evaluate,
                                self.config.evaluate_timeout,
                                cancel,
                                page.viewport(),
                            )
                            .await?;
                        Ok((Some(viewport), ClipOrigin::Viewport))
                    }
                }
            }
            CaptureSource::Url {
                selector: None,
                clip,
                ..
            }
            | CaptureSource::Path { clip, .. } => Ok(match clip {
                Some(clip) => (Some(*clip), ClipOrigin::CallerClip),
                None => (None, ClipOrigin::Unclipped),
            }),
            CaptureSource::Element { selector, .. } => {
                match self.element_box(page, selector, cancel).await? {
                    Some(found) => Ok((
                        Some(found.padded(self.config.element_padding)),
                        ClipOrigin::Selector,
                    )),
                    None => Err(CaptureError::SelectorNotFound(selector.clone())),
                }
            }
        }
    }

    /// Bounding box of `selector`, treating zero-area boxes as no match.
    async fn element_box(
        &self,
        page: &dyn PageSession,
        selector: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ClipRect>> {
        let found = self
            .bounded(
                Stage::Evaluate,
                self.config.evaluate_timeout,
                cancel,
                page.bounding_box(selector),
            )
            .await?;
        Ok(found.filter(|clip| !clip.is_empty()))
    }

    async fn close_page(&self, page: &dyn PageSession) {
        match timeout(self.config.teardown_timeout, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Page close failed: {}", e),
            Err(_) => warn!("Page close timed out after {:?}", self.config.teardown_timeout),
        }
    }

    async fn close_browser(&self, browser: &mut dyn BrowserSession) {
        match timeout(self.config.teardown_timeout, browser.close()).await {
            Ok(Ok(())) => debug!("Browser closed"),
            Ok(Err(e)) => warn!("Browser close failed: {}", e),
            Err(_) => warn!(
                "Browser close timed out after {:?}",
                self.config.teardown_timeout
            ),
        }
    }

    /// Bounds one suspension point by its timeout and the cancellation token.
    async fn bounded<T, F>(
        &self,
        stage: Stage,
        limit: Duration,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(CaptureError::Cancelled(stage)),
            outcome = timeout(limit, fut) => match outcome {
                Ok(result) => result,
                Err(_) => Err(CaptureError::Timeout { stage, limit }),
            },
        }
    }
}

/// Writes `data` to a sibling temp file and renames it over `output`.
async fn write_output(output: &Path, data: &[u8]) -> Result<()> {
    let file_name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = output.with_file_name(format!(".{file_name}.{}.part", uuid::Uuid::new_v4()));
    let write_failed = |e: std::io::Error| CaptureError::WriteFailed {
        path: output.to_path_buf(),
        reason: e.to_string(),
    };

    if let Err(e) = tokio::fs::write(&staging, data).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(write_failed(e));
    }
    if let Err(e) = tokio::fs::rename(&staging, output).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(write_failed(e));
    }
    Ok(())
}

fn check_address(address: &str) -> Result<()> {
    let parsed =
        url::Url::parse(address).map_err(|e| CaptureError::InvalidAddress(format!("{address}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" | "file" => Ok(()),
        other => Err(CaptureError::InvalidAddress(format!(
            "{address}: unsupported scheme {other}"
        ))),
    }
}

/// Captures `address` with the default Chromium engine.
pub async fn capture_from_url(
    address: &str,
    output: impl Into<PathBuf>,
    options: UrlOptions,
) -> Result<CaptureReport> {
    default_capturer()?.from_url(address, output, options).await
}

/// Serves `root` on an ephemeral port and captures its index page.
pub async fn capture_from_path(
    root: impl Into<PathBuf>,
    output: impl Into<PathBuf>,
    options: PathOptions,
) -> Result<CaptureReport> {
    default_capturer()?.from_path(root, output, options).await
}

/// Serves `root` and captures the element matching `selector`.
pub async fn capture_from_element(
    root: impl Into<PathBuf>,
    selector: &str,
    output: impl Into<PathBuf>,
) -> Result<CaptureReport> {
    default_capturer()?
        .from_element(root, selector, output)
        .await
}

fn default_capturer() -> Result<Capturer<ChromiumEngine>> {
    let config = Config::default();
    config.validate()?;
    Ok(Capturer::new(ChromiumEngine::new(config.clone()), config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_address() {
        assert!(check_address("https://example.com").is_ok());
        assert!(check_address("http://localhost:8080/a?b=c").is_ok());
        assert!(check_address("file:///tmp/index.html").is_ok());
        assert!(matches!(
            check_address("ftp://example.com"),
            Err(CaptureError::InvalidAddress(_))
        ));
        assert!(check_address("not a url").is_err());
    }

    #[test]
    fn test_source_kind_and_root() {
        let url = CaptureSource::Url {
            address: "https://example.com".into(),
            wait_until: None,
            selector: None,
            clip: None,
            fallback: None,
        };
        assert_eq!(url.kind(), "url");
        assert!(url.local_root().is_none());

        let element = CaptureSource::Element {
            root: PathBuf::from("site"),
            selector: "#box".into(),
        };
        assert_eq!(element.kind(), "element");
        assert_eq!(element.local_root(), Some(Path::new("site")));
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_write_output_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("shot.png");
        std::fs::write(&output, b"old contents that are longer").unwrap();

        write_output(&output, b"new").await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"new");
        assert_eq!(dir_entries(dir.path()), vec!["shot.png"]);
    }

    #[tokio::test]
    async fn test_write_output_failure_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("taken");
        std::fs::create_dir(&output).unwrap();
        std::fs::write(output.join("keep.txt"), b"x").unwrap();

        let err = write_output(&output, b"data").await.unwrap_err();

        assert!(matches!(err, CaptureError::WriteFailed { ref path, .. } if path == &output));
        assert_eq!(dir_entries(dir.path()), vec!["taken"]);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let source = CaptureSource::Path {
            root: PathBuf::from("."),
            clip: None,
        };
        let a = CaptureRequest::new(source.clone(), "a.png");
        let b = CaptureRequest::new(source, "b.png");
        assert_ne!(a.id, b.id);
    }
}
