//! Chromium backend built on chromiumoxide
//!
//! Each `launch` starts a dedicated headless Chrome with its own profile
//! directory and a background task pumping Chrome DevTools Protocol events.

use crate::geometry::{bounding_box_script, parse_bounding_box, viewport_script};
use crate::{
    create_browser_config, BrowserEngine, BrowserSession, CaptureError, ClipRect, Config,
    OutputFormat, PageSession, Result, ShotSettings, WaitUntil,
};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, NavigateParams, Viewport as ClipViewport,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const READY_STATE_POLL: Duration = Duration::from_millis(100);

/// How long the in-flight request count must stay low for the network to
/// count as idle.
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

/// Default engine: one headless Chrome process per capture.
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    config: Config,
}

impl ChromiumEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let user_data_dir =
            std::env::temp_dir().join(format!("page-capture-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&user_data_dir)
            .await
            .map_err(|e| {
                CaptureError::LaunchFailed(format!("Failed to create profile dir: {e}"))
            })?;

        let launched = match create_browser_config(&self.config, &user_data_dir) {
            Ok(browser_config) => Browser::launch(browser_config)
                .await
                .map_err(|e| CaptureError::LaunchFailed(e.to_string())),
            Err(e) => Err(e),
        };

        let (browser, mut handler) = match launched {
            Ok(pair) => pair,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&user_data_dir).await;
                return Err(e);
            }
        };

        // The handler is a Stream and must be polled for the browser to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                    return Err(e);
                }
            }
            debug!("CDP handler stream ended");
            Ok(())
        });

        info!("Launched headless browser (profile {})", user_data_dir.display());

        Ok(Box::new(ChromiumSession {
            browser,
            handler: handler_task,
            user_data_dir,
            closed: false,
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<std::result::Result<(), CdpError>>,
    user_data_dir: PathBuf,
    closed: bool,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&mut self) -> Result<Box<dyn PageSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| CaptureError::LaunchFailed(format!("Failed to open page: {e}")))?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let closed = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to reap browser process: {}", e);
        }
        self.handler.abort();

        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!(
                "Could not remove profile dir {}: {}",
                self.user_data_dir.display(),
                e
            );
        }

        closed
            .map(|_| ())
            .map_err(|e| CaptureError::TeardownFailed(format!("Failed to close browser: {e}")))
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        // chromiumoxide kills the child process when `Browser` drops
        self.handler.abort();
    }
}

pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn eval_string(&self, script: &str) -> Result<String> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| CaptureError::EvaluationFailed(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| CaptureError::EvaluationFailed(e.to_string()))
    }

    /// Navigates without waiting for `load`, then polls `document.readyState`.
    async fn navigate_until_interactive(&self, address: &str) -> Result<()> {
        let response = self
            .page
            .execute(NavigateParams::new(address))
            .await
            .map_err(|e| CaptureError::NavigationFailed(e.to_string()))?;

        if let Some(error_text) = &response.result.error_text {
            return Err(CaptureError::NavigationFailed(format!(
                "{address}: {error_text}"
            )));
        }

        let ready_script = "JSON.stringify({ href: location.href, state: document.readyState })";
        loop {
            if let Ok(raw) = self.eval_string(ready_script).await {
                if let Ok(state) = serde_json::from_str::<ReadyState>(&raw) {
                    let committed = state.href != "about:blank";
                    if committed && matches!(state.state.as_str(), "interactive" | "complete") {
                        return Ok(());
                    }
                }
            }
            sleep(READY_STATE_POLL).await;
        }
    }
}

struct NetworkEvents {
    sent: EventStream<EventRequestWillBeSent>,
    finished: EventStream<EventLoadingFinished>,
    failed: EventStream<EventLoadingFailed>,
}

impl ChromiumPage {
    async fn network_events(&self) -> Result<NetworkEvents> {
        let listen_failed = |e: CdpError| CaptureError::NavigationFailed(e.to_string());
        Ok(NetworkEvents {
            sent: self.page.event_listener().await.map_err(listen_failed)?,
            finished: self.page.event_listener().await.map_err(listen_failed)?,
            failed: self.page.event_listener().await.map_err(listen_failed)?,
        })
    }
}

/// Resolves once at most `allowed` requests stay in flight for
/// `NETWORK_IDLE_WINDOW`. Bounded by the caller's navigation timeout.
async fn wait_for_network_idle(mut events: NetworkEvents, allowed: usize) -> Result<()> {
    let mut inflight = InflightRequests::new(allowed);
    let quiet = sleep(NETWORK_IDLE_WINDOW);
    tokio::pin!(quiet);

    loop {
        let was_idle = inflight.is_idle();
        tokio::select! {
            _ = &mut quiet, if was_idle => {
                debug!("Network idle (<= {} requests in flight)", allowed);
                return Ok(());
            }
            Some(event) = events.sent.next() => inflight.started(event.request_id.inner()),
            Some(event) = events.finished.next() => inflight.settled(event.request_id.inner()),
            Some(event) = events.failed.next() => inflight.settled(event.request_id.inner()),
            else => {
                return Err(CaptureError::NavigationFailed(
                    "page closed while waiting for network idle".to_string(),
                ))
            }
        }

        if !was_idle && inflight.is_idle() {
            quiet.as_mut().reset(Instant::now() + NETWORK_IDLE_WINDOW);
        }
    }
}

/// Requests the page has started and not yet finished or failed.
#[derive(Debug)]
struct InflightRequests {
    ids: HashSet<String>,
    allowed: usize,
}

impl InflightRequests {
    fn new(allowed: usize) -> Self {
        Self {
            ids: HashSet::new(),
            allowed,
        }
    }

    // Redirects reuse the request id, so a set counts them once
    fn started(&mut self, id: &str) {
        self.ids.insert(id.to_string());
    }

    fn settled(&mut self, id: &str) {
        self.ids.remove(id);
    }

    fn is_idle(&self) -> bool {
        self.ids.len() <= self.allowed
    }
}

/// Maps engine-neutral settings onto chromiumoxide's screenshot parameters.
fn shot_params(settings: &ShotSettings) -> ScreenshotParams {
    let format = match settings.format {
        OutputFormat::Png => CaptureScreenshotFormat::Png,
        OutputFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        OutputFormat::Webp => CaptureScreenshotFormat::Webp,
    };

    // A clip already fixes the area; full_page would override it
    let mut builder = ScreenshotParams::builder()
        .format(format)
        .full_page(settings.full_page && settings.clip.is_none());

    if let (true, Some(quality)) = (settings.format.is_lossy(), settings.quality) {
        builder = builder.quality(i64::from(quality));
    }

    if let Some(clip) = settings.clip {
        builder = builder.clip(ClipViewport::from(clip));
    }

    builder.build()
}

#[derive(serde::Deserialize)]
struct ReadyState {
    href: String,
    state: String,
}

#[async_trait]
impl PageSession for ChromiumPage {
    async fn navigate(&self, address: &str, wait_until: WaitUntil) -> Result<()> {
        let allowed = match wait_until {
            WaitUntil::DomContentLoaded => return self.navigate_until_interactive(address).await,
            WaitUntil::Load => None,
            WaitUntil::NetworkIdle0 => Some(0),
            WaitUntil::NetworkIdle2 => Some(2),
        };

        // Subscribe before navigating so the document's own requests are counted
        let network = match allowed {
            Some(_) => Some(self.network_events().await?),
            None => None,
        };

        // goto resolves once the frame reports `load`
        self.page
            .goto(address)
            .await
            .map_err(|e| CaptureError::NavigationFailed(format!("{address}: {e}")))?;

        if let (Some(allowed), Some(network)) = (allowed, network) {
            wait_for_network_idle(network, allowed).await?;
        }
        Ok(())
    }

    async fn bounding_box(&self, selector: &str) -> Result<Option<ClipRect>> {
        let raw = self.eval_string(&bounding_box_script(selector)).await?;
        parse_bounding_box(&raw)
    }

    async fn viewport(&self) -> Result<ClipRect> {
        let raw = self.eval_string(viewport_script()).await?;
        serde_json::from_str(&raw).map_err(|e| CaptureError::EvaluationFailed(e.to_string()))
    }

    async fn screenshot(&self, settings: &ShotSettings) -> Result<Vec<u8>> {
        self.page
            .screenshot(shot_params(settings))
            .await
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| CaptureError::TeardownFailed(format!("Failed to close page: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(format: OutputFormat, clip: Option<ClipRect>, full_page: bool) -> ShotSettings {
        ShotSettings {
            clip,
            format,
            quality: format.is_lossy().then_some(80),
            full_page,
        }
    }

    #[test]
    fn test_shot_params_clip_passes_through_at_unit_scale() {
        let clip = ClipRect::new(8.0, 16.0, 200.0, 100.0);
        let params = shot_params(&settings(OutputFormat::Png, Some(clip), false));

        assert_eq!(
            params.cdp_params.clip,
            Some(ClipViewport {
                x: 8.0,
                y: 16.0,
                width: 200.0,
                height: 100.0,
                scale: 1.0,
            })
        );
        assert_eq!(params.cdp_params.format, Some(CaptureScreenshotFormat::Png));
    }

    #[test]
    fn test_shot_params_clip_disables_full_page() {
        let clip = ClipRect::new(0.0, 0.0, 50.0, 50.0);
        let clipped = shot_params(&settings(OutputFormat::Png, Some(clip), true));
        assert!(!clipped.full_page.unwrap_or(false));

        let whole = shot_params(&settings(OutputFormat::Png, None, true));
        assert_eq!(whole.full_page, Some(true));
        assert_eq!(whole.cdp_params.clip, None);
    }

    #[test]
    fn test_shot_params_quality_only_for_lossy_formats() {
        let png = shot_params(&ShotSettings {
            quality: Some(80),
            ..settings(OutputFormat::Png, None, false)
        });
        assert_eq!(png.cdp_params.quality, None);

        let jpeg = shot_params(&settings(OutputFormat::Jpeg, None, false));
        assert_eq!(jpeg.cdp_params.format, Some(CaptureScreenshotFormat::Jpeg));
        assert_eq!(jpeg.cdp_params.quality, Some(80));

        let webp = shot_params(&settings(OutputFormat::Webp, None, false));
        assert_eq!(webp.cdp_params.format, Some(CaptureScreenshotFormat::Webp));
        assert_eq!(webp.cdp_params.quality, Some(80));
    }

    #[test]
    fn test_inflight_requests_idle_threshold() {
        let mut strict = InflightRequests::new(0);
        assert!(strict.is_idle());
        strict.started("1");
        strict.started("1"); // redirect
        assert!(!strict.is_idle());
        strict.settled("1");
        assert!(strict.is_idle());

        let mut loose = InflightRequests::new(2);
        loose.started("a");
        loose.started("b");
        assert!(loose.is_idle());
        loose.started("c");
        assert!(!loose.is_idle());
        loose.settled("unknown");
        assert!(!loose.is_idle());
        loose.settled("a");
        assert!(loose.is_idle());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_uses_per_capture_profile() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let argv_log = dir.path().join("argv.txt");
        let fake_chrome = dir.path().join("fake-chrome");
        std::fs::write(
            &fake_chrome,
            format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\nexit 1\n",
                argv_log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&fake_chrome, std::fs::Permissions::from_mode(0o755)).unwrap();

        let profile = dir.path().join("unique-profile");
        let config = Config {
            chrome_path: Some(fake_chrome.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let browser_config = create_browser_config(&config, &profile).unwrap();
        let mut child = browser_config.launch().unwrap();
        child.wait().await.unwrap();

        let argv = std::fs::read_to_string(&argv_log).unwrap();
        let profiles: Vec<&str> = argv
            .lines()
            .filter(|arg| arg.starts_with("--user-data-dir="))
            .collect();
        let expected = format!("--user-data-dir={}", profile.display());
        assert_eq!(profiles, vec![expected.as_str()]);
    }
}
