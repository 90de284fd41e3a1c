use crate::{
    inspect_artifact, CaptureReport, CaptureRequest, CaptureSource, Capturer, ChromiumEngine,
    ClipRect, Config, SelectorFallback, WaitUntil,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "page-capture")]
#[command(about = "Capture screenshots of URLs, local sites and DOM elements")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Navigation timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Print the capture report as JSON")]
    pub json: bool,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, help = "Viewport width")]
    pub width: Option<u32>,

    #[arg(long, global = true, help = "Viewport height")]
    pub height: Option<u32>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture a remote address
    Url {
        #[arg(short, long, help = "Address to capture")]
        address: String,

        #[arg(short, long, help = "Output file path (.png, .jpg, .webp)")]
        output: PathBuf,

        #[arg(long, help = "Wait condition (load, domcontentloaded, networkidle0, networkidle2)")]
        wait_until: Option<WaitUntil>,

        #[arg(long, help = "CSS selector to clip to")]
        selector: Option<String>,

        #[arg(long, help = "Clip rectangle as x,y,width,height")]
        clip: Option<ClipRect>,

        #[arg(long, help = "Fallback when the selector matches nothing (caller-clip, viewport)")]
        fallback: Option<SelectorFallback>,
    },

    /// Serve a local directory and capture its index page
    Path {
        #[arg(short, long, help = "Directory to serve")]
        root: PathBuf,

        #[arg(short, long, help = "Output file path (.png, .jpg, .webp)")]
        output: PathBuf,

        #[arg(long, help = "Clip rectangle as x,y,width,height")]
        clip: Option<ClipRect>,
    },

    /// Serve a local directory and capture one element
    Element {
        #[arg(short, long, help = "Directory to serve")]
        root: PathBuf,

        #[arg(short, long, help = "CSS selector of the element")]
        selector: String,

        #[arg(short, long, help = "Output file path (.png, .jpg, .webp)")]
        output: PathBuf,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        file: PathBuf,
    },
}

pub struct CliRunner {
    pub config: Config,
    pub json: bool,
    capturer: Capturer<ChromiumEngine>,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        let capturer = Capturer::new(ChromiumEngine::new(config.clone()), config.clone());
        Self {
            config,
            json: false,
            capturer,
        }
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub async fn run(
        &self,
        command: Commands,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (source, output) = match command {
            Commands::Url {
                address,
                output,
                wait_until,
                selector,
                clip,
                fallback,
            } => (
                CaptureSource::Url {
                    address,
                    wait_until,
                    selector,
                    clip,
                    fallback,
                },
                output,
            ),
            Commands::Path { root, output, clip } => (CaptureSource::Path { root, clip }, output),
            Commands::Element {
                root,
                selector,
                output,
            } => (CaptureSource::Element { root, selector }, output),
            Commands::Validate { file } => return self.validate_config(file).await,
        };

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let request = CaptureRequest::new(source, output);
        let report = self.capturer.capture_with_cancel(request, cancel).await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        Ok(())
    }

    pub async fn validate_config(
        &self,
        config_path: PathBuf,
    ) -> Result<(), Box<dyn std::error::Error>> {
        println!("Validating configuration: {}", config_path.display());

        let config = Config::from_json_file(&config_path).await?;

        println!("Configuration is valid:");
        println!("  Wait until: {:?}", config.wait_until);
        println!("  Selector fallback: {:?}", config.selector_fallback);
        println!("  Navigation timeout: {:?}", config.navigation_timeout);
        println!(
            "  Viewport: {}x{}",
            config.viewport.width, config.viewport.height
        );

        Ok(())
    }
}

fn print_report(report: &CaptureReport) {
    println!("Screenshot captured successfully:");
    println!("  Output: {}", report.output.display());
    println!("  Size: {} bytes", report.bytes_written);
    match report.dimensions {
        Some((width, height)) => println!("  Dimensions: {width}x{height}"),
        None => match inspect_artifact(&report.output) {
            Ok(info) => println!("  Dimensions: {}x{}", info.width, info.height),
            Err(e) => warn!("Could not inspect {}: {}", report.output.display(), e),
        },
    }
    match &report.clip {
        Some(clip) => println!("  Clip: {} ({:?})", clip, report.clip_origin),
        None => println!("  Clip: none"),
    }
    if let Some(port) = report.served_port {
        println!("  Served on port: {port}");
    }
    println!("  Duration: {:?}", report.duration);
    info!("Capture {} finished", report.request_id);
}

/// Builds the effective configuration: file (or defaults), then CLI overrides.
pub async fn load_config(args: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if let Some(config_path) = &args.config {
        Config::from_json_file(config_path).await?
    } else {
        Config::default()
    };

    if let Some(timeout) = args.timeout {
        config.navigation_timeout = std::time::Duration::from_secs(timeout);
    }

    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }

    if let Some(width) = args.width {
        config.viewport.width = width;
    }

    if let Some(height) = args.height {
        config.viewport.height = height;
    }

    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Wait until: {:?}", config.wait_until);
    info!("Navigation timeout: {:?}", config.navigation_timeout);

    Ok(config)
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_command() {
        let cli = Cli::try_parse_from([
            "page-capture",
            "url",
            "--address",
            "https://example.com",
            "--output",
            "out.png",
            "--selector",
            "#main",
            "--clip",
            "0,0,300,200",
            "--wait-until",
            "networkidle2",
            "--fallback",
            "viewport",
            "--timeout",
            "5",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.timeout, Some(5));
        assert!(cli.json);
        match cli.command {
            Commands::Url {
                address,
                selector,
                clip,
                wait_until,
                fallback,
                ..
            } => {
                assert_eq!(address, "https://example.com");
                assert_eq!(selector.as_deref(), Some("#main"));
                assert_eq!(clip, Some(ClipRect::new(0.0, 0.0, 300.0, 200.0)));
                assert_eq!(wait_until, Some(WaitUntil::NetworkIdle2));
                assert_eq!(fallback, Some(SelectorFallback::Viewport));
            }
            _ => panic!("expected url command"),
        }
    }

    #[test]
    fn test_parse_element_command() {
        let cli = Cli::try_parse_from([
            "page-capture",
            "element",
            "--root",
            "site",
            "--selector",
            "#box",
            "--output",
            "box.png",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::Element { ref selector, .. } if selector == "#box"
        ));
    }

    #[test]
    fn test_rejects_bad_clip() {
        let parsed = Cli::try_parse_from([
            "page-capture",
            "path",
            "--root",
            "site",
            "--output",
            "out.png",
            "--clip",
            "1,2,3",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_load_config_applies_overrides() {
        let cli = Cli::try_parse_from([
            "page-capture",
            "--timeout",
            "7",
            "--width",
            "800",
            "--height",
            "600",
            "path",
            "--root",
            "site",
            "--output",
            "out.png",
        ])
        .unwrap();

        let config = load_config(&cli).await.unwrap();
        assert_eq!(config.navigation_timeout, std::time::Duration::from_secs(7));
        assert_eq!(config.viewport.width, 800);
        assert_eq!(config.viewport.height, 600);
    }

    #[tokio::test]
    async fn test_load_config_reads_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"selector_fallback": "viewport", "navigation_timeout": {"secs": 12, "nanos": 0}}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "page-capture",
            "--config",
            path.to_str().unwrap(),
            "--width",
            "640",
            "path",
            "--root",
            "site",
            "--output",
            "out.png",
        ])
        .unwrap();

        let config = load_config(&cli).await.unwrap();
        assert_eq!(config.selector_fallback, SelectorFallback::Viewport);
        assert_eq!(config.navigation_timeout, std::time::Duration::from_secs(12));
        assert_eq!(config.viewport.width, 640);
    }

    #[tokio::test]
    async fn test_load_config_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"jpeg_quality": 0}"#).unwrap();

        let cli = Cli::try_parse_from([
            "page-capture",
            "--config",
            path.to_str().unwrap(),
            "validate",
            "--file",
            path.to_str().unwrap(),
        ])
        .unwrap();

        assert!(load_config(&cli).await.is_err());
    }
}
