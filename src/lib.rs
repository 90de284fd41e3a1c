//! # Page Capture
//!
//! Screenshots of web pages rendered by headless Chrome, from three kinds of
//! input:
//!
//! - **URL**: navigate to an address and capture, optionally clipped to a CSS
//!   selector's bounding box or to an explicit rectangle.
//! - **Local path**: serve a directory over a throwaway HTTP server on a free
//!   port, capture its index page, then stop the server.
//! - **Element**: like a local path, but always clipped to the bounding box of
//!   a given selector. A selector that matches nothing is an error.
//!
//! Rendering, layout and image encoding are the browser's job. This crate
//! marshals parameters, computes clip rectangles with a one-line in-page
//! script, and owns the lifecycle of the browser and the static server: both
//! are torn down on every exit path, and every wait on the browser is bounded
//! by a timeout and an optional cancellation token.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use page_capture::{capture_from_element, capture_from_url, UrlOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let report = capture_from_url("https://example.com", "example.png", UrlOptions::default()).await?;
//!     println!("Captured {} bytes", report.bytes_written);
//!
//!     let report = capture_from_element("./site", "#hero", "hero.png").await?;
//!     println!("Element clip: {:?}", report.clip);
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! page-capture url --address https://example.com --output example.png --selector h1
//! page-capture path --root ./site --output site.png --clip 0,0,800,600
//! page-capture element --root ./site --selector '#box' --output box.png
//! ```

/// Configuration and settings
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Clip rectangles and in-page geometry scripts
pub mod geometry;

/// Browser capability traits
pub mod engine;

/// Chromium implementation of the browser traits
pub mod chromium;

/// Ephemeral static file server for local captures
pub mod server;

/// Capture operations over URLs, local paths and elements
pub mod capture;

/// Inspection of written screenshots
pub mod artifact;

/// Capture counters and timings
pub mod metrics;

/// Command-line interface implementation
pub mod cli;


pub use artifact::*;
pub use capture::*;
pub use chromium::*;
pub use cli::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use geometry::*;
pub use server::*;
