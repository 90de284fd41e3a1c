//! Capture counters and timings
//!
//! Recorded through the `metrics` facade; they are no-ops until the embedding
//! application installs a recorder.

use crate::ClipOrigin;
use metrics::{histogram, increment_counter};
use std::time::Duration;

pub fn record_capture(kind: &'static str, duration: Duration, success: bool) {
    if success {
        increment_counter!("page_capture_captures_total", "source" => kind);
    } else {
        increment_counter!("page_capture_failures_total", "source" => kind);
    }

    histogram!(
        "page_capture_duration_seconds",
        duration.as_secs_f64(),
        "source" => kind
    );
}

pub fn record_clip_origin(origin: ClipOrigin) {
    let origin = match origin {
        ClipOrigin::Selector => "selector",
        ClipOrigin::CallerClip => "caller_clip",
        ClipOrigin::Viewport => "viewport",
        ClipOrigin::Unclipped => "unclipped",
    };
    increment_counter!("page_capture_clip_origin_total", "origin" => origin);
}
