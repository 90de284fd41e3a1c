//! Clip rectangles and the in-page geometry scripts
//!
//! Everything the crate computes itself about page geometry lives here: the
//! clip rectangle handed to the browser, and the one-line scripts used to read
//! an element's bounding box or the viewport size from the live DOM.

use crate::CaptureError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Sub-region of the rendered page to capture, in CSS pixels
///
/// # Examples
///
/// ```rust
/// use page_capture::ClipRect;
///
/// let clip: ClipRect = "10,20,200,100".parse().unwrap();
/// assert_eq!(clip, ClipRect::new(10.0, 20.0, 200.0, 100.0));
/// assert!(clip.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ClipRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ClipRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Checks that the rectangle can be handed to the browser as a clip.
    pub fn validate(&self) -> Result<(), CaptureError> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(CaptureError::InvalidClip(format!(
                "non-finite field in {self}"
            )));
        }
        if self.is_empty() {
            return Err(CaptureError::InvalidClip(format!(
                "width and height must be positive, got {self}"
            )));
        }
        Ok(())
    }

    /// Grows the rectangle by `padding` on every side.
    pub fn padded(&self, padding: f64) -> Self {
        Self {
            x: self.x - padding,
            y: self.y - padding,
            width: self.width + padding * 2.0,
            height: self.height + padding * 2.0,
        }
    }
}

impl std::fmt::Display for ClipRect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} at ({}, {})",
            self.width, self.height, self.x, self.y
        )
    }
}

impl FromStr for ClipRect {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CaptureError::InvalidClip(format!("{s}: {e}")))?;

        match parts.as_slice() {
            [x, y, width, height] => Ok(Self::new(*x, *y, *width, *height)),
            _ => Err(CaptureError::InvalidClip(format!(
                "{s}: expected x,y,width,height"
            ))),
        }
    }
}

impl From<ClipRect> for chromiumoxide::cdp::browser_protocol::page::Viewport {
    fn from(clip: ClipRect) -> Self {
        Self {
            x: clip.x,
            y: clip.y,
            width: clip.width,
            height: clip.height,
            scale: 1.0,
        }
    }
}

/// Script returning the bounding box of the first element matching
/// `selector`, in page coordinates, as a JSON string (`"null"` on no match).
pub fn bounding_box_script(selector: &str) -> String {
    // A str always serializes
    let literal = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(() => {{ const el = document.querySelector({literal}); \
         if (!el) return JSON.stringify(null); \
         const r = el.getBoundingClientRect(); \
         return JSON.stringify({{ x: r.x + window.scrollX, y: r.y + window.scrollY, width: r.width, height: r.height }}); }})()"
    )
}

/// Script returning the visible viewport as a JSON-encoded clip rectangle.
pub fn viewport_script() -> &'static str {
    "JSON.stringify({ x: 0, y: 0, width: window.innerWidth, height: window.innerHeight })"
}

/// Decodes the JSON string produced by [`bounding_box_script`].
pub fn parse_bounding_box(raw: &str) -> Result<Option<ClipRect>, CaptureError> {
    serde_json::from_str(raw).map_err(|e| CaptureError::EvaluationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clip() {
        let clip: ClipRect = " 0, 5.5 ,200,100".parse().unwrap();
        assert_eq!(clip, ClipRect::new(0.0, 5.5, 200.0, 100.0));

        assert!("1,2,3".parse::<ClipRect>().is_err());
        assert!("1,2,3,4,5".parse::<ClipRect>().is_err());
        assert!("a,b,c,d".parse::<ClipRect>().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ClipRect::new(0.0, 0.0, 1.0, 1.0).validate().is_ok());
        assert!(ClipRect::new(-5.0, -5.0, 10.0, 10.0).validate().is_ok());
        assert!(matches!(
            ClipRect::new(0.0, 0.0, 0.0, 10.0).validate(),
            Err(CaptureError::InvalidClip(_))
        ));
        assert!(ClipRect::new(0.0, 0.0, 10.0, -1.0).validate().is_err());
        assert!(ClipRect::new(f64::NAN, 0.0, 10.0, 10.0).validate().is_err());
        assert!(ClipRect::new(0.0, 0.0, f64::INFINITY, 10.0).validate().is_err());
    }

    #[test]
    fn test_padding() {
        let clip = ClipRect::new(10.0, 20.0, 200.0, 100.0);
        assert_eq!(clip.padded(0.0), clip);
        assert_eq!(clip.padded(4.0), ClipRect::new(6.0, 16.0, 208.0, 108.0));
    }

    #[test]
    fn test_cdp_viewport_conversion() {
        let viewport: chromiumoxide::cdp::browser_protocol::page::Viewport =
            ClipRect::new(1.0, 2.0, 3.0, 4.0).into();
        assert_eq!(viewport.x, 1.0);
        assert_eq!(viewport.y, 2.0);
        assert_eq!(viewport.width, 3.0);
        assert_eq!(viewport.height, 4.0);
        assert_eq!(viewport.scale, 1.0);
    }

    #[test]
    fn test_bounding_box_script_escapes_selector() {
        let script = bounding_box_script(r#"a[title="x"]"#);
        assert!(script.contains(r#"document.querySelector("a[title=\"x\"]")"#));
        assert!(script.contains("getBoundingClientRect"));

        let script = bounding_box_script("#box");
        assert!(script.contains(r##"document.querySelector("#box")"##));
    }

    #[test]
    fn test_parse_bounding_box() {
        assert_eq!(parse_bounding_box("null").unwrap(), None);
        assert_eq!(
            parse_bounding_box(r#"{"x":8,"y":8,"width":200,"height":100}"#).unwrap(),
            Some(ClipRect::new(8.0, 8.0, 200.0, 100.0))
        );
        assert!(matches!(
            parse_bounding_box("{"),
            Err(CaptureError::EvaluationFailed(_))
        ));
    }
}
