use crate::CaptureError;
use std::io::Cursor;
use std::path::Path;

/// Facts about a written screenshot, read from the image header.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactInfo {
    pub width: u32,
    pub height: u32,
    pub format: image::ImageFormat,
    pub bytes: u64,
}

pub fn inspect_artifact(path: &Path) -> Result<ArtifactInfo, CaptureError> {
    let bytes = std::fs::metadata(path)?.len();
    let reader = image::io::Reader::open(path)?.with_guessed_format()?;
    let format = reader.format().ok_or_else(|| {
        CaptureError::CaptureFailed(format!("{} is not a recognised image", path.display()))
    })?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

    Ok(ArtifactInfo {
        width,
        height,
        format,
        bytes,
    })
}

/// Pixel size of encoded image bytes, if the header is readable.
pub fn probe_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
