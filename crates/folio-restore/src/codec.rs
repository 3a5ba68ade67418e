// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Decoding uploaded page bytes and encoding restored pages for the
// recognition service.

use image::{DynamicImage, ImageFormat};
use tracing::{debug, info, instrument};

use folio_core::error::{FolioError, Result};

/// Decode raw page bytes (PNG, JPEG, TIFF, ...).
///
/// Anything that is not a decodable, non-empty raster is `MalformedInput`.
#[instrument(skip(data), fields(data_len = data.len()))]
pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    if data.is_empty() {
        return Err(FolioError::MalformedInput("empty image payload".into()));
    }
    let img = image::load_from_memory(data)
        .map_err(|err| FolioError::MalformedInput(format!("failed to decode image: {}", err)))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(FolioError::MalformedInput(format!(
            "image has no pixels ({}x{})",
            img.width(),
            img.height()
        )));
    }
    debug!(width = img.width(), height = img.height(), "Image decoded from bytes");
    Ok(img)
}

/// Load and decode a page from disk.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn open(path: impl AsRef<std::path::Path>) -> Result<DynamicImage> {
    let data = std::fs::read(path.as_ref())?;
    let img = decode(&data)?;
    info!(width = img.width(), height = img.height(), "Image loaded");
    Ok(img)
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|err| FolioError::Image(format!("PNG encoding failed: {}", err)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn png_round_trip_preserves_pixels() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(8, 6, |x, y| {
            Luma([(x * 30 + y) as u8])
        }));
        let bytes = encode_png(&img).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        let back = decode(&bytes).unwrap();
        assert_eq!(back.to_luma8(), img.to_luma8());
    }

    /// Garbage bytes are malformed input, not an internal image error.
    #[test]
    fn garbage_is_malformed() {
        let err = decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, FolioError::MalformedInput(_)));
    }

    #[test]
    fn empty_payload_is_malformed() {
        assert!(matches!(decode(&[]), Err(FolioError::MalformedInput(_))));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = open("/nonexistent/folio/page.png").unwrap_err();
        assert!(matches!(err, FolioError::Io(_)));
    }
}
