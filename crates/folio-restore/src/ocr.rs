// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local text recognition backed by the `ocrs` engine.
//
// Only compiled with the `ocr` feature. The engine needs two `.rten` model
// files (`text-detection.rten`, `text-recognition.rten`); running `ocrs-cli`
// once downloads them to `$XDG_CACHE_HOME/ocrs`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use tracing::{debug, info, instrument};

use folio_core::error::{FolioError, Result};
use folio_core::{Recognition, ServiceError, TextRecognizer};

use crate::codec;

/// `ocrs` reports no per-line scores; recognised text is given this
/// confidence so the low-OCR gates downstream stay meaningful.
pub const LOCAL_CONFIDENCE: f64 = 82.0;

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Where to find the recognition models.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl ModelPaths {
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection: dir.join(DETECTION_MODEL_FILENAME),
            recognition: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (role, path) in [("detection", &self.detection), ("recognition", &self.recognition)] {
            if !path.exists() {
                return Err(FolioError::Config(format!(
                    "{} model not found at {}; run `ocrs-cli` once to download models",
                    role,
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// [`TextRecognizer`] that runs `ocrs` on the blocking thread pool.
#[derive(Clone)]
pub struct LocalRecognizer {
    engine: Arc<OcrEngine>,
}

impl LocalRecognizer {
    /// Load both models. This is the expensive step; share the recognizer.
    #[instrument(skip_all, fields(
        detection = %paths.detection.display(),
        recognition = %paths.recognition.display(),
    ))]
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        paths.validate()?;

        let load = |path: &Path| {
            Model::load_file(path).map_err(|err| {
                FolioError::Config(format!("failed to load model {}: {}", path.display(), err))
            })
        };
        let detection_model = load(&paths.detection)?;
        let recognition_model = load(&paths.recognition)?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| FolioError::Config(format!("failed to initialise OCR engine: {}", err)))?;

        info!("Local recognizer ready");
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    fn recognize_blocking(engine: &OcrEngine, image_png: &[u8]) -> std::result::Result<String, ServiceError> {
        let image = codec::decode(image_png)
            .map_err(|err| ServiceError::InvalidResponse(err.to_string()))?;
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
            ServiceError::Unavailable(format!("image source ({}x{}): {}", width, height, err))
        })?;
        let input = engine
            .prepare_input(source)
            .map_err(|err| ServiceError::Unavailable(format!("preprocessing failed: {}", err)))?;
        let text = engine
            .get_text(&input)
            .map_err(|err| ServiceError::Unavailable(format!("recognition failed: {}", err)))?;

        debug!(lines = text.lines().count(), chars = text.len(), "Local recognition complete");
        Ok(text)
    }
}

#[async_trait]
impl TextRecognizer for LocalRecognizer {
    async fn recognize(&self, image_png: &[u8]) -> std::result::Result<Recognition, ServiceError> {
        let engine = Arc::clone(&self.engine);
        let bytes = image_png.to_vec();
        let text = tokio::task::spawn_blocking(move || Self::recognize_blocking(&engine, &bytes))
            .await
            .map_err(|err| ServiceError::Unavailable(format!("recognition task failed: {}", err)))??;

        let confidence = if text.trim().is_empty() { 0.0 } else { LOCAL_CONFIDENCE };
        Ok(Recognition { text, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_paths_from_dir() {
        let paths = ModelPaths::from_dir("/models");
        assert_eq!(paths.detection, PathBuf::from("/models/text-detection.rten"));
        assert_eq!(paths.recognition, PathBuf::from("/models/text-recognition.rten"));
    }

    /// Missing model files are a configuration error naming the model.
    #[test]
    fn missing_models_fail_validation() {
        let err = ModelPaths::from_dir("/nonexistent/folio-models").validate().unwrap_err();
        assert!(matches!(err, FolioError::Config(ref msg) if msg.contains("detection")));
    }

    #[test]
    fn load_without_models_fails() {
        assert!(LocalRecognizer::load(&ModelPaths::from_dir("/nonexistent")).is_err());
    }
}
