//! Inference capability consumed by the frame engine.
//!
//! Detection, embedding and attribute models live behind [`FaceAnalyzer`] so they can be
//! swapped per deployment, and replaced by deterministic fakes in tests.

use crate::attributes::FaceAttributes;
use crate::types::BoundingBox;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// A face found in a frame: its box and the pixels inside it.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub crop: RgbImage,
    pub bbox: BoundingBox,
}

/// Presentation-attack check for one face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivenessResult {
    pub is_spoof: bool,
    pub score: f32,
}

pub trait FaceAnalyzer: Send {
    /// Detect faces, returning crops and boxes in frame coordinates.
    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError>;

    /// Produce a raw (not yet normalized) embedding for a face crop.
    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>, AnalyzerError>;

    /// Estimate categorical attributes. Failed sub-models leave their field `None`.
    fn classify(&mut self, face: &RgbImage) -> FaceAttributes;

    /// Liveness check on the full frame around `bbox`. Analyzers without a liveness model
    /// return `None`.
    fn check_liveness(&mut self, _frame: &RgbImage, _bbox: &BoundingBox) -> Option<LivenessResult> {
        None
    }
}

/// Copy the pixels under `bbox`, clamped to the frame. `None` when the clamped box is empty.
pub fn crop_face(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (fw, fh) = frame.dimensions();
    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width).max(0.0).ceil() as u32).min(fw);
    let y1 = ((bbox.y + bbox.height).max(0.0).ceil() as u32).min(fh);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some(image::imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image())
}
