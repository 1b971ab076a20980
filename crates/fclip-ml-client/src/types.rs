//! ML service request/response types.

use serde::{Deserialize, Serialize};

/// Inference request for one frame window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub width: u32,
    pub height: u32,
    /// Base64 of each frame's packed RGB24 bytes, in temporal order
    pub frames: Vec<String>,
}

/// One probability per label, in label order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub probabilities: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsResponse {
    pub labels: Vec<String>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}
