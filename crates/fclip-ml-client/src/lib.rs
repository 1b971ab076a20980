//! Action classifier capability and its remote implementation.
//!
//! The pipeline only depends on [`ActionClassifier`]: a window of decoded
//! frames in, one probability per label out. [`MlClient`] implements it
//! against an HTTP inference service; in-process models can implement the
//! same trait.

pub mod classifier;
pub mod client;
pub mod error;
pub mod types;

pub use classifier::{top_label, ActionClassifier, FrameWindow, WINDOW_FRAMES, WINDOW_SIZE};
pub use client::{MlClient, MlClientConfig};
pub use error::{MlError, MlResult};
pub use types::{HealthResponse, LabelsResponse, PredictRequest, PredictResponse};
