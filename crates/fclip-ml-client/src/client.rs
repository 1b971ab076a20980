//! Remote inference HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::classifier::{ActionClassifier, FrameWindow};
use crate::error::{MlError, MlResult};
use crate::types::{HealthResponse, LabelsResponse, PredictRequest, PredictResponse};

/// Configuration for ML client.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL of ML service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }
}

impl MlClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("ML_SERVICE_URL").unwrap_or(defaults.base_url),
            timeout: std::env::var("ML_SERVICE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: std::env::var("ML_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }
}

/// Classifier backed by a remote inference service.
///
/// `GET /labels` supplies the label set once at connect time;
/// `POST /predict` classifies one window per request.
pub struct MlClient {
    http: Client,
    config: MlClientConfig,
    labels: Vec<String>,
}

impl MlClient {
    /// Connect and fetch the service's label set.
    pub async fn connect(config: MlClientConfig) -> MlResult<Self> {
        let mut client = Self::with_labels(config, Vec::new())?;
        client.labels = client.fetch_labels().await?;
        debug!(labels = client.labels.len(), "ML service labels loaded");
        Ok(client)
    }

    /// Create a client with a known label set, without contacting the service.
    pub fn with_labels(config: MlClientConfig, labels: Vec<String>) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self {
            http,
            config,
            labels,
        })
    }

    /// Connect using environment configuration.
    pub async fn from_env() -> MlResult<Self> {
        Self::connect(MlClientConfig::from_env()).await
    }

    /// Check if ML service is healthy.
    pub async fn health_check(&self) -> MlResult<bool> {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("ML service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("ML service health check error: {}", e);
                Ok(false)
            }
        }
    }

    async fn fetch_labels(&self) -> MlResult<Vec<String>> {
        let url = format!("{}/labels", self.config.base_url);
        let response = self
            .with_retry(|| async {
                let response = self.http.get(&url).send().await.map_err(MlError::Network)?;
                check_status(response).await
            })
            .await?;

        let body: LabelsResponse = response.json().await?;
        if body.labels.is_empty() {
            return Err(MlError::InvalidResponse("service reported no labels".to_string()));
        }
        Ok(body.labels)
    }

    /// Classify one window.
    pub async fn predict(&self, window: &FrameWindow) -> MlResult<Vec<f32>> {
        let url = format!("{}/predict", self.config.base_url);
        let request = PredictRequest {
            width: window.width(),
            height: window.height(),
            frames: window
                .frames()
                .iter()
                .map(|f| STANDARD.encode(f.as_raw()))
                .collect(),
        };

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(MlError::Network)?;
                check_status(response).await
            })
            .await?;

        let body: PredictResponse = response.json().await?;
        if body.probabilities.len() != self.labels.len() {
            return Err(MlError::LabelMismatch {
                expected: self.labels.len(),
                actual: body.probabilities.len(),
            });
        }
        if body.probabilities.iter().any(|p| !p.is_finite()) {
            return Err(MlError::InvalidResponse("non-finite probability".to_string()));
        }
        Ok(body.probabilities)
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> MlResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MlResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "ML request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map non-success statuses to errors; 5xx are retryable.
async fn check_status(response: reqwest::Response) -> MlResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(MlError::ServiceUnavailable(format!("{}: {}", status, body)))
    } else {
        Err(MlError::RequestFailed(format!(
            "ML service returned {}: {}",
            status, body
        )))
    }
}

#[async_trait]
impl ActionClassifier for MlClient {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    async fn infer(&self, window: &FrameWindow) -> MlResult<Vec<f32>> {
        self.predict(window).await
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> MlClientConfig {
        MlClientConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }

    fn window() -> FrameWindow {
        FrameWindow::new(vec![RgbImage::new(64, 64); 10]).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = MlClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8001");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
    }

    #[tokio::test]
    async fn test_connect_loads_labels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/labels"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"labels": ["idle", "fight"]})),
            )
            .mount(&server)
            .await;

        let client = MlClient::connect(config(&server)).await.unwrap();
        assert_eq!(client.labels(), ["idle".to_string(), "fight".to_string()]);
    }

    #[tokio::test]
    async fn test_predict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"probabilities": [0.2, 0.8]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client =
            MlClient::with_labels(config(&server), vec!["idle".into(), "fight".into()]).unwrap();
        let probs = client.infer(&window()).await.unwrap();
        assert_eq!(probs, vec![0.2, 0.8]);
    }

    #[tokio::test]
    async fn test_label_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"probabilities": [1.0]})),
            )
            .mount(&server)
            .await;

        let client =
            MlClient::with_labels(config(&server), vec!["idle".into(), "fight".into()]).unwrap();
        let err = client.infer(&window()).await.unwrap_err();
        assert!(matches!(err, MlError::LabelMismatch { expected: 2, actual: 1 }));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = MlClient::with_labels(config(&server), vec!["idle".into()]).unwrap();
        let err = client.infer(&window()).await.unwrap_err();
        assert!(matches!(err, MlError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad window"))
            .expect(1)
            .mount(&server)
            .await;

        let client = MlClient::with_labels(config(&server), vec!["idle".into()]).unwrap();
        let err = client.infer(&window()).await.unwrap_err();
        assert!(matches!(err, MlError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let client = MlClient::with_labels(config(&server), vec![]).unwrap();
        assert!(client.health_check().await.unwrap());
    }
}
