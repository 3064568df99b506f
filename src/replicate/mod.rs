//! Replicate API client
//!
//! Provides:
//! - Prediction creation for versioned and unversioned models
//! - Polling until the prediction reaches a terminal state

use std::fmt;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ReplicateConfig;

/// Replicate client errors
#[derive(Debug, Error)]
pub enum ReplicateError {
    #[error("Replicate API token not configured")]
    NotConfigured,

    #[error("invalid model identifier: {0}")]
    InvalidModel(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("prediction failed: {0}")]
    PredictionFailed(String),

    #[error("prediction was canceled")]
    Canceled,

    #[error("prediction is missing its poll URL")]
    MissingPollUrl,

    #[error("prediction did not finish within {0:?}")]
    Timeout(Duration),
}

/// A model identifier, `owner/name` with an optional `:version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub owner: String,
    pub name: String,
    pub version: Option<String>,
}

impl ModelRef {
    /// Parse `owner/name[:version]`
    pub fn parse(id: &str) -> Result<Self, ReplicateError> {
        let invalid = || ReplicateError::InvalidModel(id.to_string());

        let (path, version) = match id.trim().split_once(':') {
            Some((path, version)) => (path, Some(version)),
            None => (id.trim(), None),
        };
        let (owner, name) = path.split_once('/').ok_or_else(invalid)?;

        let valid_part = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid_part(owner) || !valid_part(name) {
            return Err(invalid());
        }
        if let Some(version) = version {
            if version.is_empty() || !version.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(invalid());
            }
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)?;
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

/// Prediction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    /// A status this client does not know, treated as a failure
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PredictionStatus::Starting | PredictionStatus::Processing)
    }
}

/// Prediction as returned by the API
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub urls: Option<PredictionUrls>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionUrls {
    #[serde(default)]
    pub get: Option<String>,
}

/// Create-prediction request body
#[derive(Debug, Serialize)]
struct CreatePrediction<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    input: &'a Value,
}

/// Error body returned by the API
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    detail: Option<String>,
}

/// Replicate client
#[derive(Debug)]
pub struct ReplicateClient {
    /// HTTP client
    client: Client,
    /// API token
    api_token: Option<String>,
    /// API base URL
    base_url: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl ReplicateClient {
    /// Create a client from configuration
    pub fn new(config: &ReplicateConfig) -> Result<Self, ReplicateError> {
        Ok(Self {
            client: Client::builder()
                .timeout(config.request_timeout())
                .build()?,
            api_token: config.token().map(str::to_string),
            base_url: config.api_base.trim().trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
        })
    }

    /// Check if API token is configured
    pub fn is_configured(&self) -> bool {
        self.api_token.is_some()
    }

    /// Run a model and wait for its output
    pub async fn run(&self, model: &ModelRef, input: &Value) -> Result<Value, ReplicateError> {
        let prediction = self.create_prediction(model, input).await?;
        let prediction = self.wait(prediction).await?;

        match prediction.status {
            PredictionStatus::Succeeded => Ok(prediction.output.unwrap_or(Value::Null)),
            PredictionStatus::Canceled => Err(ReplicateError::Canceled),
            PredictionStatus::Unknown => Err(ReplicateError::PredictionFailed(
                "unrecognized prediction status".to_string(),
            )),
            _ => Err(ReplicateError::PredictionFailed(
                prediction
                    .error
                    .map(|e| match e {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }

    /// Endpoint a prediction for this model is created at
    fn predictions_endpoint(&self, model: &ModelRef) -> String {
        match model.version {
            Some(_) => format!("{}/predictions", self.base_url),
            None => format!(
                "{}/models/{}/{}/predictions",
                self.base_url, model.owner, model.name
            ),
        }
    }

    /// Create a prediction
    ///
    /// `Prefer: wait` lets the API hold the connection until the prediction
    /// finishes, so fast models never need a poll.
    pub async fn create_prediction(
        &self,
        model: &ModelRef,
        input: &Value,
    ) -> Result<Prediction, ReplicateError> {
        let api_token = self
            .api_token
            .as_ref()
            .ok_or(ReplicateError::NotConfigured)?;

        let endpoint = self.predictions_endpoint(model);
        debug!("Creating Replicate prediction for {} at {}", model, endpoint);

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(api_token)
            .header("Prefer", "wait")
            .json(&CreatePrediction {
                version: model.version.as_deref(),
                input,
            })
            .send()
            .await?;

        let prediction: Prediction = Self::check(response).await?.json().await?;
        debug!(
            "Prediction {} created with status {:?}",
            prediction.id, prediction.status
        );
        Ok(prediction)
    }

    /// Fetch a prediction by its poll URL
    pub async fn get_prediction(&self, url: &str) -> Result<Prediction, ReplicateError> {
        let api_token = self
            .api_token
            .as_ref()
            .ok_or(ReplicateError::NotConfigured)?;

        let response = self.client.get(url).bearer_auth(api_token).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Poll until the prediction reaches a terminal state
    async fn wait(&self, mut prediction: Prediction) -> Result<Prediction, ReplicateError> {
        let started = Instant::now();

        while !prediction.status.is_terminal() {
            if started.elapsed() >= self.poll_timeout {
                warn!(
                    "Prediction {} still {:?} after {:?}",
                    prediction.id, prediction.status, self.poll_timeout
                );
                return Err(ReplicateError::Timeout(self.poll_timeout));
            }
            tokio::time::sleep(self.poll_interval).await;

            let poll_url = prediction
                .urls
                .as_ref()
                .and_then(|urls| urls.get.clone())
                .filter(|url| !url.trim().is_empty())
                .ok_or(ReplicateError::MissingPollUrl)?;

            prediction = self.get_prediction(&poll_url).await?;
            debug!("Prediction {} is {:?}", prediction.id, prediction.status);
        }

        Ok(prediction)
    }

    /// Turn a non-success response into an API error
    async fn check(response: Response) -> Result<Response, ReplicateError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!("Replicate API error: {} - {}", status, body);

        let detail = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.detail)
            .unwrap_or_else(|| body.chars().take(512).collect());

        Err(ReplicateError::Api {
            status: status.as_u16(),
            detail,
        })
    }
}
