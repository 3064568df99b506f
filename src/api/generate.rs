//! Generation endpoint
//!
//! POST /api/generate - Re-upholster a couch photo with a fabric swatch

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::AppState;
use crate::restyle::{self, GenerateError};

/// Build the generate router
pub fn router() -> Router<AppState> {
    Router::new().route("/api/generate", post(generate))
}

/// Generation request
///
/// Fields are loose JSON values so that a missing, null, `false` or empty
/// image all get the same 400. Type checking happens in validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub couch_image: Option<Value>,
    #[serde(default)]
    pub fabric_image: Option<Value>,
}

/// Generation response
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub image: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    fn new(status: StatusCode, error: impl Into<String>) -> Response {
        (
            status,
            Json(ErrorResponse {
                error: error.into(),
            }),
        )
            .into_response()
    }
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        match self {
            GenerateError::MissingImages | GenerateError::InvalidImage { .. } => {
                ErrorResponse::new(StatusCode::BAD_REQUEST, self.to_string())
            }
            GenerateError::NotConfigured => {
                ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            // Provider detail stays in the logs
            _ => ErrorResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate image",
            ),
        }
    }
}

/// Generate a re-upholstered couch image
///
/// The body is read as raw bytes and parsed as JSON whatever the
/// content type says.
async fn generate(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            warn!("Rejected generate request body: {}", rejection.body_text());
            return ErrorResponse::new(StatusCode::PAYLOAD_TOO_LARGE, "Images are too large");
        }
        Err(rejection) => {
            warn!("Rejected generate request body: {}", rejection.body_text());
            return ErrorResponse::new(StatusCode::BAD_REQUEST, "Invalid request body");
        }
    };

    let req: GenerateRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            warn!("Malformed generate request body: {}", e);
            return ErrorResponse::new(StatusCode::BAD_REQUEST, "Invalid request body");
        }
    };

    let request_id = Uuid::new_v4();
    let span = info_span!("generate", %request_id);

    async move {
        let (couch, fabric) =
            match restyle::validate_images(req.couch_image.as_ref(), req.fabric_image.as_ref()) {
                Ok(images) => images,
                Err(e) => {
                    info!("Invalid generate request: {}", e);
                    return e.into_response();
                }
            };

        let result =
            restyle::restyle(&state.replicate, &state.model, &state.params, &couch, &fabric).await;
        match result {
            Ok(image) => (StatusCode::OK, Json(GenerateResponse { image })).into_response(),
            Err(e) => {
                error!("Generation error: {}", e);
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}
