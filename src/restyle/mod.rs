//! Re-upholstery pipeline
//!
//! Sends the couch photo (structural reference) and the fabric swatch
//! (style reference) to a ControlNet + IP-Adapter model and returns the
//! URL of the generated photo.

mod image;

pub use image::{ImageError, ImageRef};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::replicate::{ModelRef, ReplicateClient, ReplicateError};

/// Which uploaded image a validation error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Couch,
    Fabric,
}

impl ImageRole {
    pub fn label(&self) -> &'static str {
        match self {
            ImageRole::Couch => "couch image",
            ImageRole::Fabric => "fabric image",
        }
    }
}

/// Generation errors
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Both couch and fabric images are required")]
    MissingImages,

    #[error("{} must be an image: {source}", .role.label())]
    InvalidImage { role: ImageRole, source: ImageError },

    #[error("Replicate API token not configured")]
    NotConfigured,

    #[error(transparent)]
    Provider(#[from] ReplicateError),

    #[error("unexpected response format from Replicate: {0}")]
    UnexpectedOutput(String),
}

/// Fixed parameter set sent to the model
///
/// Tile ControlNet keeps the couch's shape and stitching detail while
/// IP-Adapter Plus carries the fabric's texture over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Replicate model identifier, `owner/name[:version]`
    pub model: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub ip_adapter_ckpt: String,
    pub controlnet_type: String,
    pub controlnet_conditioning_scale: f64,
    pub ip_adapter_weight: f64,
    pub num_inference_steps: u32,
    pub guidance_scale: f64,
    pub seed: i64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "usamaehsan/controlnet-x-ip-adapter-realistic-vision-v5:7e68116d1d2cc0efa9013d9010f663e7fc6ca53ea6442bf5c56d30cc7a3833cd".to_string(),
            prompt: "the same couch with new fabric upholstery, exact same shape and proportions, fabric texture applied to furniture, photorealistic interior photography, high quality, sharp details".to_string(),
            negative_prompt: "different couch, different shape, distorted, deformed, blurry, low quality, cartoon, drawing, painting, sketch, anime, extra furniture, missing parts".to_string(),
            ip_adapter_ckpt: "ip-adapter-plus_sd15.bin".to_string(),
            controlnet_type: "tile".to_string(),
            controlnet_conditioning_scale: 1.1,
            ip_adapter_weight: 0.85,
            num_inference_steps: 35,
            guidance_scale: 7.0,
            seed: 0,
        }
    }
}

/// Validate the two submitted images
///
/// Absent, null, `false`, `0` and blank values all count as missing and are
/// reported together; anything else that is not an image names the field.
pub fn validate_images(
    couch: Option<&Value>,
    fabric: Option<&Value>,
) -> Result<(ImageRef, ImageRef), GenerateError> {
    let couch = couch.filter(|v| is_present(v));
    let fabric = fabric.filter(|v| is_present(v));
    let (Some(couch), Some(fabric)) = (couch, fabric) else {
        return Err(GenerateError::MissingImages);
    };

    Ok((
        parse_image(ImageRole::Couch, couch)?,
        parse_image(ImageRole::Fabric, fabric)?,
    ))
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn parse_image(role: ImageRole, value: &Value) -> Result<ImageRef, GenerateError> {
    value
        .as_str()
        .ok_or(ImageError::NotAString)
        .and_then(ImageRef::parse)
        .map_err(|source| GenerateError::InvalidImage { role, source })
}

/// Build the model input object
pub fn build_input(params: &GenerationParams, couch: &ImageRef, fabric: &ImageRef) -> Value {
    json!({
        "prompt": params.prompt,
        "negative_prompt": params.negative_prompt,
        "image": couch.as_str(),
        "ip_adapter_image": fabric.as_str(),
        "ip_adapter_ckpt": params.ip_adapter_ckpt,
        "controlnet_type": params.controlnet_type,
        "controlnet_conditioning_scale": params.controlnet_conditioning_scale,
        "ip_adapter_weight": params.ip_adapter_weight,
        "num_inference_steps": params.num_inference_steps,
        "guidance_scale": params.guidance_scale,
        "seed": params.seed,
    })
}

/// Pull the image URL out of a prediction's output
///
/// The model returns either a list of URLs or a single URL.
pub fn extract_image_url(output: &Value) -> Result<String, GenerateError> {
    match output {
        Value::String(url) => Ok(url.clone()),
        Value::Array(items) => match items.first() {
            Some(Value::String(url)) => Ok(url.clone()),
            Some(other) => Err(GenerateError::UnexpectedOutput(format!(
                "first output element is not a string: {}",
                other
            ))),
            None => Err(GenerateError::UnexpectedOutput(
                "empty output list".to_string(),
            )),
        },
        other => Err(GenerateError::UnexpectedOutput(other.to_string())),
    }
}

/// Re-upholster the couch with the fabric
///
/// Returns the generated image URL.
pub async fn restyle(
    client: &ReplicateClient,
    model: &ModelRef,
    params: &GenerationParams,
    couch: &ImageRef,
    fabric: &ImageRef,
) -> Result<String, GenerateError> {
    if !client.is_configured() {
        return Err(GenerateError::NotConfigured);
    }

    debug!(
        "Restyling couch ({}) with fabric ({}) using {}",
        couch.mime_type().unwrap_or("url"),
        fabric.mime_type().unwrap_or("url"),
        model
    );

    let output = client.run(model, &build_input(params, couch, fabric)).await?;
    let image_url = extract_image_url(&output)?;

    info!("Generated image at {}", image_url);
    Ok(image_url)
}
