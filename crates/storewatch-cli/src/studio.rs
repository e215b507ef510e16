//! Image studio: describe a product photo with Gemini, then render a new
//! image from that description with a Hugging Face text-to-image model.

use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use serde_json::{json, Value};
use std::io::Cursor;
use thiserror::Error;

use crate::config::Config;

const ANALYSIS_PROMPT: &str = "\
Analyze this image in great detail. Please provide:
1. A comprehensive description of all visible elements
2. Information about people, their appearance, expressions, and activities
3. Details about the environment, setting, and background
4. Analysis of colors, lighting, mood, and composition
5. Any notable objects and their significance
6. Overall context and meaning if apparent

Be thorough and descriptive, providing at least 150 words of analysis.";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("{0} is not set")]
    MissingKey(&'static str),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} returned {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("analysis blocked: {0}")]
    Blocked(String),
    #[error("analysis response had no text")]
    EmptyResponse,
}

pub struct Studio {
    client: reqwest::Client,
    gemini_endpoint: String,
    gemini_model: String,
    gemini_key: String,
    hf_endpoint: String,
    hf_model: String,
    hf_key: String,
}

impl Studio {
    /// Build a client from the config and the `GEMINI_API_KEY` /
    /// `HUGGINGFACE_API_KEY` environment variables.
    pub fn from_env(config: &Config) -> Result<Self, StudioError> {
        let key = |name: &'static str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(StudioError::MissingKey(name))
        };
        Ok(Self {
            client: reqwest::Client::new(),
            gemini_endpoint: config.gemini_endpoint.trim_end_matches('/').to_string(),
            gemini_model: config.gemini_model.clone(),
            gemini_key: key("GEMINI_API_KEY")?,
            hf_endpoint: config.hf_endpoint.trim_end_matches('/').to_string(),
            hf_model: config.hf_model.clone(),
            hf_key: key("HUGGINGFACE_API_KEY")?,
        })
    }

    /// Ask Gemini for a detailed description of `image`.
    pub async fn analyze(&self, image: &DynamicImage) -> Result<String, StudioError> {
        let png = encode_png(image)?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.gemini_endpoint, self.gemini_model
        );
        tracing::info!(model = %self.gemini_model, bytes = png.len(), "requesting analysis");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.gemini_key)
            .json(&analysis_request(&png))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StudioError::Api {
                service: "gemini",
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        parse_analysis(&body)
    }

    /// Render an image from a text prompt. Returns the encoded image bytes
    /// as sent by the inference endpoint.
    pub async fn generate(&self, prompt: &str) -> Result<Vec<u8>, StudioError> {
        let url = format!("{}/{}", self.hf_endpoint, self.hf_model);
        tracing::info!(model = %self.hf_model, "requesting text-to-image");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.hf_key)
            .json(&json!({ "inputs": prompt }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StudioError::Api {
                service: "huggingface",
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        tracing::debug!(bytes = bytes.len(), "received generated image");
        Ok(bytes.to_vec())
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, StudioError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// `generateContent` body: the prompt, the image inline, sampling settings
/// and relaxed safety thresholds.
fn analysis_request(png: &[u8]) -> Value {
    let safety: Vec<Value> = SAFETY_CATEGORIES
        .iter()
        .map(|c| json!({ "category": c, "threshold": "BLOCK_ONLY_HIGH" }))
        .collect();

    json!({
        "contents": [{
            "parts": [
                { "text": ANALYSIS_PROMPT },
                {
                    "inline_data": {
                        "mime_type": "image/png",
                        "data": base64::engine::general_purpose::STANDARD.encode(png),
                    }
                }
            ]
        }],
        "generationConfig": {
            "temperature": 0.8,
            "topP": 0.95,
            "topK": 40,
            "maxOutputTokens": 1024,
        },
        "safetySettings": safety,
    })
}

/// Concatenate the text parts of the first candidate.
fn parse_analysis(body: &Value) -> Result<String, StudioError> {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(StudioError::Blocked(reason.to_string()));
    }

    let text: String = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(StudioError::EmptyResponse);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_request_shape() {
        let body = analysis_request(&[1, 2, 3]);
        assert_eq!(body["contents"][0]["parts"][0]["text"], ANALYSIS_PROMPT);
        assert_eq!(body["contents"][0]["parts"][1]["inline_data"]["data"], "AQID");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        let safety = body["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), 4);
        assert!(safety.iter().all(|s| s["threshold"] == "BLOCK_ONLY_HIGH"));
    }

    #[test]
    fn test_parse_analysis_joins_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "A gold " }, { "text": "necklace." }] }
            }]
        });
        assert_eq!(parse_analysis(&body).unwrap(), "A gold necklace.");
    }

    #[test]
    fn test_parse_analysis_blocked_and_empty() {
        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(matches!(parse_analysis(&blocked), Err(StudioError::Blocked(r)) if r == "SAFETY"));
        assert!(matches!(parse_analysis(&json!({})), Err(StudioError::EmptyResponse)));
    }

    #[test]
    fn test_encode_png_signature() {
        let img = DynamicImage::new_rgb8(2, 2);
        let png = encode_png(&img).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
