use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output of a successful generation: both fields are always present.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub revised_prompt: String,
    /// Short-lived URL hosted by the generation service.
    pub url: String,
}

/// Capability: turn a description into a new image.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, description: &str) -> Option<GeneratedImage>;
}

/// Client for an OpenAI-compatible image generation endpoint.
pub struct OpenAiImageClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    size: String,
    style_prompt: String,
}

#[derive(Debug, Serialize)]
struct ImagesRequest<'a> {
    prompt: String,
    n: u32,
    size: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    revised_prompt: Option<String>,
    url: Option<String>,
}

pub struct OpenAiImageOptions {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub size: String,
    pub style_prompt: String,
    pub timeout: Duration,
}

impl OpenAiImageClient {
    pub fn new(options: OpenAiImageOptions) -> Result<Self, GenerationError> {
        let http = Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            http,
            endpoint: options.endpoint,
            api_key: options.api_key,
            model: options.model,
            size: options.size,
            style_prompt: options.style_prompt,
        })
    }

    pub async fn try_generate(&self, description: &str) -> Result<GeneratedImage, GenerationError> {
        let request = ImagesRequest {
            prompt: format!("{}{}", self.style_prompt, description),
            n: 1,
            size: &self.size,
            model: &self.model,
        };

        tracing::info!(
            endpoint = %self.endpoint,
            model = %self.model,
            prompt = %request.prompt,
            "Requesting image generation"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Image generation call failed");
            return Err(GenerationError::Rejected { status: status.as_u16(), body });
        }

        let parsed: ImagesResponse = response.json().await?;
        extract_image(parsed)
    }
}

/// A partial result (missing prompt or URL) counts as no result at all.
fn extract_image(response: ImagesResponse) -> Result<GeneratedImage, GenerationError> {
    let first = response.data.into_iter().next().ok_or(GenerationError::Incomplete)?;
    match (first.revised_prompt, first.url) {
        (Some(revised_prompt), Some(url)) if !revised_prompt.is_empty() && !url.is_empty() => {
            Ok(GeneratedImage { revised_prompt, url })
        }
        _ => Err(GenerationError::Incomplete),
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageClient {
    async fn generate(&self, description: &str) -> Option<GeneratedImage> {
        match self.try_generate(description).await {
            Ok(image) => {
                tracing::info!(url = %image.url, "Image generation succeeded");
                Some(image)
            }
            Err(e) => {
                tracing::error!(error = %e, "Error generating image");
                None
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Generation response is missing the revised prompt or image URL")]
    Incomplete,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<GeneratedImage, GenerationError> {
        extract_image(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_complete_response() {
        let image = parse(
            r#"{"created":1,"data":[{"revised_prompt":"A woodblock heron","url":"https://img/1.png"}]}"#,
        )
        .unwrap();
        assert_eq!(image.revised_prompt, "A woodblock heron");
        assert_eq!(image.url, "https://img/1.png");
    }

    #[test]
    fn test_missing_url_is_incomplete() {
        let err = parse(r#"{"data":[{"revised_prompt":"A heron"}]}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Incomplete));
    }

    #[test]
    fn test_empty_revised_prompt_is_incomplete() {
        let err = parse(r#"{"data":[{"revised_prompt":"","url":"https://img/1.png"}]}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Incomplete));
    }

    #[test]
    fn test_empty_data_is_incomplete() {
        assert!(matches!(parse(r#"{"data":[]}"#), Err(GenerationError::Incomplete)));
        assert!(matches!(parse(r#"{}"#), Err(GenerationError::Incomplete)));
    }
}
