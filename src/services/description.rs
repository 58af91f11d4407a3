use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capability: turn an image into a text description.
///
/// Implementations never fail past this boundary; any error becomes `None`.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    async fn describe(&self, image: &[u8]) -> Option<String>;
}

/// Client for a LLaVA-style vision model served by Ollama.
pub struct OllamaClient {
    http: Client,
    endpoint: String,
    model: String,
    prompt: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
}

/// One line of the streamed response.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DescriptionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            prompt: prompt.into(),
        })
    }

    /// Stream a description for `image_bytes`, concatenating fragments until `done`.
    pub async fn try_describe(&self, image_bytes: &[u8]) -> Result<String, DescriptionError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);

        tracing::info!(
            endpoint = %self.endpoint,
            model = %self.model,
            image = %truncate(&encoded, 30),
            "Requesting image description"
        );

        let body = GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: vec![encoded],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        let mut assembler = DescriptionAssembler::default();

        while let Some(chunk) = stream.next().await {
            if assembler.push(&chunk?)? {
                break;
            }
        }

        assembler.finish()
    }
}

#[async_trait]
impl ImageDescriber for OllamaClient {
    async fn describe(&self, image: &[u8]) -> Option<String> {
        match self.try_describe(image).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(error = %e, "Error getting image description");
                None
            }
        }
    }
}

/// Accumulates newline-delimited JSON chunks whose boundaries need not align
/// with network reads.
#[derive(Debug, Default)]
pub struct DescriptionAssembler {
    pending: Vec<u8>,
    text: String,
    done: bool,
}

impl DescriptionAssembler {
    /// Feed raw bytes. Returns `true` once the completion line has been seen.
    pub fn push(&mut self, bytes: &[u8]) -> Result<bool, DescriptionError> {
        if self.done {
            return Ok(true);
        }
        self.pending.extend_from_slice(bytes);

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if self.consume_line(&line)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flush any trailing unterminated line and return the trimmed description.
    pub fn finish(mut self) -> Result<String, DescriptionError> {
        if !self.done && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.consume_line(&line)?;
        }
        let text = self.text.trim();
        if text.is_empty() {
            return Err(DescriptionError::Empty);
        }
        Ok(text.to_string())
    }

    fn consume_line(&mut self, line: &[u8]) -> Result<bool, DescriptionError> {
        let line = trim_ascii(line);
        if line.is_empty() {
            return Ok(false);
        }
        let chunk: StreamChunk = serde_json::from_slice(line)?;
        if let Some(message) = chunk.error {
            return Err(DescriptionError::Model(message));
        }
        self.text.push_str(&chunk.response);
        if chunk.done {
            self.done = true;
        }
        Ok(self.done)
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &bytes[start..end]
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode description stream: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Vision model returned an error: {0}")]
    Model(String),

    #[error("Vision model returned an empty description")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_concatenate_until_done() {
        let mut assembler = DescriptionAssembler::default();
        let stream = concat!(
            "{\"response\":\" A crane\",\"done\":false}\n",
            "{\"response\":\" over water.\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
            "{\"response\":\" ignored\",\"done\":false}\n",
        );
        assert!(assembler.push(stream.as_bytes()).unwrap());
        assert_eq!(assembler.finish().unwrap(), "A crane over water.");
    }

    #[test]
    fn test_lines_split_across_reads() {
        let mut assembler = DescriptionAssembler::default();
        assert!(!assembler.push(b"{\"response\":\"Mount").unwrap());
        assert!(!assembler.push(b" Fuji\",\"done\":false}\n{\"resp").unwrap());
        assert!(assembler.push(b"onse\":\"\",\"done\":true}\n").unwrap());
        assert_eq!(assembler.finish().unwrap(), "Mount Fuji");
    }

    #[test]
    fn test_trailing_line_without_newline() {
        let mut assembler = DescriptionAssembler::default();
        assembler
            .push(b"{\"response\":\"waves\",\"done\":true}")
            .unwrap();
        assert_eq!(assembler.finish().unwrap(), "waves");
    }

    #[test]
    fn test_done_with_no_text_is_empty() {
        let mut assembler = DescriptionAssembler::default();
        assembler.push(b"{\"response\":\"  \",\"done\":true}\n").unwrap();
        assert!(matches!(assembler.finish(), Err(DescriptionError::Empty)));
    }

    #[test]
    fn test_malformed_line_is_decode_error() {
        let mut assembler = DescriptionAssembler::default();
        let err = assembler.push(b"not json\n").unwrap_err();
        assert!(matches!(err, DescriptionError::Decode(_)));
    }

    #[test]
    fn test_error_field_is_model_error() {
        let mut assembler = DescriptionAssembler::default();
        let err = assembler
            .push(b"{\"error\":\"model 'llava' not found\"}\n")
            .unwrap_err();
        assert!(matches!(err, DescriptionError::Model(m) if m.contains("not found")));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
