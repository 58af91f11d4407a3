use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:5001").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Only needed when iterations are recorded.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Base URL of the Ollama server hosting the vision model
    pub ollama_host: String,

    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,

    /// Instruction sent alongside every image to the vision model
    #[serde(default = "default_description_prompt")]
    pub description_prompt: String,

    /// OpenAI API key for image generation
    pub openai_api_key: String,

    #[serde(default = "default_image_api_endpoint")]
    pub image_api_endpoint: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_image_size")]
    pub image_size: String,

    /// Prefix prepended to each description before generation
    #[serde(default = "default_style_prompt")]
    pub style_prompt: String,

    /// Object storage bucket name
    pub storage_bucket: String,

    /// S3-compatible endpoint URL
    pub storage_endpoint: String,

    /// S3-compatible access key ID
    pub storage_access_key: String,

    /// S3-compatible secret access key
    pub storage_secret_key: String,

    /// Public base URL for stored images. Defaults to the GCS public URL of the bucket.
    #[serde(default)]
    pub storage_public_url: Option<String>,

    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,

    /// Airtable sink is enabled only when both base id and API key are set
    #[serde(default)]
    pub airtable_base_id: Option<String>,

    #[serde(default)]
    pub airtable_api_key: Option<String>,

    #[serde(default = "default_airtable_table_name")]
    pub airtable_table_name: String,

    #[serde(default = "default_airtable_api_url")]
    pub airtable_api_url: String,

    /// Timeout applied to every outbound HTTP request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound on a single pipeline step, in seconds
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Upper bound on a single sink write, in seconds
    #[serde(default = "default_sink_timeout_secs")]
    pub sink_timeout_secs: u64,

    /// Allowed CORS origin. Permissive when unset.
    #[serde(default)]
    pub cors_origin: Option<String>,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5001".to_string()
}

fn default_ollama_model() -> String {
    "llava".to_string()
}

fn default_description_prompt() -> String {
    "Describe this image with as much detail as possible, be specific in the style, emotion and activity in the image".to_string()
}

fn default_image_api_endpoint() -> String {
    "https://api.openai.com/v1/images/generations".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

fn default_style_prompt() -> String {
    "Create the following description of the image in Ukiyo-e style: ".to_string()
}

fn default_storage_prefix() -> String {
    "images".to_string()
}

fn default_airtable_table_name() -> String {
    "iterations".to_string()
}

fn default_airtable_api_url() -> String {
    "https://api.airtable.com/v0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_step_timeout_secs() -> u64 {
    180
}

fn default_sink_timeout_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    /// Full URL of the streaming generate endpoint on the Ollama host.
    pub fn ollama_generate_url(&self) -> String {
        format!("{}/api/generate", self.ollama_host.trim_end_matches('/'))
    }

    pub fn storage_public_url(&self) -> String {
        match &self.storage_public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://storage.googleapis.com/{}", self.storage_bucket),
        }
    }

    /// Returns `(base_id, api_key)` when the Airtable sink is configured.
    pub fn airtable_credentials(&self) -> Option<(&str, &str)> {
        match (&self.airtable_base_id, &self.airtable_api_key) {
            (Some(base), Some(key)) if !base.is_empty() && !key.is_empty() => {
                Some((base.as_str(), key.as_str()))
            }
            _ => None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}
