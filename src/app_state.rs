use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    broadcast::{ProgressBroadcaster, ProgressHub},
    description::{DescriptionError, OllamaClient},
    generation::{GenerationError, OpenAiImageClient, OpenAiImageOptions},
    pipeline::IterationPipeline,
    sink::{AirtableSink, IterationSink, PostgresSink, SinkError, SinkFanout},
    storage::{DurableArtifactStore, S3ObjectStore, StorageError},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub pipeline: Arc<IterationPipeline>,
    pub progress: ProgressHub,
}

impl AppState {
    pub fn new(db: PgPool, pipeline: IterationPipeline, progress: ProgressHub) -> Self {
        Self {
            db,
            pipeline: Arc::new(pipeline),
            progress,
        }
    }
}

/// Build the sink fan-out: PostgreSQL when a pool is given, Airtable when configured.
pub fn build_sinks(config: &AppConfig, db: Option<PgPool>) -> Result<SinkFanout, StartupError> {
    let mut sinks: Vec<Arc<dyn IterationSink>> = Vec::new();

    if let Some(pool) = db {
        sinks.push(Arc::new(PostgresSink::new(pool)));
    }

    match config.airtable_credentials() {
        Some((base_id, api_key)) => {
            sinks.push(Arc::new(AirtableSink::new(
                &config.airtable_api_url,
                base_id,
                &config.airtable_table_name,
                api_key,
                config.request_timeout(),
            )?));
        }
        None => tracing::info!("Airtable credentials not set, tabular sink disabled"),
    }

    let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
    tracing::info!(sinks = ?names, "Iteration sinks configured");

    Ok(SinkFanout::new(sinks, config.sink_timeout()))
}

/// Wire the remote service clients into a pipeline.
pub fn build_pipeline(
    config: &AppConfig,
    sinks: SinkFanout,
    broadcaster: Arc<dyn ProgressBroadcaster>,
) -> Result<IterationPipeline, StartupError> {
    let describer = OllamaClient::new(
        config.ollama_generate_url(),
        &config.ollama_model,
        &config.description_prompt,
        config.request_timeout(),
    )?;

    let generator = OpenAiImageClient::new(OpenAiImageOptions {
        endpoint: config.image_api_endpoint.clone(),
        api_key: config.openai_api_key.clone(),
        model: config.image_model.clone(),
        size: config.image_size.clone(),
        style_prompt: config.style_prompt.clone(),
        timeout: config.request_timeout(),
    })?;

    let object_store = S3ObjectStore::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
    )?;

    let artifacts = DurableArtifactStore::new(
        Arc::new(object_store),
        config.storage_public_url(),
        &config.storage_prefix,
        config.request_timeout(),
    )?;

    Ok(IterationPipeline::new(
        Arc::new(describer),
        Arc::new(generator),
        Arc::new(artifacts),
        Arc::new(sinks),
        broadcaster,
    )
    .with_step_timeout(config.step_timeout()))
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to initialize description client: {0}")]
    Description(#[from] DescriptionError),

    #[error("Failed to initialize generation client: {0}")]
    Generation(#[from] GenerationError),

    #[error("Failed to initialize object storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to initialize sink: {0}")]
    Sink(#[from] SinkError),
}
