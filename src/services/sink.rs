//! Iteration record sinks.
//!
//! Each completed iteration is written independently to every configured
//! backend. Backends are at-least-once and best-effort: one failing (or
//! panicking) backend never prevents the others from being attempted, and the
//! pipeline treats the outcomes as informational only.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::db::queries;
use crate::models::iteration::IterationRecord;

/// A backend that durably records iteration metadata.
#[async_trait]
pub trait IterationSink: Send + Sync {
    /// Short backend name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn record(&self, record: &IterationRecord) -> Result<(), SinkError>;
}

/// Result of writing one record to one backend.
#[derive(Debug)]
pub struct SinkOutcome {
    pub backend: &'static str,
    pub result: Result<(), SinkError>,
}

impl SinkOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fans a record out to every configured sink.
pub struct SinkFanout {
    sinks: Vec<Arc<dyn IterationSink>>,
    timeout: Duration,
}

impl SinkFanout {
    pub fn new(sinks: Vec<Arc<dyn IterationSink>>, timeout: Duration) -> Self {
        Self { sinks, timeout }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Duration::from_secs(30))
    }

    /// Write `record` to all sinks concurrently and report each outcome.
    ///
    /// Every write runs on its own task so a panic inside one backend is
    /// reported as that backend's failure.
    pub async fn record(&self, record: &IterationRecord) -> Vec<SinkOutcome> {
        let handles: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| {
                let sink = Arc::clone(sink);
                let record = record.clone();
                let timeout = self.timeout;
                let backend = sink.name();
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(timeout, sink.record(&record)).await {
                        Ok(result) => result,
                        Err(_) => Err(SinkError::Timeout(timeout)),
                    }
                });
                (backend, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (backend, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SinkError::Panicked(e.to_string())),
            };

            match &result {
                Ok(()) => tracing::info!(
                    backend,
                    job_id = %record.job_id,
                    iteration = record.iteration_number,
                    "Iteration recorded"
                ),
                Err(e) => {
                    metrics::counter!("sink_failures_total", "backend" => backend).increment(1);
                    tracing::error!(
                        backend,
                        job_id = %record.job_id,
                        iteration = record.iteration_number,
                        error = %e,
                        "Failed to record iteration"
                    );
                }
            }

            outcomes.push(SinkOutcome { backend, result });
        }
        outcomes
    }
}

/// Durable relational store.
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IterationSink for PostgresSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn record(&self, record: &IterationRecord) -> Result<(), SinkError> {
        queries::insert_iteration(&self.pool, record).await?;
        Ok(())
    }
}

/// External tabular record service (Airtable REST API).
pub struct AirtableSink {
    http: Client,
    table_url: String,
    api_key: String,
    // The service rate-limits per base; writes from parallel jobs go one at a time.
    write_lock: Mutex<()>,
}

#[derive(Debug, Serialize)]
struct AirtableCreate<'a> {
    fields: AirtableFields<'a>,
    typecast: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct AirtableFields<'a> {
    #[serde(rename = "Job ID")]
    job_id: String,
    #[serde(rename = "Iteration Number")]
    iteration_number: u32,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Description")]
    description: &'a str,
    #[serde(rename = "Image URL")]
    image_url: &'a str,
    #[serde(rename = "Revised Prompt")]
    revised_prompt: &'a str,
}

impl<'a> From<&'a IterationRecord> for AirtableFields<'a> {
    fn from(record: &'a IterationRecord) -> Self {
        Self {
            job_id: record.job_id.to_string(),
            iteration_number: record.iteration_number,
            timestamp: record.timestamp.to_rfc3339(),
            description: &record.description,
            image_url: &record.image_url,
            revised_prompt: &record.revised_prompt,
        }
    }
}

impl AirtableSink {
    pub fn new(
        api_url: &str,
        base_id: &str,
        table_name: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            table_url: format!("{}/{}/{}", api_url.trim_end_matches('/'), base_id, table_name),
            api_key: api_key.into(),
            write_lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl IterationSink for AirtableSink {
    fn name(&self) -> &'static str {
        "airtable"
    }

    async fn record(&self, record: &IterationRecord) -> Result<(), SinkError> {
        let body = AirtableCreate {
            fields: AirtableFields::from(record),
            typecast: true,
        };

        let _guard = self.write_lock.lock().await;
        let response = self
            .http
            .post(&self.table_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Database write failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Record service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Sink write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sink task panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn test_airtable_field_names() {
        let record = IterationRecord {
            job_id: Uuid::nil(),
            iteration_number: 4,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            description: "a fox".to_string(),
            image_url: "https://storage.googleapis.com/b/images/a.png".to_string(),
            revised_prompt: "an ukiyo-e fox".to_string(),
        };

        let value = serde_json::to_value(AirtableFields::from(&record)).unwrap();
        assert_eq!(value["Job ID"], Uuid::nil().to_string());
        assert_eq!(value["Iteration Number"], 4);
        assert_eq!(value["Timestamp"], "2024-05-01T12:30:00+00:00");
        assert_eq!(value["Description"], "a fox");
        assert_eq!(value["Image URL"], "https://storage.googleapis.com/b/images/a.png");
        assert_eq!(value["Revised Prompt"], "an ukiyo-e fox");
    }

    #[test]
    fn test_table_url() {
        let sink = AirtableSink::new(
            "https://api.airtable.com/v0/",
            "appABC",
            "iterations",
            "pat",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(sink.table_url, "https://api.airtable.com/v0/appABC/iterations");
    }

    #[tokio::test]
    async fn test_empty_fanout_reports_nothing() {
        let record = IterationRecord {
            job_id: Uuid::new_v4(),
            iteration_number: 1,
            timestamp: Utc::now(),
            description: String::new(),
            image_url: String::new(),
            revised_prompt: String::new(),
        };
        assert!(SinkFanout::empty().record(&record).await.is_empty());
    }
}
