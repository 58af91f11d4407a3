use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed describe → generate → persist cycle, as returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationResult {
    pub iteration_number: u32,
    pub description: String,
    pub image_url: String,
    pub revised_prompt: String,
    pub timestamp: DateTime<Utc>,
}

/// Immutable record handed to every iteration sink.
///
/// The timestamp is taken once per iteration so that every backend stores the
/// same instant for a given `(job_id, iteration_number)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationRecord {
    pub job_id: Uuid,
    pub iteration_number: u32,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub image_url: String,
    pub revised_prompt: String,
}

impl IterationRecord {
    pub fn new(job_id: Uuid, result: &IterationResult) -> Self {
        Self {
            job_id,
            iteration_number: result.iteration_number,
            timestamp: result.timestamp,
            description: result.description.clone(),
            image_url: result.image_url.clone(),
            revised_prompt: result.revised_prompt.clone(),
        }
    }
}

/// Row of the `iterations` table.
///
/// `title`, `tags` and `short_description` are filled in by processes outside
/// the pipeline and are usually empty for fresh rows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredIteration {
    pub id: i64,
    pub job_id: Uuid,
    pub iteration_number: i32,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub image_url: String,
    pub revised_prompt: String,
    pub title: Option<String>,
    pub tags: Option<String>,
    pub short_description: Option<String>,
}
