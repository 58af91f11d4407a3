use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::iteration::IterationResult;

/// Largest iteration count accepted for a single job.
pub const MAX_ITERATIONS: u32 = 50;

/// One request to run N iterations from a seed image.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub seed_image: Vec<u8>,
    pub iterations: u32,
}

impl Job {
    pub fn new(seed_image: Vec<u8>, iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            seed_image,
            iterations,
        }
    }
}

/// Submission form fields, validated before any pipeline work starts.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(length(min = 1, max = 255))]
    pub filename: String,

    #[garde(range(min = 1, max = MAX_ITERATIONS))]
    pub iterations: u32,
}

/// Response for a completed submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub results: Vec<IterationResult>,
}
