pub mod iteration;
pub mod job;
pub mod progress;
