//! Iterative image transformation pipeline.
//!
//! Starting from a seed image, each iteration asks a vision model to describe
//! the current image, asks a generative model for a new image from that
//! description, copies the result into durable object storage, records the
//! step to every configured sink and pushes progress to live WebSocket
//! observers. The new image feeds the next iteration.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
