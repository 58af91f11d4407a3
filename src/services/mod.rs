pub mod broadcast;
pub mod description;
pub mod generation;
pub mod pipeline;
pub mod sink;
pub mod storage;
pub mod upload;
