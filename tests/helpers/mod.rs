//! Test doubles for the pipeline's injected capabilities and in-process fake servers.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image_iteration::models::iteration::IterationRecord;
use image_iteration::models::progress::ProgressEvent;
use image_iteration::services::broadcast::{BroadcastError, ProgressBroadcaster};
use image_iteration::services::description::ImageDescriber;
use image_iteration::services::generation::{GeneratedImage, ImageGenerator};
use image_iteration::services::pipeline::IterationPipeline;
use image_iteration::services::sink::{IterationSink, SinkError, SinkFanout};
use image_iteration::services::storage::{ArtifactStore, StoredArtifact};

/// Bytes used as the seed image in pipeline tests.
pub const SEED: &[u8] = b"seed-image";

/// Smallest valid PNG header, enough for format sniffing.
pub const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
];

/// Describer that answers from a script, then falls back to `"description N"`.
#[derive(Default)]
pub struct ScriptedDescriber {
    script: Mutex<VecDeque<Option<String>>>,
    inputs: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedDescriber {
    pub fn new(script: Vec<Option<&str>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(|s| s.map(str::to_string)).collect()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Images passed to `describe`, in call order.
    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageDescriber for ScriptedDescriber {
    async fn describe(&self, image: &[u8]) -> Option<String> {
        let call = {
            let mut inputs = self.inputs.lock().unwrap();
            inputs.push(image.to_vec());
            inputs.len()
        };
        match self.script.lock().unwrap().pop_front() {
            Some(answer) => answer,
            None => Some(format!("description {call}")),
        }
    }
}

/// Generator that fails on the listed call numbers (1-based).
#[derive(Default)]
pub struct ScriptedGenerator {
    fail_on: Vec<usize>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn failing_on(fail_on: Vec<usize>) -> Self {
        Self {
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(&self, description: &str) -> Option<GeneratedImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return None;
        }
        Some(GeneratedImage {
            revised_prompt: format!("revised: {description}"),
            url: format!("https://generated.example/{call}.png"),
        })
    }
}

/// Artifact store that returns `stored-N` bytes and fails on listed calls.
#[derive(Default)]
pub struct FakeArtifactStore {
    fail_on: Vec<usize>,
    calls: AtomicUsize,
    sources: Mutex<Vec<String>>,
}

impl FakeArtifactStore {
    pub fn failing_on(fail_on: Vec<usize>) -> Self {
        Self {
            fail_on,
            ..Default::default()
        }
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }
}

/// Bytes the fake store hands back for its `call`-th persist.
pub fn stored_bytes(call: usize) -> Vec<u8> {
    format!("stored-{call}").into_bytes()
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn persist(&self, source_url: &str) -> Option<StoredArtifact> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.sources.lock().unwrap().push(source_url.to_string());
        if self.fail_on.contains(&call) {
            return None;
        }
        Some(StoredArtifact {
            url: format!("https://storage.example/images/{call}.png"),
            bytes: stored_bytes(call),
        })
    }
}

/// Sink that keeps every record it is given.
pub struct RecordingSink {
    name: &'static str,
    records: Mutex<Vec<IterationRecord>>,
}

impl RecordingSink {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            records: Mutex::new(Vec::new()),
        })
    }

    pub fn records(&self) -> Vec<IterationRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl IterationSink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn record(&self, record: &IterationRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Sink that always rejects.
pub struct FailingSink;

#[async_trait]
impl IterationSink for FailingSink {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn record(&self, _record: &IterationRecord) -> Result<(), SinkError> {
        Err(SinkError::Rejected {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

/// Sink that panics mid-write.
pub struct PanickingSink;

#[async_trait]
impl IterationSink for PanickingSink {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn record(&self, _record: &IterationRecord) -> Result<(), SinkError> {
        panic!("backend exploded");
    }
}

/// Sink that never finishes.
pub struct HangingSink;

#[async_trait]
impl IterationSink for HangingSink {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn record(&self, _record: &IterationRecord) -> Result<(), SinkError> {
        futures::future::pending::<()>().await;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingBroadcaster {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressBroadcaster for RecordingBroadcaster {
    fn publish(&self, event: ProgressEvent) -> Result<usize, BroadcastError> {
        self.events.lock().unwrap().push(event);
        Ok(1)
    }
}

pub struct FailingBroadcaster;

impl ProgressBroadcaster for FailingBroadcaster {
    fn publish(&self, _event: ProgressEvent) -> Result<usize, BroadcastError> {
        Err(BroadcastError::NoSubscribers)
    }
}

/// Everything a pipeline test needs to inspect after a run.
pub struct Harness {
    pub describer: Arc<ScriptedDescriber>,
    pub generator: Arc<ScriptedGenerator>,
    pub artifacts: Arc<FakeArtifactStore>,
    pub primary: Arc<RecordingSink>,
    pub secondary: Arc<RecordingSink>,
    pub broadcaster: Arc<RecordingBroadcaster>,
}

impl Harness {
    pub fn new(
        describer: ScriptedDescriber,
        generator: ScriptedGenerator,
        artifacts: FakeArtifactStore,
    ) -> Self {
        Self {
            describer: Arc::new(describer),
            generator: Arc::new(generator),
            artifacts: Arc::new(artifacts),
            primary: RecordingSink::new("primary"),
            secondary: RecordingSink::new("secondary"),
            broadcaster: Arc::new(RecordingBroadcaster::default()),
        }
    }

    pub fn healthy() -> Self {
        Self::new(
            ScriptedDescriber::default(),
            ScriptedGenerator::default(),
            FakeArtifactStore::default(),
        )
    }

    pub fn pipeline(&self) -> IterationPipeline {
        let primary: Arc<dyn IterationSink> = self.primary.clone();
        let secondary: Arc<dyn IterationSink> = self.secondary.clone();
        let sinks = vec![primary, secondary];
        IterationPipeline::new(
            self.describer.clone(),
            self.generator.clone(),
            self.artifacts.clone(),
            Arc::new(SinkFanout::new(sinks, Duration::from_secs(5))),
            self.broadcaster.clone(),
        )
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Listener has no address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server failed");
    });
    format!("http://{addr}")
}
