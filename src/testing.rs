//! Scripted gateway and fetcher for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::gateway::{GatewayError, GatewayRequest, GatewayResponse, GenerativeGateway, ImageFetcher};
use crate::models::{ImageData, Stage};

/// Answers each call from a per-stage queue and records every request.
/// A held stage waits until [`ScriptedGateway::release`] is called.
#[derive(Default)]
pub struct ScriptedGateway {
    responses: Mutex<HashMap<Stage, VecDeque<Result<GatewayResponse, GatewayError>>>>,
    requests: Mutex<Vec<GatewayRequest>>,
    holds: Mutex<HashMap<Stage, Arc<Notify>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stage: Stage, response: Result<GatewayResponse, GatewayError>) {
        self.responses.lock().entry(stage).or_default().push_back(response);
    }

    pub fn push_text(&self, stage: Stage, text: &str) {
        self.push(stage, Ok(GatewayResponse::from_text(text)));
    }

    pub fn push_image(&self, stage: Stage, image: ImageData) {
        self.push(stage, Ok(GatewayResponse::from_image(image)));
    }

    pub fn hold(&self, stage: Stage) {
        self.holds.lock().insert(stage, Arc::new(Notify::new()));
    }

    pub fn release(&self, stage: Stage) {
        if let Some(notify) = self.holds.lock().remove(&stage) {
            notify.notify_one();
        }
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.requests.lock().iter().filter(|r| r.stage == stage).count()
    }
}

#[async_trait]
impl GenerativeGateway for ScriptedGateway {
    async fn generate_content(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let stage = request.stage;
        self.requests.lock().push(request);
        let hold = self.holds.lock().get(&stage).cloned();
        if let Some(notify) = hold {
            notify.notified().await;
        }
        self.responses
            .lock()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(GatewayError::Http(format!("no scripted response for {}", stage.as_str()))))
    }
}

#[derive(Default)]
pub struct StaticFetcher {
    images: Mutex<HashMap<String, ImageData>>,
    fetched: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn with(url: &str, image: ImageData) -> Self {
        let fetcher = Self::default();
        fetcher.images.lock().insert(url.to_string(), image);
        fetcher
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl ImageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Option<ImageData> {
        self.fetched.lock().push(url.to_string());
        self.images.lock().get(url).cloned()
    }
}
