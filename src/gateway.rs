//! The boundary to the hosted generative model.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AspectRatio, ImageData, Stage};
use crate::schema::Schema;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no API key configured")]
    MissingCredential,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("prompt blocked: {0}")]
    Blocked(String),
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Http(e.to_string())
    }
}

/// Fast text/reasoning model or the image synthesis/editing model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineImage(ImageData),
}

impl Part {
    pub fn text(s: impl Into<String>) -> Self {
        Part::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            Part::InlineImage(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageData> {
        match self {
            Part::InlineImage(image) => Some(image),
            Part::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageConfig {
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub stage: Stage,
    pub model: ModelKind,
    pub parts: Vec<Part>,
    pub response_schema: Option<Schema>,
    pub image_config: Option<ImageConfig>,
    pub web_search: bool,
}

impl GatewayRequest {
    pub fn text(stage: Stage, parts: Vec<Part>) -> Self {
        Self { stage, model: ModelKind::Text, parts, response_schema: None, image_config: None, web_search: false }
    }

    pub fn image(stage: Stage, parts: Vec<Part>, aspect_ratio: AspectRatio) -> Self {
        Self {
            stage,
            model: ModelKind::Image,
            parts,
            response_schema: None,
            image_config: Some(ImageConfig { aspect_ratio }),
            web_search: false,
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }

    /// All text parts joined with newlines.
    #[cfg(test)]
    pub fn prompt_text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect::<Vec<_>>().join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageData> {
        self.parts.iter().filter_map(Part::as_image)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayResponse {
    pub parts: Vec<Part>,
}

impl GatewayResponse {
    #[cfg(test)]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { parts: vec![Part::Text(text.into())] }
    }

    #[cfg(test)]
    pub fn from_image(image: ImageData) -> Self {
        Self { parts: vec![Part::InlineImage(image)] }
    }

    /// Concatenated text parts, or `None` when there is no non-blank text.
    pub fn text(&self) -> Option<String> {
        let text: String = self.parts.iter().filter_map(Part::as_text).collect();
        (!text.trim().is_empty()).then_some(text)
    }

    pub fn first_image(&self) -> Option<&ImageData> {
        self.parts.iter().find_map(Part::as_image)
    }
}

#[async_trait]
pub trait GenerativeGateway: Send + Sync {
    async fn generate_content(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError>;
}

/// Downloads images referenced by URL. Failures are not errors: callers get `None`.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<ImageData>;
}

pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    async fn try_fetch(&self, url: &str) -> Result<ImageData, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("status={status}"));
        }
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        ImageData::from_bytes(body).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Option<ImageData> {
        match self.try_fetch(url).await {
            Ok(image) => {
                tracing::info!("🖼️ Fetched logo from {} ({}, {} bytes)", url, image.mime_type, image.data.len());
                Some(image)
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not fetch logo from {}: {}", url, e);
                None
            }
        }
    }
}
