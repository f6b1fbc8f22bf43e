use std::io::Cursor;

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageDataError {
    #[error("image data is empty")]
    Empty,
    #[error("invalid base64 image data: {0}")]
    Base64(String),
    #[error("unrecognised image format")]
    UnknownFormat,
}

/// Raw image bytes plus the mime type they were produced or uploaded with.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub mime_type: String,
    #[serde_as(as = "Base64")]
    pub data: Bytes,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self { mime_type: mime_type.into(), data: data.into() }
    }

    /// Sniffs the format from magic bytes. Anything `image` cannot recognise is rejected.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self, ImageDataError> {
        let data = data.into();
        if data.is_empty() {
            return Err(ImageDataError::Empty);
        }
        let format = image::guess_format(&data).map_err(|_| ImageDataError::UnknownFormat)?;
        Ok(Self { mime_type: format.to_mime_type().to_string(), data })
    }

    /// Accepts either bare base64 or a `data:<mime>;base64,<payload>` URL.
    pub fn from_base64(input: &str) -> Result<Self, ImageDataError> {
        let input = input.trim();
        let (declared_mime, payload) = match input.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| ImageDataError::Base64("data URL without payload".into()))?;
                let mime = header.split(';').next().filter(|m| !m.is_empty());
                (mime.map(str::to_string), payload)
            }
            None => (None, input),
        };
        let decoded = Bytes::from(
            base64::engine::general_purpose::STANDARD
                .decode(payload)
                .map_err(|e| ImageDataError::Base64(e.to_string()))?,
        );
        match (Self::from_bytes(decoded.clone()), declared_mime) {
            (Err(ImageDataError::UnknownFormat), Some(mime)) => Ok(Self::new(mime, decoded)),
            (result, _) => result,
        }
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    #[cfg(test)]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Width and height read from the image header, when the format is decodable.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        image::ImageReader::new(Cursor::new(&self.data[..]))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }
}

/// Output framing for generated images. Posters are always landscape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
        }
    }
}

/// User-entered brand signals. Mutable until Brand-DNA extraction begins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandBrief {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub logo: Option<ImageData>,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub creative_direction: String,
    #[serde(default)]
    pub product_name: String,
}

impl BrandBrief {
    pub fn has_description_or_url(&self) -> bool {
        !self.description.trim().is_empty() || !self.url.trim().is_empty()
    }

    pub fn product_name(&self) -> Option<&str> {
        non_blank(&self.product_name)
    }

    pub fn apply(&mut self, update: BriefUpdate) {
        let fields = [
            (update.description, &mut self.description),
            (update.url, &mut self.url),
            (update.target_audience, &mut self.target_audience),
            (update.tone, &mut self.tone),
            (update.creative_direction, &mut self.creative_direction),
            (update.product_name, &mut self.product_name),
        ];
        for (value, field) in fields {
            if let Some(value) = value {
                *field = value;
            }
        }
        if let Some(logo) = update.logo {
            self.logo = logo;
        }
    }
}

/// Partial brief update. `logo: Some(None)` clears the logo.
#[derive(Debug, Clone, Default)]
pub struct BriefUpdate {
    pub description: Option<String>,
    pub url: Option<String>,
    pub logo: Option<Option<ImageData>>,
    pub target_audience: Option<String>,
    pub tone: Option<String>,
    pub creative_direction: Option<String>,
    pub product_name: Option<String>,
}

/// The product photo together with the product name from the brief.
#[derive(Debug, Clone, Copy)]
pub struct SourceImage<'a> {
    pub image: &'a ImageData,
    pub product_name: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandDna {
    pub name: String,
    pub description: String,
    pub tone: String,
    pub visual_style: String,
    pub keywords: Vec<String>,
    pub website_url: Option<String>,
    pub logo_image: Option<ImageData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreativeConcept {
    pub id: String,
    pub title: String,
    pub rationale: String,
    pub visual_prompt: String,
    pub copy_angle: String,
    pub overlay_ctas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedDirection {
    pub concept: CreativeConcept,
    pub cta: String,
}

/// The poster image and post text. Each half is filled independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedAsset {
    pub image: Option<ImageData>,
    pub post_text: Option<String>,
}

impl GeneratedAsset {
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.post_text.is_none()
    }
}

/// Enriched brief fields returned by the auto-fill stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoFill {
    pub brand_description: String,
    pub audience: String,
    pub tone: String,
    pub direction: String,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// The pipeline step a gateway call or a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    AutoFill,
    BrandDna,
    Ideation,
    HeroImage,
    PostCopy,
    Edit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoFill => "auto-fill",
            Self::BrandDna => "brand-dna",
            Self::Ideation => "ideation",
            Self::HeroImage => "hero-image",
            Self::PostCopy => "post-copy",
            Self::Edit => "edit",
        }
    }

    /// Prefix used when a failure of this stage is shown to the user.
    pub fn failure_label(&self) -> &'static str {
        match self {
            Self::AutoFill => "Auto-fill failed",
            Self::BrandDna | Self::Ideation => "Analysis failed",
            Self::HeroImage => "Image Gen Error",
            Self::PostCopy => "Text Gen Error",
            Self::Edit => "Edit failed",
        }
    }
}

pub fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    pub fn png(tag: u8) -> ImageData {
        // Trailing bytes after IEND keep the header valid while making each image distinct.
        let mut data = PNG_1X1.to_vec();
        data.push(tag);
        ImageData::new("image/png", data)
    }

    pub fn jpeg() -> ImageData {
        ImageData::new("image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01])
    }

    pub fn dna() -> BrandDna {
        BrandDna {
            name: "Night Owl Burgers".into(),
            description: "Late-night burger joint for skaters".into(),
            tone: "Rebellious".into(),
            visual_style: "Neon signage, gritty concrete, high contrast".into(),
            keywords: vec!["burgers".into(), "skate".into(), "late-night".into()],
            website_url: None,
            logo_image: None,
        }
    }

    pub fn concept(id: &str, ctas: &[&str]) -> CreativeConcept {
        CreativeConcept {
            id: id.into(),
            title: format!("Concept {id}"),
            rationale: "Plays to the late-night crowd".into(),
            visual_prompt: "Smash burger under pink neon, smoke".into(),
            copy_angle: "Short, loud, a little cheeky".into(),
            overlay_ctas: ctas.iter().map(|c| c.to_string()).collect(),
        }
    }
}
