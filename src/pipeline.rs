//! Pipeline stages: build the request, call the gateway, map the response.
//!
//! A stage either returns a complete entity or an error. Partial entities are
//! never produced.

use std::collections::HashSet;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::gateway::{GatewayError, GatewayRequest, GenerativeGateway};
use crate::models::{
    non_blank, AutoFill, BrandBrief, BrandDna, CreativeConcept, ImageData, SelectedDirection, SourceImage,
};
use crate::prompts;
use crate::schema::{self, Schema, SchemaError};

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("malformed response: {0}")]
    Schema(#[from] SchemaError),
    #[error("{0}")]
    EmptyResult(&'static str),
}

pub const NO_IMAGE: &str = "No image generated.";
pub const NO_TEXT: &str = "No text generated.";

/// Models sometimes wrap JSON answers in a markdown code fence.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

async fn structured<T: for<'de> Deserialize<'de>>(
    gateway: &dyn GenerativeGateway,
    request: GatewayRequest,
    schema: Schema,
) -> Result<T, StageError> {
    let response = gateway.generate_content(request).await?;
    let text = response.text().ok_or(StageError::EmptyResult(NO_TEXT))?;
    Ok(schema.parse(strip_code_fence(&text))?)
}

async fn image(gateway: &dyn GenerativeGateway, request: GatewayRequest) -> Result<ImageData, StageError> {
    let response = gateway.generate_content(request).await?;
    let image = response.first_image().cloned().ok_or(StageError::EmptyResult(NO_IMAGE))?;
    match image.dimensions() {
        Some((w, h)) => info!("🖼️ Received {} image {}x{}", image.mime_type, w, h),
        None => info!("🖼️ Received {} image ({} bytes)", image.mime_type, image.data.len()),
    }
    Ok(image)
}

pub async fn auto_fill(gateway: &dyn GenerativeGateway, description: &str, url: &str) -> Result<AutoFill, StageError> {
    let request = prompts::auto_fill(description, url);
    let mut result: AutoFill = structured(gateway, request, schema::auto_fill()).await?;
    result.logo_url = result.logo_url.as_deref().and_then(non_blank).map(str::to_string);
    Ok(result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrandDnaPayload {
    name: String,
    description: String,
    tone: String,
    visual_style: String,
    keywords: Vec<String>,
}

pub async fn research_brand_dna(
    gateway: &dyn GenerativeGateway,
    brief: &BrandBrief,
    source: Option<SourceImage<'_>>,
) -> Result<BrandDna, StageError> {
    let request = prompts::brand_dna(brief, source);
    let payload: BrandDnaPayload = structured(gateway, request, schema::brand_dna()).await?;
    Ok(brand_dna_from_payload(payload, brief))
}

fn brand_dna_from_payload(payload: BrandDnaPayload, brief: &BrandBrief) -> BrandDna {
    BrandDna {
        name: payload.name,
        description: payload.description,
        tone: payload.tone,
        visual_style: payload.visual_style,
        keywords: payload.keywords,
        website_url: non_blank(&brief.url).map(str::to_string),
        logo_image: brief.logo.clone(),
    }
}

pub async fn ideate(
    gateway: &dyn GenerativeGateway,
    dna: &BrandDna,
    source: SourceImage<'_>,
) -> Result<Vec<CreativeConcept>, StageError> {
    let request = prompts::ideation(dna, source);
    let concepts: Vec<CreativeConcept> = structured(gateway, request, schema::concept_batch()).await?;
    if concepts.len() != 3 {
        warn!("⚠️ Ideation returned {} concepts instead of 3", concepts.len());
    }
    Ok(normalize_concepts(concepts))
}

/// Concepts are selected by id, so ids must be unique and non-blank.
fn normalize_concepts(concepts: Vec<CreativeConcept>) -> Vec<CreativeConcept> {
    let mut seen = HashSet::new();
    concepts
        .into_iter()
        .enumerate()
        .map(|(i, mut concept)| {
            concept.id = concept.id.trim().to_string();
            if !seen.insert(concept.id.clone()) {
                concept.id = format!("concept-{}", i + 1);
                seen.insert(concept.id.clone());
            }
            concept.overlay_ctas = concept.overlay_ctas.iter().map(|c| c.trim().to_string()).collect();
            concept
        })
        .collect()
}

pub async fn generate_hero_image(
    gateway: &dyn GenerativeGateway,
    dna: &BrandDna,
    source: SourceImage<'_>,
    direction: &SelectedDirection,
) -> Result<ImageData, StageError> {
    image(gateway, prompts::hero_image(dna, source, &direction.concept, &direction.cta)).await
}

pub async fn edit_image(
    gateway: &dyn GenerativeGateway,
    current: &ImageData,
    instruction: &str,
) -> Result<ImageData, StageError> {
    image(gateway, prompts::edit_image(current, instruction)).await
}

pub async fn generate_post_copy(
    gateway: &dyn GenerativeGateway,
    dna: &BrandDna,
    concept: &CreativeConcept,
    product_name: Option<&str>,
) -> Result<String, StageError> {
    let response = gateway.generate_content(prompts::post_copy(dna, concept, product_name)).await?;
    let text = response.text().ok_or(StageError::EmptyResult(NO_TEXT))?;
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayResponse, Part};
    use crate::models::fixtures::{concept, dna, jpeg, png};
    use crate::models::Stage;
    use crate::testing::ScriptedGateway;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn concepts_json(ids: &[&str]) -> String {
        let items: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id, "title": format!("Title {id}"), "rationale": "Because",
                    "visualPrompt": "Neon smash burger", "copyAngle": "Loud", "overlayCtas": [" Taste the Fire ", "Order Now"]
                })
            })
            .collect();
        serde_json::to_string(&items).unwrap()
    }

    #[tokio::test]
    async fn brand_dna_fields_are_taken_verbatim() {
        let gateway = ScriptedGateway::new();
        gateway.push_text(
            Stage::BrandDna,
            r#"{"name":"Night Owl","description":"Burgers after dark","tone":"Rebellious","visualStyle":"Neon on concrete","keywords":["skate","burgers"]}"#,
        );
        let brief = BrandBrief {
            description: "late-night burger joint for skaters".into(),
            url: "https://owl.example".into(),
            logo: Some(png(4)),
            ..Default::default()
        };
        let dna = research_brand_dna(&gateway, &brief, None).await.unwrap();
        assert_eq!(
            dna,
            BrandDna {
                name: "Night Owl".into(),
                description: "Burgers after dark".into(),
                tone: "Rebellious".into(),
                visual_style: "Neon on concrete".into(),
                keywords: vec!["skate".into(), "burgers".into()],
                website_url: Some("https://owl.example".into()),
                logo_image: Some(png(4)),
            }
        );
    }

    #[tokio::test]
    async fn brand_dna_missing_field_is_hard_failure() {
        let gateway = ScriptedGateway::new();
        gateway.push_text(Stage::BrandDna, r#"{"name":"Night Owl","description":"x","tone":"y","keywords":[]}"#);
        let err = research_brand_dna(&gateway, &BrandBrief::default(), None).await.unwrap_err();
        assert_eq!(err.to_string(), "malformed response: missing required field `$.visualStyle`");
    }

    #[tokio::test]
    async fn empty_text_is_empty_result() {
        let gateway = ScriptedGateway::new();
        gateway.push(Stage::BrandDna, Ok(GatewayResponse::default()));
        let err = research_brand_dna(&gateway, &BrandBrief::default(), None).await.unwrap_err();
        assert!(matches!(err, StageError::EmptyResult(NO_TEXT)));
    }

    #[tokio::test]
    async fn ideation_maps_every_concept() {
        let gateway = ScriptedGateway::new();
        gateway.push_text(Stage::Ideation, &concepts_json(&["a", "b", "c"]));
        let photo = jpeg();
        let concepts = ideate(&gateway, &dna(), SourceImage { image: &photo, product_name: None }).await.unwrap();
        assert_eq!(concepts.len(), 3);
        for c in &concepts {
            assert!(!c.title.is_empty() && !c.rationale.is_empty());
            assert!(!c.visual_prompt.is_empty() && !c.copy_angle.is_empty());
            assert_eq!(c.overlay_ctas, vec!["Taste the Fire".to_string(), "Order Now".to_string()]);
        }
    }

    #[tokio::test]
    async fn ideation_accepts_other_batch_sizes() {
        let gateway = ScriptedGateway::new();
        gateway.push_text(Stage::Ideation, &concepts_json(&["a", "b"]));
        let photo = jpeg();
        let concepts = ideate(&gateway, &dna(), SourceImage { image: &photo, product_name: None }).await.unwrap();
        assert_eq!(concepts.len(), 2);
    }

    #[test]
    fn duplicate_ids_are_renumbered() {
        let concepts = normalize_concepts(vec![concept("x", &["A"]), concept(" x ", &["B"]), concept("y", &["C"])]);
        let ids: Vec<_> = concepts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "concept-2", "y"]);
    }

    #[tokio::test]
    async fn image_stage_takes_first_inline_part() {
        let gateway = ScriptedGateway::new();
        gateway.push(
            Stage::Edit,
            Ok(GatewayResponse { parts: vec![Part::text("Done!"), Part::InlineImage(png(7))] }),
        );
        let edited = edit_image(&gateway, &png(1), "brighter").await.unwrap();
        assert_eq!(edited, png(7));
    }

    #[tokio::test]
    async fn image_stage_without_image_fails() {
        let gateway = ScriptedGateway::new();
        gateway.push_text(Stage::HeroImage, "I cannot draw that");
        let photo = jpeg();
        let direction = SelectedDirection { concept: concept("a", &["Go"]), cta: "Go".into() };
        let err = generate_hero_image(&gateway, &dna(), SourceImage { image: &photo, product_name: None }, &direction)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), NO_IMAGE);
    }

    #[tokio::test]
    async fn gateway_errors_propagate() {
        let gateway = ScriptedGateway::new();
        gateway.push(Stage::PostCopy, Err(GatewayError::Api { status: 500, message: "boom".into() }));
        let err = generate_post_copy(&gateway, &dna(), &concept("a", &["Go"]), None).await.unwrap_err();
        assert_eq!(err.to_string(), "API error: 500 - boom");
    }

    #[tokio::test]
    async fn auto_fill_accepts_fenced_json() {
        let gateway = ScriptedGateway::new();
        gateway.push_text(
            Stage::AutoFill,
            "```json\n{\"brandDescription\":\"Burgers\",\"audience\":\"Skaters\",\n\"tone\":\"Loud\",\"direction\":\"Neon\"}\n```",
        );
        let result = auto_fill(&gateway, "burgers", "").await.unwrap();
        assert_eq!(result.brand_description, "Burgers");
        assert_eq!(result.logo_url, None);
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn auto_fill_blank_logo_url_becomes_none() {
        let gateway = ScriptedGateway::new();
        gateway.push_text(
            Stage::AutoFill,
            r#"{"brandDescription":"Burgers","audience":"Skaters","tone":"Loud","direction":"Neon","logoUrl":"  "}"#,
        );
        let result = auto_fill(&gateway, "burgers", "").await.unwrap();
        assert_eq!(result.logo_url, None);
        assert_eq!(result.audience, "Skaters");
    }
}
