use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::GeminiConfig;
use crate::gateway::{GatewayError, GatewayRequest, GatewayResponse, GenerativeGateway, ModelKind, Part};
use crate::models::ImageData;

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        let is_base64 =
                            s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=');
                        if s.len() > 100 && is_base64 {
                            *val = serde_json::Value::String(format!(
                                "{}...[truncated {} chars]",
                                &s[..50],
                                s.len() - 50
                            ));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable<T: Serialize>(body: &T) -> String {
    match serde_json::to_value(body) {
        Ok(mut value) => {
            truncate_base64_in_json(&mut value);
            value.to_string()
        }
        Err(_) => String::new(),
    }
}

pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self { client: Client::new(), config }
    }

    fn model_name(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Text => &self.config.text_model,
            ModelKind::Image => &self.config.image_model,
        }
    }

    fn endpoint(&self, kind: ModelKind) -> String {
        format!("{}/models/{}:generateContent", self.config.base_url.trim_end_matches('/'), self.model_name(kind))
    }
}

#[async_trait]
impl GenerativeGateway for GeminiClient {
    async fn generate_content(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let api_key = self.config.api_key.as_deref().ok_or(GatewayError::MissingCredential)?;
        let url = self.endpoint(request.model);
        let body = GeminiRequest::from_gateway_request(&request);

        info!("🔗 [{}] Calling {}", request.stage.as_str(), url);
        info!("📤 Request body: {}", loggable(&body));

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        info!("📥 Response status: {}", status);
        let response_text = response.text().await?;

        if !status.is_success() {
            error!("❌ API Error response: {}", response_text);
            return Err(map_status(status.as_u16(), response_text));
        }

        let parsed: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| GatewayError::Parse(format!("parse error: {e}")))?;
        info!("📥 Gemini response: {}", loggable(&parsed));

        parsed.into_gateway_response()
    }
}

fn map_status(status: u16, body: String) -> GatewayError {
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    match status {
        401 | 403 => GatewayError::Auth(message),
        _ => GatewayError::Api { status, message },
    }
}

// --- Request Types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfigBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfigBody {
    aspect_ratio: &'static str,
}

impl GeminiRequest {
    fn from_gateway_request(request: &GatewayRequest) -> Self {
        let parts = request
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => RequestPart::Text { text: text.clone() },
                Part::InlineImage(image) => RequestPart::Inline {
                    inline_data: InlineData { mime_type: image.mime_type.clone(), data: image.to_base64() },
                },
            })
            .collect();

        let mut config = GenerationConfig::default();
        // Search grounding rejects a JSON response mime type; those calls describe
        // the shape in the prompt instead.
        match &request.response_schema {
            Some(schema) if !request.web_search => {
                config.response_mime_type = Some("application/json");
                config.response_schema = Some(schema.to_json());
            }
            Some(_) => {
                warn!("⚠️ Dropping response schema from web search request ({})", request.stage.as_str())
            }
            None => {}
        }
        if let Some(image_config) = &request.image_config {
            config.response_modalities = Some(vec!["IMAGE"]);
            config.image_config = Some(ImageConfigBody { aspect_ratio: image_config.aspect_ratio.as_str() });
        }
        let has_config = config.response_schema.is_some() || config.image_config.is_some();

        Self {
            contents: vec![RequestContent { parts }],
            generation_config: has_config.then_some(config),
            tools: if request.web_search { vec![json!({ "googleSearch": {} })] } else { Vec::new() },
        }
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ResponsePart {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text { text: String },
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

impl GeminiResponse {
    fn into_gateway_response(self) -> Result<GatewayResponse, GatewayError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GatewayError::Blocked(reason));
        }
        let mut parts = Vec::new();
        // Only the first candidate is used, as the SDK's `response.text` does.
        if let Some(candidate) = self.candidates.into_iter().next() {
            if let Some(reason) = candidate.finish_reason.as_deref() {
                info!("🏁 Finish reason: {}", reason);
            }
            for part in candidate.content.parts {
                match part {
                    ResponsePart::Inline { inline_data } => {
                        let bytes = base64::engine::general_purpose::STANDARD
                            .decode(inline_data.data.as_bytes())
                            .map_err(|e| GatewayError::Parse(format!("inline data is not base64: {e}")))?;
                        info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                        parts.push(Part::InlineImage(ImageData::new(inline_data.mime_type, bytes)));
                    }
                    ResponsePart::Text { text } => parts.push(Part::Text(text)),
                    ResponsePart::Other(_) => {}
                }
            }
        }
        Ok(GatewayResponse { parts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fixtures::png, AspectRatio, Stage};
    use crate::schema;
    use pretty_assertions::assert_eq;

    fn client(api_key: Option<&str>) -> GeminiClient {
        GeminiClient::new(GeminiConfig { api_key: api_key.map(str::to_string), ..Default::default() })
    }

    #[test]
    fn endpoint_uses_model_per_kind() {
        let c = client(Some("k"));
        assert_eq!(
            c.endpoint(ModelKind::Text),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert!(c.endpoint(ModelKind::Image).ends_with("/models/gemini-2.5-flash-image:generateContent"));
    }

    #[test]
    fn structured_request_body() {
        let request = GatewayRequest::text(Stage::BrandDna, vec![Part::text("Analyze"), Part::InlineImage(png(1))])
            .with_schema(schema::brand_dna());
        let body = serde_json::to_value(GeminiRequest::from_gateway_request(&request)).unwrap();

        assert_eq!(body["contents"][0]["parts"][0]["text"], "Analyze");
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["data"], png(1).to_base64());
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn image_request_body() {
        let request = GatewayRequest::image(Stage::HeroImage, vec![Part::text("Poster")], AspectRatio::Landscape);
        let body = serde_json::to_value(GeminiRequest::from_gateway_request(&request)).unwrap();
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["IMAGE"]));
        assert!(body["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn plain_text_request_has_no_config_and_search_tool() {
        let request = GatewayRequest::text(Stage::AutoFill, vec![Part::text("Find")]).with_web_search();
        let body = serde_json::to_value(GeminiRequest::from_gateway_request(&request)).unwrap();
        assert!(body.get("generationConfig").is_none());
        assert_eq!(body["tools"], json!([{ "googleSearch": {} }]));
    }

    #[test]
    fn web_search_request_never_carries_a_json_schema() {
        let request = GatewayRequest::text(Stage::AutoFill, vec![Part::text("Find")])
            .with_schema(schema::auto_fill())
            .with_web_search();
        let body = serde_json::to_value(GeminiRequest::from_gateway_request(&request)).unwrap();
        assert!(body.get("generationConfig").is_none());
        assert_eq!(body["tools"], json!([{ "googleSearch": {} }]));

        let auto_fill = GeminiRequest::from_gateway_request(&crate::prompts::auto_fill("burgers", ""));
        let auto_fill = serde_json::to_value(auto_fill).unwrap();
        assert!(auto_fill.get("generationConfig").is_none());
        assert_eq!(auto_fill["tools"], json!([{ "googleSearch": {} }]));
    }

    #[test]
    fn parses_text_and_image_parts() {
        let raw = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here is your poster" },
                    { "inlineData": { "mimeType": "image/png", "data": png(3).to_base64() } },
                    { "thoughtSignature": "abc" }
                ]},
                "finishReason": "STOP"
            }]
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let response = parsed.into_gateway_response().unwrap();
        assert_eq!(response.text().as_deref(), Some("Here is your poster"));
        assert_eq!(response.first_image(), Some(&png(3)));
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let parsed: GeminiResponse =
            serde_json::from_value(json!({ "candidates": [], "promptFeedback": { "blockReason": "SAFETY" } })).unwrap();
        assert!(matches!(parsed.into_gateway_response(), Err(GatewayError::Blocked(r)) if r == "SAFETY"));
    }

    #[test]
    fn empty_candidates_give_empty_response() {
        let parsed: GeminiResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parsed.into_gateway_response().unwrap(), GatewayResponse::default());
    }

    #[test]
    fn status_mapping_extracts_api_message() {
        let body = r#"{"error":{"code":400,"message":"Invalid argument"}}"#.to_string();
        assert!(matches!(
            map_status(400, body),
            GatewayError::Api { status: 400, message } if message == "Invalid argument"
        ));
        assert!(matches!(map_status(403, "nope".into()), GatewayError::Auth(m) if m == "nope"));
    }

    #[test]
    fn truncates_base64_for_logs() {
        let mut value = json!({ "inlineData": { "data": "A".repeat(500), "mimeType": "image/png" } });
        truncate_base64_in_json(&mut value);
        let data = value["inlineData"]["data"].as_str().unwrap();
        assert!(data.starts_with(&"A".repeat(50)));
        assert!(data.ends_with("[truncated 450 chars]"));
    }

    #[test]
    fn leaves_non_base64_data_untouched() {
        let text = format!("x{}", "é".repeat(80));
        let mut value = json!({ "functionCall": { "args": { "data": text.clone() } } });
        truncate_base64_in_json(&mut value);
        assert_eq!(value["functionCall"]["args"]["data"], text);
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let request = GatewayRequest::text(Stage::PostCopy, vec![Part::text("Write")]);
        let result = client(None).generate_content(request).await;
        assert!(matches!(result, Err(GatewayError::MissingCredential)));
    }
}
