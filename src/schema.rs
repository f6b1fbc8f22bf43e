//! Declared response shapes for structured gateway calls.
//!
//! The same [`Schema`] value is sent to the model as `responseSchema` and used to
//! validate what comes back, so a response is only mapped into a domain entity
//! once it matches the shape that was asked for.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("response is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    Missing(String),
    #[error("field `{path}` should be {expected}")]
    WrongType { path: String, expected: &'static str },
    #[error("field `{0}` is blank")]
    Blank(String),
    #[error("field `{path}` has {len} items, expected {min}..={max}")]
    Length { path: String, len: usize, min: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    String {
        description: Option<&'static str>,
    },
    Array {
        items: Box<Schema>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    Object {
        properties: Vec<(&'static str, Schema)>,
        required: Vec<&'static str>,
    },
}

impl Schema {
    pub fn string() -> Self {
        Schema::String { description: None }
    }

    pub fn described(description: &'static str) -> Self {
        Schema::String { description: Some(description) }
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array { items: Box::new(items), min_items: None, max_items: None }
    }

    pub fn bounded_array(items: Schema, min: usize, max: usize) -> Self {
        Schema::Array { items: Box::new(items), min_items: Some(min), max_items: Some(max) }
    }

    pub fn object(properties: Vec<(&'static str, Schema)>, required: Vec<&'static str>) -> Self {
        Schema::Object { properties, required }
    }

    /// Renders the OpenAPI subset the Gemini API accepts as `responseSchema`.
    pub fn to_json(&self) -> Value {
        match self {
            Schema::String { description } => {
                let mut v = json!({ "type": "STRING" });
                if let Some(d) = description {
                    v["description"] = json!(d);
                }
                v
            }
            Schema::Array { items, min_items, max_items } => {
                let mut v = json!({ "type": "ARRAY", "items": items.to_json() });
                if let Some(min) = min_items {
                    v["minItems"] = json!(min.to_string());
                }
                if let Some(max) = max_items {
                    v["maxItems"] = json!(max.to_string());
                }
                v
            }
            Schema::Object { properties, required } => {
                let props: Map<String, Value> = properties
                    .iter()
                    .map(|(name, schema)| (name.to_string(), schema.to_json()))
                    .collect();
                json!({ "type": "OBJECT", "properties": props, "required": required })
            }
        }
    }

    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at("$", value, true)
    }

    fn validate_at(&self, path: &str, value: &Value, required: bool) -> Result<(), SchemaError> {
        match self {
            Schema::String { .. } => {
                let s = value.as_str().ok_or_else(|| SchemaError::WrongType {
                    path: path.to_string(),
                    expected: "a string",
                })?;
                if required && s.trim().is_empty() {
                    return Err(SchemaError::Blank(path.to_string()));
                }
                Ok(())
            }
            Schema::Array { items, min_items, max_items } => {
                let arr = value.as_array().ok_or_else(|| SchemaError::WrongType {
                    path: path.to_string(),
                    expected: "an array",
                })?;
                let min = min_items.unwrap_or(0);
                let max = max_items.unwrap_or(usize::MAX);
                if arr.len() < min || arr.len() > max {
                    return Err(SchemaError::Length { path: path.to_string(), len: arr.len(), min, max });
                }
                arr.iter()
                    .enumerate()
                    .try_for_each(|(i, item)| items.validate_at(&format!("{path}[{i}]"), item, true))
            }
            Schema::Object { properties, required: required_fields } => {
                let obj = value.as_object().ok_or_else(|| SchemaError::WrongType {
                    path: path.to_string(),
                    expected: "an object",
                })?;
                for (name, schema) in properties {
                    let field_path = format!("{path}.{name}");
                    let is_required = required_fields.contains(name);
                    match obj.get(*name) {
                        None | Some(Value::Null) if is_required => return Err(SchemaError::Missing(field_path)),
                        None | Some(Value::Null) => {}
                        Some(v) => schema.validate_at(&field_path, v, is_required)?,
                    }
                }
                Ok(())
            }
        }
    }

    /// Validates `text` against this schema, then deserializes it.
    pub fn parse<T: DeserializeOwned>(&self, text: &str) -> Result<T, SchemaError> {
        let value: Value = serde_json::from_str(text.trim())?;
        self.validate(&value)?;
        Ok(serde_json::from_value(value)?)
    }
}

pub fn auto_fill() -> Schema {
    Schema::object(
        vec![
            ("brandDescription", Schema::described("A refined one-paragraph description of the brand")),
            ("audience", Schema::described("The primary target audience")),
            ("tone", Schema::described("Tone of voice, a few words")),
            ("direction", Schema::described("Creative direction for campaign visuals")),
            ("logoUrl", Schema::described("Direct URL of the brand logo image, if one was found")),
        ],
        vec!["brandDescription", "audience", "tone", "direction"],
    )
}

pub fn brand_dna() -> Schema {
    Schema::object(
        vec![
            ("name", Schema::string()),
            ("description", Schema::string()),
            ("tone", Schema::string()),
            (
                "visualStyle",
                Schema::described("Description of colors, shapes, and visual identity inferred from logo/desc/photo"),
            ),
            ("keywords", Schema::array(Schema::string())),
        ],
        vec!["name", "description", "tone", "visualStyle", "keywords"],
    )
}

pub fn concept_batch() -> Schema {
    Schema::array(Schema::object(
        vec![
            ("id", Schema::string()),
            ("title", Schema::string()),
            ("rationale", Schema::string()),
            ("visualPrompt", Schema::string()),
            ("copyAngle", Schema::string()),
            (
                "overlayCtas",
                Schema::bounded_array(Schema::described("Punchy 2-5 word headline"), 1, 3),
            ),
        ],
        vec!["id", "title", "rationale", "visualPrompt", "copyAngle", "overlayCtas"],
    ))
}
