use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid PORT value `{0}`")]
    Port(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub gemini: GeminiConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let port = match get("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Port(raw))?,
            None => 8080,
        };
        let defaults = GeminiConfig::default();
        Ok(Self {
            port,
            gemini: GeminiConfig {
                api_key: get("GEMINI_API_KEY"),
                base_url: get("GEMINI_API_BASE").unwrap_or(defaults.base_url),
                text_model: get("GEMINI_TEXT_MODEL").unwrap_or(defaults.text_model),
                image_model: get("GEMINI_IMAGE_MODEL").unwrap_or(defaults.image_model),
            },
        })
    }
}

/// Whether the studio is usable, decided once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGate {
    pub credential_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScreen {
    SelectKey,
    Studio,
}

impl AccessGate {
    pub fn new(credential_present: bool) -> Self {
        Self { credential_present }
    }

    pub fn screen(&self) -> AccessScreen {
        if self.credential_present { AccessScreen::Studio } else { AccessScreen::SelectKey }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.gemini, GeminiConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("GEMINI_API_KEY", "abc123"),
            ("GEMINI_TEXT_MODEL", "gemini-2.5-pro"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.gemini.api_key.as_deref(), Some("abc123"));
        assert_eq!(config.gemini.text_model, "gemini-2.5-pro");
        assert_eq!(config.gemini.image_model, DEFAULT_IMAGE_MODEL);
    }

    #[test]
    fn blank_key_counts_as_absent() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap();
        assert_eq!(config.gemini.api_key, None);
    }

    #[test]
    fn bad_port_is_an_error() {
        assert_eq!(Config::from_lookup(lookup(&[("PORT", "eighty")])), Err(ConfigError::Port("eighty".into())));
    }

    #[test]
    fn gate_screen_follows_credential() {
        assert_eq!(AccessGate::new(true).screen(), AccessScreen::Studio);
        assert_eq!(AccessGate::new(false).screen(), AccessScreen::SelectKey);
    }
}
