//! Blueprint (de)serialization
//!
//! TOML is the primary format, JSON is accepted as well.

use std::path::Path;

use contracts::{ContractError, RouterBlueprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Case-insensitive match on a bare extension (`"toml"`, `"json"`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("toml") {
            Some(Self::Toml)
        } else if ext.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ContractError> {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Err(ContractError::config_parse(format!(
                "{} has no extension, expected .toml or .json",
                path.display()
            )));
        };
        Self::from_extension(ext)
            .ok_or_else(|| ContractError::config_parse(format!("unsupported config format: .{ext}")))
    }

    fn label(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        }
    }
}

fn parse_error(format: ConfigFormat, err: impl std::error::Error + Send + Sync + 'static) -> ContractError {
    ContractError::ConfigParse {
        message: format!("{} parse error: {err}", format.label()),
        source: Some(Box::new(err)),
    }
}

pub fn parse_toml(content: &str) -> Result<RouterBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| parse_error(ConfigFormat::Toml, e))
}

pub fn parse_json(content: &str) -> Result<RouterBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| parse_error(ConfigFormat::Json, e))
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<RouterBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

/// Pretty-printed blueprint in `format`.
pub fn render(blueprint: &RouterBlueprint, format: ConfigFormat) -> Result<String, ContractError> {
    let rendered = match format {
        ConfigFormat::Toml => toml::to_string_pretty(blueprint).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::to_string_pretty(blueprint).map_err(|e| e.to_string()),
    };
    rendered.map_err(|e| ContractError::config_parse(format!("{} serialize error: {e}", format.label())))
}
