//! # Config Loader
//!
//! Reads a [`RouterBlueprint`] (engine settings plus an optional demo
//! topology) from TOML or JSON and rejects blueprints the engine cannot run.
//! Findings that do not stop a run, such as dependency names that match no
//! adapter, come back from [`ConfigLoader::warnings`] instead.
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("router.toml")).unwrap();
//! for warning in ConfigLoader::warnings(&blueprint) {
//!     eprintln!("{warning}");
//! }
//! ```

mod parser;
mod validator;

pub use contracts::RouterBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load, parse and validate a blueprint file. The format follows the
    /// extension (`.toml` or `.json`).
    pub fn load_from_path(path: &Path) -> Result<RouterBlueprint, ContractError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| ContractError::ConfigParse {
            message: format!("cannot read {}: {e}", path.display()),
            source: Some(Box::new(e)),
        })?;
        Self::load_from_str(&content, format)
    }

    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<RouterBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Non-fatal findings for an already validated blueprint.
    pub fn warnings(blueprint: &RouterBlueprint) -> Vec<String> {
        validator::warnings(blueprint)
    }

    pub fn to_toml(blueprint: &RouterBlueprint) -> Result<String, ContractError> {
        parser::render(blueprint, ConfigFormat::Toml)
    }

    pub fn to_json(blueprint: &RouterBlueprint) -> Result<String, ContractError> {
        parser::render(blueprint, ConfigFormat::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL_TOML: &str = r#"
[engine.strategy]
mode = "high_latency"
tick_ms = 20

[engine.dependency]
sweep_every = 50
sweep_interval_ms = 100
default_timeout_ms = 500

[[adapters]]
name = "pmu"
kind = "producer"
outputs = ["FREQ"]
rate_hz = 30.0

[[adapters]]
name = "calc"
kind = "relay"
inputs = ["FREQ"]
outputs = ["DFDT"]
auto_start = false
respect_output_demand = true

[[adapters]]
name = "archive"
kind = "consumer"
inputs = ["FREQ", "DFDT"]
dependencies = "calc"
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.adapters.len(), 3);
        assert_eq!(bp.engine.dependency.default_timeout_ms, Some(500));
    }

    #[test]
    fn test_round_trip_toml() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.engine.strategy, bp2.engine.strategy);
        assert_eq!(bp.adapters.len(), bp2.adapters.len());
        assert_eq!(bp.adapters[2].dependency_names(), bp2.adapters[2].dependency_names());
    }

    #[test]
    fn test_round_trip_json() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp.adapters[1].name, bp2.adapters[1].name);
        assert!(!bp2.adapters[1].auto_start);
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL_TOML.as_bytes()).unwrap();
        let bp = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(bp.adapters[0].name, "pmu");

        let unsupported = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(unsupported.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[[adapters]]
name = "pmu"
kind = "producer"
outputs = ["FREQ"]
rate_hz = 30.0

[[adapters]]
name = "pmu"
kind = "consumer"
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }
}
