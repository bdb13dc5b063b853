//! `validate` command: load a blueprint, report errors, warnings and a summary.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use contracts::{AdapterKind, RouterBlueprint};

use crate::cli::ValidateArgs;

#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    strategy: String,
    producer_count: usize,
    consumer_count: usize,
    relay_count: usize,
}

impl ValidationResult {
    fn rejected(path: &Path, error: String) -> Self {
        Self {
            valid: false,
            config_path: path.display().to_string(),
            error: Some(error),
            warnings: None,
            summary: None,
        }
    }

    fn accepted(path: &Path, blueprint: &RouterBlueprint) -> Self {
        let warnings = collect_warnings(blueprint);
        Self {
            valid: true,
            config_path: path.display().to_string(),
            error: None,
            warnings: (!warnings.is_empty()).then_some(warnings),
            summary: Some(ConfigSummary {
                version: format!("{:?}", blueprint.version),
                strategy: format!("{:?}", blueprint.engine.strategy),
                producer_count: blueprint.count_of(AdapterKind::Producer),
                consumer_count: blueprint.count_of(AdapterKind::Consumer),
                relay_count: blueprint.count_of(AdapterKind::Relay),
            }),
        }
    }

    fn print(&self) {
        let Some(summary) = self.summary.as_ref().filter(|_| self.valid) else {
            println!("✗ {} is invalid", self.config_path);
            for error in &self.error {
                println!("  {error}");
            }
            return;
        };

        println!("✓ {} is valid", self.config_path);
        println!(
            "  {} / {} strategy: {} producer(s), {} consumer(s), {} relay(s)",
            summary.version, summary.strategy, summary.producer_count, summary.consumer_count, summary.relay_count
        );
        for warning in self.warnings.iter().flatten() {
            println!("  ⚠ {warning}");
        }
    }
}

pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize validation result")?
        );
    } else {
        result.print();
    }

    anyhow::ensure!(result.valid, "Configuration validation failed");
    Ok(())
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    if !args.config.exists() {
        return ValidationResult::rejected(&args.config, format!("File not found: {}", args.config.display()));
    }
    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => ValidationResult::accepted(&args.config, &blueprint),
        Err(e) => {
            warn!(error = %e, "Blueprint rejected");
            ValidationResult::rejected(&args.config, e.to_string())
        }
    }
}

/// Loader warnings plus findings that only matter to the demo harness.
fn collect_warnings(blueprint: &RouterBlueprint) -> Vec<String> {
    let mut warnings = config_loader::ConfigLoader::warnings(blueprint);

    if blueprint.adapters.is_empty() {
        warnings.push("No adapters configured, `run` will route nothing".to_string());
    } else if blueprint.count_of(AdapterKind::Consumer) == 0 {
        warnings.push("No consumers configured, produced measurements will be dropped".to_string());
    }

    let ungated = blueprint
        .adapters
        .iter()
        .filter(|a| a.dependencies.is_some() && a.dependency_timeout_ms.is_none())
        .count();
    if ungated > 0 && blueprint.engine.dependency.default_timeout_ms.is_none() {
        warnings.push(format!(
            "{ungated} adapter(s) declare dependencies without a timeout and no default is set, they will not be gated"
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let file = write_config(
            ".toml",
            r#"
[[adapters]]
name = "pmu"
kind = "producer"
outputs = ["FREQ"]
rate_hz = 10.0
dependencies = "ghost"
"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("ghost")));
        assert!(warnings.iter().any(|w| w.contains("No consumers")));
        assert_eq!(result.summary.unwrap().producer_count, 1);
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let result = validate_config(&ValidateArgs {
            config: PathBuf::from("/nonexistent/router.toml"),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }

    #[test]
    fn test_invalid_config_reports_error() {
        let file = write_config(
            ".json",
            r#"{"engine": {"drain": {"batch_size": 0, "tick_ms": 10}}}"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("batch_size"));
    }
}
