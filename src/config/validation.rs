//! Configuration validation
//!
//! Validates TAAR Lite configuration for correctness:
//! - Durations that must be positive
//! - A usable result count
//! - A known default variant that is actually built
//! - Backend-specific required fields

use super::taarlite_config::{SourceBackend, TaarLiteConfig};
use crate::recommender::Variant;
use crate::TaarLiteError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a TAAR Lite configuration
pub fn validate_config(config: &TaarLiteConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.cache.ttl_secs == 0 {
        errors.push(ValidationError::new(
            "cache.ttl_secs",
            "TTL must be greater than 0",
        ));
    }

    if config.cache.lock_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "cache.lock_timeout_secs",
            "Lock timeout must be greater than 0",
        ));
    }

    if config.cache.lock_lease_secs < config.cache.lock_timeout_secs {
        tracing::warn!(
            lease = config.cache.lock_lease_secs,
            timeout = config.cache.lock_timeout_secs,
            "Lock lease shorter than lock timeout; a slow fetch may lose its lease"
        );
    }

    if config.server.max_results == 0 {
        errors.push(ValidationError::new(
            "server.max_results",
            "Must return at least one result",
        ));
    }

    match config.recommender.default_variant() {
        Ok(variant) if variant.is_experimental() && !config.recommender.experimental => {
            errors.push(ValidationError::new(
                "recommender.default_variant",
                format!(
                    "'{}' is experimental; set recommender.experimental to enable it",
                    variant
                ),
            ));
        }
        Ok(_) => {}
        Err(_) => {
            let names: Vec<&str> = Variant::ALL.iter().map(|v| v.as_str()).collect();
            errors.push(ValidationError::new(
                "recommender.default_variant",
                format!(
                    "Unknown variant '{}'. Must be one of: {}",
                    config.recommender.default_variant,
                    names.join(", ")
                ),
            ));
        }
    }

    match config.source.backend {
        SourceBackend::File if config.source.root.is_none() => {
            errors.push(ValidationError::new(
                "source.root",
                "The file backend needs a root directory",
            ));
        }
        SourceBackend::Http
            if !config.source.endpoint.starts_with("http://")
                && !config.source.endpoint.starts_with("https://") =>
        {
            errors.push(ValidationError::new(
                "source.endpoint",
                format!("Invalid endpoint URL: {}", config.source.endpoint),
            ));
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &TaarLiteConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        TaarLiteError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fields(config: &TaarLiteConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&TaarLiteConfig::new()).is_ok());
    }

    #[test]
    fn test_zero_durations() {
        let mut config = TaarLiteConfig::new();
        config.cache.ttl_secs = 0;
        config.cache.lock_timeout_secs = 0;
        assert_eq!(
            fields(&config),
            vec!["cache.ttl_secs", "cache.lock_timeout_secs"]
        );
    }

    #[test]
    fn test_zero_max_results() {
        let mut config = TaarLiteConfig::new();
        config.server.max_results = 0;
        assert_eq!(fields(&config), vec!["server.max_results"]);
    }

    #[test]
    fn test_unknown_default_variant() {
        let mut config = TaarLiteConfig::new();
        config.recommender.default_variant = "rownorm_sum".to_string();
        assert_eq!(fields(&config), vec!["recommender.default_variant"]);
    }

    #[test]
    fn test_experimental_default_needs_flag() {
        let mut config = TaarLiteConfig::new();
        config.recommender.default_variant = "propagation".to_string();
        assert_eq!(fields(&config), vec!["recommender.default_variant"]);

        config.recommender.experimental = true;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_file_backend_needs_root() {
        let mut config = TaarLiteConfig::new();
        config.source.backend = SourceBackend::File;
        assert_eq!(fields(&config), vec!["source.root"]);

        config.source.root = Some(PathBuf::from("/srv/taar"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_result_message_lists_errors() {
        let mut config = TaarLiteConfig::new();
        config.source.endpoint = "s3://bucket".to_string();
        let err = validate_config_result(&config).unwrap_err();
        assert!(err.to_string().contains("source.endpoint"));
    }
}
