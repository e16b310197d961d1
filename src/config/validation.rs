use std::net::SocketAddr;

use crate::config::models::{GatewayConfig, HealthCheckConfig, StaticInstanceConfig};

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Validates a loaded configuration before the gateway boots.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(mut health_errors) = Self::validate_health_check(&config.health_check) {
            errors.append(&mut health_errors);
        }

        if config.proxy.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "proxy.timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if config.registry.stale_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "registry.stale_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        for (index, instance) in config.registry.instances.iter().enumerate() {
            if let Err(mut instance_errors) = Self::validate_static_instance(index, instance) {
                errors.append(&mut instance_errors);
            }
        }

        if let Some(auth) = &config.auth
            && auth.enabled
            && auth.secret.is_empty()
        {
            errors.push(ValidationError::MissingField {
                field: "auth.secret".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8080')".to_string(),
            });
        }
        Ok(())
    }

    fn validate_health_check(config: &HealthCheckConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.interval_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if config.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if !config.path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "health_check.path".to_string(),
                message: "probe path must start with '/'".to_string(),
            });
        }
        if config.healthy_threshold == 0 || config.unhealthy_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check thresholds".to_string(),
                message: "healthy_threshold and unhealthy_threshold must be at least 1".to_string(),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_static_instance(
        index: usize,
        instance: &StaticInstanceConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if instance.name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("registry.instances[{index}].name"),
            });
        }
        if instance.host.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("registry.instances[{index}].host"),
            });
        }
        if instance.port == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("registry.instances[{index}].port"),
                message: "port must be non-zero".to_string(),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .map(|e| format!("  - {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
