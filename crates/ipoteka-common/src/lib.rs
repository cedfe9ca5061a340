//! # Ipoteka Common
//!
//! Shared error type and logging configuration for the Ipoteka Krym offline worker.
//!
//! ## Features
//!
//! - Unified error type with a category for log fields
//! - Logging configuration and setup
//! - Result and Option extension traits

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for configuration, persistence and other ambient concerns.
#[derive(Error, Debug)]
pub enum IpotekaError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl IpotekaError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            IpotekaError::Config { .. } => "config",
            IpotekaError::Io(_) => "io",
            IpotekaError::Json(_) => "json",
            IpotekaError::NotFound(_) => "not_found",
            IpotekaError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for shared operations.
pub type Result<T> = std::result::Result<T, IpotekaError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Wrap the error as a configuration error.
    fn config_context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn config_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| IpotekaError::config_with_source(message, e))
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| IpotekaError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(IpotekaError::config("bad").category(), "config");
        assert_eq!(
            IpotekaError::InvalidArgument("xml".into()).category(),
            "invalid_argument"
        );
        assert_eq!(
            IpotekaError::NotFound("store".into()).category(),
            "not_found"
        );
    }

    #[test]
    fn test_config_context_keeps_source() {
        use std::error::Error as _;

        let parsed: std::result::Result<u16, _> = "port".parse::<u16>();
        let err = parsed.config_context("invalid port").unwrap_err();
        assert_eq!(err.category(), "config");
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Config error: invalid port");
    }

    #[test]
    fn test_json_conversion() {
        let err: IpotekaError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.category(), "json");
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("test").unwrap(), 42);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("test"),
            Err(IpotekaError::NotFound(_))
        ));
    }
}
