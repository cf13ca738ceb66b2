//! Ошибки крейта.
//!
//! Типы ошибок ядра (`PubSubError`, `ConfigError`, `StackError`, коды
//! статуса) живут в крейте `zmesh-error` и переэкспортируются отсюда.
//! Здесь определены только ошибки инициализации логирования.

use std::{any::Any, path::PathBuf};

use thiserror::Error;
pub use zmesh_error::{
    bail, ensure, ConfigError, ErrorExt, GenericError, LogLevel, PubSubError, PubSubResult,
    ResourceKind, ResultExt, StackError, StatusCode, ZmeshResult,
};

/// Ошибки настройки логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level '{level}': expected trace, debug, info, warn or error")]
    InvalidLevel { level: String },

    #[error("invalid log filter directive '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("failed to create log directory {}", path.display())]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create log file appender: {0}")]
    Appender(String),

    #[error("global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

impl ErrorExt for LoggingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidLevel { .. } | Self::InvalidFilter { .. } => StatusCode::InvalidConfig,
            Self::LogDir { .. } | Self::Appender(_) => StatusCode::Io,
            Self::AlreadyInitialized(_) => StatusCode::InvalidOperation,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_into_stack_error() {
        fn init() -> ZmeshResult<()> {
            Err::<(), _>(LoggingError::InvalidLevel {
                level: "loud".into(),
            })
            .context("initializing logging")?;
            Ok(())
        }

        let err = init().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidConfig);
        assert!(err.downcast_ref::<LoggingError>().is_some());
        assert!(err.to_string().starts_with("initializing logging: invalid log level"));
    }

    #[test]
    fn test_log_dir_error_keeps_source() {
        let err = LoggingError::LogDir {
            path: PathBuf::from("/nope"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.status_code(), StatusCode::Io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
