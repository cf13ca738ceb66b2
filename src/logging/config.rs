use std::{env, fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::LoggingError;

pub const LOG_LEVEL_ENV: &str = "ZMESH_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "ZMESH_LOG_FORMAT";

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Период ротации файла логов.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileSinkConfig {
    pub dir: PathBuf,
    /// Имя файла: `<prefix>.<дата>.log`.
    pub prefix: String,
    #[serde(default)]
    pub rotation: FileRotation,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень для крейтов zmesh; остальные крейты пишут от `warn`.
    pub level: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    /// Файловый sink (non-blocking, с ротацией). `None` — только консоль.
    pub file: Option<FileSinkConfig>,
}

impl LoggingConfig {
    /// Переопределяет уровень и формат из `ZMESH_LOG_LEVEL` / `ZMESH_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var(LOG_LEVEL_ENV) {
            self.level = level.to_ascii_lowercase();
        }
        if let Ok(format) = env::var(LOG_FORMAT_ENV) {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(_) => eprintln!("ignoring {LOG_FORMAT_ENV}={format}: unknown log format"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(LoggingError::InvalidLevel {
                level: self.level.clone(),
            });
        }
        if let Some(file) = &self.file {
            if file.prefix.is_empty() {
                return Err(LoggingError::Appender(
                    "file prefix must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Директива `EnvFilter`, если `RUST_LOG` не задан.
    pub fn filter_directive(&self) -> String {
        format!("warn,zmesh={0},zmesh_pub={0}", self.level)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_ansi: true,
            with_target: true,
            file: None,
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_default_directive() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter_directive(), "warn,zmesh=info,zmesh_pub=info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_level() {
        let config = LoggingConfig {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LoggingError::InvalidLevel { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var(LOG_LEVEL_ENV, "DEBUG");
        env::set_var(LOG_FORMAT_ENV, "json");
        let mut config = LoggingConfig::default();
        config.apply_env_overrides();
        env::remove_var(LOG_LEVEL_ENV);
        env::remove_var(LOG_FORMAT_ENV);

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_unknown_format_is_ignored() {
        env::set_var(LOG_FORMAT_ENV, "xml");
        let mut config = LoggingConfig::default();
        config.apply_env_overrides();
        env::remove_var(LOG_FORMAT_ENV);
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{"format": "compact", "file": {"dir": "logs", "prefix": "zmesh"}}"#;
        let config: LoggingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.level, "info");
        assert_eq!(config.file.unwrap().rotation, FileRotation::Daily);
    }
}
