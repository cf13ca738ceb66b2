//! Логирование через `tracing`: консоль (pretty/compact/json) и
//! опциональный non-blocking файл с ротацией.

pub mod config;
mod filters;

use std::{fs, io};

pub use config::{FileRotation, FileSinkConfig, LogFormat, LoggingConfig};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, Layer,
};

use crate::error::LoggingError;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Событие `tracing` на уровне, известном только во время выполнения.
///
/// Макросы `tracing` требуют константный уровень, поэтому
/// [`LogLevel`](crate::error::LogLevel) раскрывается в `match`. Обычно
/// уровень берётся из статуса ошибки: `log_at!(err.status_code().log_level(), ...)`.
#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            $crate::error::LogLevel::Trace => ::tracing::trace!($($arg)+),
            $crate::error::LogLevel::Debug => ::tracing::debug!($($arg)+),
            $crate::error::LogLevel::Info => ::tracing::info!($($arg)+),
            $crate::error::LogLevel::Warn => ::tracing::warn!($($arg)+),
            $crate::error::LogLevel::Error => ::tracing::error!($($arg)+),
        }
    };
}

/// Держит worker файлового sink: при drop буфер сбрасывается на диск.
#[derive(Debug)]
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
}

impl LoggingHandle {
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }
}

/// Устанавливает глобальный subscriber.
///
/// Возвращённый [`LoggingHandle`] нужно держать до конца работы процесса.
pub fn init_logging(mut config: LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.apply_env_overrides();
    config.validate()?;

    let filter = filters::build_filter(&config)?;
    let (layers, file_guard) = build_layers(&config)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::AlreadyInitialized(err.to_string()))?;

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.level,
        format = %config.format,
        file = file_guard.is_some(),
        "logging initialized"
    );

    Ok(LoggingHandle {
        file_guard,
    })
}

fn build_layers<S>(
    config: &LoggingConfig
) -> Result<(Vec<BoxedLayer<S>>, Option<WorkerGuard>), LoggingError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let mut layers = vec![console_layer(config)];
    let guard = match &config.file {
        Some(file) => {
            let (layer, guard) = file_layer(config, file)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };
    Ok((layers, guard))
}

fn console_layer<S>(config: &LoggingConfig) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.with_ansi)
        .with_target(config.with_target);

    match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
    }
}

fn file_layer<S>(
    config: &LoggingConfig,
    file: &FileSinkConfig,
) -> Result<(BoxedLayer<S>, WorkerGuard), LoggingError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    fs::create_dir_all(&file.dir).map_err(|source| LoggingError::LogDir {
        path: file.dir.clone(),
        source,
    })?;

    let rotation = match file.rotation {
        FileRotation::Hourly => rolling::Rotation::HOURLY,
        FileRotation::Daily => rolling::Rotation::DAILY,
        FileRotation::Never => rolling::Rotation::NEVER,
    };
    let appender = rolling::RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file.prefix.as_str())
        .filename_suffix("log")
        .build(&file.dir)
        .map_err(|err| LoggingError::Appender(err.to_string()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(config.with_target);
    let layer = match config.format {
        LogFormat::Json => layer.json().boxed(),
        _ => layer.boxed(),
    };
    Ok((layer, guard))
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::Registry;

    use super::*;

    /// Тест проверяет, что файловый sink создаёт каталог и пишет в файл.
    #[test]
    fn test_file_sink_writes_events() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested/logs");
        let config = LoggingConfig {
            format: LogFormat::Compact,
            with_ansi: false,
            file: Some(FileSinkConfig {
                dir: log_dir.clone(),
                prefix: "zmesh".into(),
                rotation: FileRotation::Never,
            }),
            ..Default::default()
        };

        let (layers, guard) = build_layers::<Registry>(&config).unwrap();
        assert_eq!(layers.len(), 2);
        let subscriber = Registry::default().with(layers);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(key = "demo/a", "written to file");
        });
        drop(guard);

        let contents: String = fs::read_dir(&log_dir)
            .unwrap()
            .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        assert!(contents.contains("written to file"));
    }

    /// Тест проверяет, что `log_at!` пишет событие на уровне из статуса
    /// ошибки.
    #[test]
    fn test_log_at_uses_status_level() {
        use std::sync::{Arc, Mutex};

        use crate::error::{ErrorExt, PubSubError};

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl io::Write for Captured {
            fn write(
                &mut self,
                buf: &[u8],
            ) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = Registry::default().with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        );

        let overflow = PubSubError::BufferOverflowDropped {
            subscription: 1,
            dropped: 1,
        };
        let failed = PubSubError::DispatchCallbackFailed {
            subscription: 2,
            key: "demo/a".into(),
            reason: "boom".into(),
        };
        tracing::subscriber::with_default(subscriber, || {
            crate::log_at!(overflow.status_code().log_level(), "overflow event");
            crate::log_at!(failed.status_code().log_level(), error = %failed, "callback event");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line = |needle: &str| {
            output
                .lines()
                .find(|l| l.contains(needle))
                .unwrap_or_default()
                .to_string()
        };
        assert!(line("overflow event").contains("DEBUG"), "got: {output}");
        assert!(line("callback event").contains("WARN"), "got: {output}");
    }

    #[test]
    fn test_console_only_for_every_format() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            let config = LoggingConfig {
                format,
                ..Default::default()
            };
            let (layers, guard) = build_layers::<Registry>(&config).unwrap();
            assert_eq!(layers.len(), 1);
            assert!(guard.is_none());
        }
    }
}
