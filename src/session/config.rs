use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use zmesh_error::ConfigError;

use crate::{pubsub::Reliability, transport::Endpoint};

pub const MODE_KEY: &str = "mode";
pub const CONNECT_KEY: &str = "connect";
pub const LISTEN_KEY: &str = "listen";
pub const RELIABILITY_KEY: &str = "reliability";
pub const PULL_CAPACITY_KEY: &str = "pull_capacity";
pub const STATUS_CAPACITY_KEY: &str = "status_capacity";

pub const DEFAULT_PULL_CAPACITY: usize = 256;
pub const DEFAULT_STATUS_CAPACITY: usize = 64;

/// Префикс переменных окружения для [`SessionConfig::load`].
pub const ENV_PREFIX: &str = "ZMESH";

/// Роль сессии в домене.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Peer,
    Client,
}

/// Конфигурация сессии.
///
/// Известные ключи разбираются строго; неизвестные сохраняются в
/// `extensions` как есть и передаются дальше без интерпретации.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub connect: Vec<Endpoint>,
    pub listen: Vec<Endpoint>,
    /// Надёжность публикаций по умолчанию.
    pub reliability: Reliability,
    /// Ёмкость буфера pull-подписки по умолчанию.
    pub pull_capacity: usize,
    /// Ёмкость канала статуса.
    pub status_capacity: usize,
    #[serde(skip)]
    pub extensions: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    mode: Option<SessionMode>,
    connect: Vec<Endpoint>,
    listen: Vec<Endpoint>,
    reliability: Option<Reliability>,
    pull_capacity: Option<usize>,
    status_capacity: Option<usize>,
    extensions: BTreeMap<String, Value>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Собирает конфигурацию из плоских пар ключ/значение.
    ///
    /// Значение сначала разбирается как JSON (`["tcp/a:1"]`, `512`), а если
    /// это не JSON, берётся как обычная строка (`peer`).
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, raw) in pairs {
            let raw = raw.as_ref();
            let value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            config.insert_value(key.as_ref(), value)?;
        }
        Ok(config)
    }

    /// Устанавливает ключ из строки JSON. Невалидный JSON — ошибка.
    pub fn insert_json(
        &mut self,
        key: &str,
        json: &str,
    ) -> Result<(), ConfigError> {
        let value = serde_json::from_str(json).map_err(|err| ConfigError::InvalidJson {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        self.insert_value(key, value)
    }

    pub fn insert_value(
        &mut self,
        key: &str,
        value: Value,
    ) -> Result<(), ConfigError> {
        match key {
            MODE_KEY => self.mode = typed(key, value)?,
            CONNECT_KEY => self.connect = endpoints(key, value)?,
            LISTEN_KEY => self.listen = endpoints(key, value)?,
            RELIABILITY_KEY => self.reliability = typed(key, value)?,
            PULL_CAPACITY_KEY => self.pull_capacity = capacity(key, value)?,
            STATUS_CAPACITY_KEY => self.status_capacity = capacity(key, value)?,
            _ => {
                debug!(key, "unrecognized config key kept in extensions");
                self.extensions.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn extension(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.extensions.get(key)
    }

    /// Загружает конфигурацию: значения по умолчанию, затем переменные
    /// окружения `ZMESH_*` (списки через запятую: `ZMESH_CONNECT=tcp/a:1,tcp/b:2`).
    pub fn load() -> Result<Self, ConfigError> {
        let load_err = |err: ::config::ConfigError| ConfigError::Load {
            reason: err.to_string(),
        };

        let cfg = ::config::Config::builder()
            .set_default(MODE_KEY, "peer")
            .and_then(|b| b.set_default(CONNECT_KEY, Vec::<String>::new()))
            .and_then(|b| b.set_default(LISTEN_KEY, Vec::<String>::new()))
            .and_then(|b| b.set_default(RELIABILITY_KEY, "reliable"))
            .and_then(|b| b.set_default(PULL_CAPACITY_KEY, DEFAULT_PULL_CAPACITY as i64))
            .and_then(|b| b.set_default(STATUS_CAPACITY_KEY, DEFAULT_STATUS_CAPACITY as i64))
            .map_err(load_err)?
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key(CONNECT_KEY)
                    .with_list_parse_key(LISTEN_KEY),
            )
            .build()
            .map_err(load_err)?;

        let config: Self = cfg.try_deserialize().map_err(load_err)?;
        config.validate()?;
        Ok(config)
    }

    /// Проверяет инварианты, которые serde не выражает.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            (PULL_CAPACITY_KEY, self.pull_capacity),
            (STATUS_CAPACITY_KEY, self.status_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn typed<T: serde::de::DeserializeOwned>(
    key: &str,
    value: Value,
) -> Result<T, ConfigError> {
    serde_json::from_value(value).map_err(|err| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

fn endpoints(
    key: &str,
    value: Value,
) -> Result<Vec<Endpoint>, ConfigError> {
    let Value::Array(items) = value else {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a JSON list of endpoints".to_string(),
        });
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(raw) => Endpoint::new(raw),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("endpoint must be a string, got {other}"),
            }),
        })
        .collect()
}

fn capacity(
    key: &str,
    value: Value,
) -> Result<usize, ConfigError> {
    match value.as_u64() {
        Some(n) if n > 0 => usize::try_from(n).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("{n} is too large"),
        }),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a positive integer, got {value}"),
        }),
    }
}

impl SessionConfigBuilder {
    pub fn mode(
        mut self,
        mode: SessionMode,
    ) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn connect(
        mut self,
        endpoint: Endpoint,
    ) -> Self {
        self.connect.push(endpoint);
        self
    }

    pub fn listen(
        mut self,
        endpoint: Endpoint,
    ) -> Self {
        self.listen.push(endpoint);
        self
    }

    pub fn reliability(
        mut self,
        reliability: Reliability,
    ) -> Self {
        self.reliability = Some(reliability);
        self
    }

    pub fn pull_capacity(
        mut self,
        capacity: usize,
    ) -> Self {
        self.pull_capacity = Some(capacity);
        self
    }

    pub fn status_capacity(
        mut self,
        capacity: usize,
    ) -> Self {
        self.status_capacity = Some(capacity);
        self
    }

    pub fn extension(
        mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn build(self) -> SessionConfig {
        let default = SessionConfig::default();
        SessionConfig {
            mode: self.mode.unwrap_or(default.mode),
            connect: self.connect,
            listen: self.listen,
            reliability: self.reliability.unwrap_or(default.reliability),
            pull_capacity: self.pull_capacity.unwrap_or(default.pull_capacity),
            status_capacity: self.status_capacity.unwrap_or(default.status_capacity),
            extensions: self.extensions,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для SessionConfig
////////////////////////////////////////////////////////////////////////////////

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Peer,
            connect: Vec::new(),
            listen: Vec::new(),
            reliability: Reliability::Reliable,
            pull_capacity: DEFAULT_PULL_CAPACITY,
            status_capacity: DEFAULT_STATUS_CAPACITY,
            extensions: BTreeMap::new(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
