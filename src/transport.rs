//! Точка расширения для сетевого транспорта.
//!
//! Ядро не знает ни о согласовании соединений, ни о формате на проводе:
//! оно только спрашивает у транспорта, есть ли удалённые узлы для ключа,
//! и отдаёт им сэмпл. По умолчанию используется [`LocalTransport`], у
//! которого удалённых узлов нет.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::debug;
use zmesh_error::ConfigError;

use crate::{
    keyexpr::KeyExpr,
    pubsub::{Reliability, Sample},
    session::{SessionStatus, StatusSender},
};

/// Адрес узла в форме `<protocol>/<address>`, например `tcp/10.0.0.1:7447`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    raw: String,
    split: usize,
}

impl Endpoint {
    pub fn new(raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        match raw.find('/') {
            Some(split) if split > 0 && split + 1 < raw.len() => Ok(Self { raw, split }),
            _ => Err(ConfigError::InvalidEndpoint { endpoint: raw }),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.raw[..self.split]
    }

    pub fn address(&self) -> &str {
        &self.raw[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Endpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.raw
    }
}

/// Внешний транспорт домена.
///
/// Вызовы идут из потока издателя, поэтому реализации не должны
/// блокироваться надолго. Ошибка `send_remote` не возвращается издателю:
/// диспетчер логирует её и публикует в канал статуса.
pub trait Transport: Send + Sync + 'static {
    /// Начинает подключение к узлам. Результат сообщается асинхронно через
    /// `status` (`Connected` / `ConnectFailed`).
    fn connect(
        &self,
        endpoints: &[Endpoint],
        status: &StatusSender,
    );

    /// Удалённые узлы, подписанные на шаблоны, покрывающие `key`.
    fn matching_remotes(
        &self,
        key: &KeyExpr,
    ) -> Vec<Endpoint>;

    fn send_remote(
        &self,
        sample: &Sample,
        reliability: Reliability,
        endpoints: &[Endpoint],
    ) -> anyhow::Result<()>;
}

/// Транспорт только для одного процесса.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn connect(
        &self,
        endpoints: &[Endpoint],
        status: &StatusSender,
    ) {
        for endpoint in endpoints {
            debug!(%endpoint, "local transport cannot reach remote endpoints");
            status.report(SessionStatus::ConnectFailed {
                endpoint: endpoint.clone(),
                reason: "no network transport configured".to_string(),
            });
        }
    }

    fn matching_remotes(
        &self,
        _key: &KeyExpr,
    ) -> Vec<Endpoint> {
        Vec::new()
    }

    fn send_remote(
        &self,
        _sample: &Sample,
        _reliability: Reliability,
        endpoints: &[Endpoint],
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            endpoints.is_empty(),
            "local transport has no route to {} endpoint(s)",
            endpoints.len()
        );
        Ok(())
    }
}
