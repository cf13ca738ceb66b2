use std::borrow::Cow;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    keyexpr::{KeyExpr, KeyId},
    session::SessionId,
};

/// Класс надёжности публикации.
///
/// Локальная доставка от него не зависит; значение записывается в
/// публикацию и передаётся транспорту при отправке удалённым узлам.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    BestEffort,
    #[default]
    Reliable,
}

/// Откуда пришёл сэмпл: сессия издателя и порядковый номер внутри
/// публикации (начинается с 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub session: SessionId,
    pub sequence: u64,
}

/// Единица доставки: ключ, полезная нагрузка и метаданные.
///
/// `key_id` всегда валиден в реестре сессии получателя: при доставке в
/// другую сессию диспетчер переинтернирует ключ.
#[derive(Debug, Clone)]
pub struct Sample {
    pub key_id: KeyId,
    pub key_expr: KeyExpr,
    pub payload: Bytes,
    pub timestamp: DateTime<Utc>,
    pub source: SourceInfo,
}

impl Sample {
    pub fn new(
        key_id: KeyId,
        key_expr: KeyExpr,
        payload: impl Into<Bytes>,
        source: SourceInfo,
    ) -> Self {
        Self {
            key_id,
            key_expr,
            payload: payload.into(),
            timestamp: Utc::now(),
            source,
        }
    }

    /// Копия сэмпла с другим `KeyId` (payload не копируется, `Bytes`
    /// разделяет буфер).
    pub fn with_key_id(
        &self,
        key_id: KeyId,
    ) -> Self {
        Self {
            key_id,
            ..self.clone()
        }
    }

    /// Payload как UTF-8 (с заменой невалидных последовательностей).
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
