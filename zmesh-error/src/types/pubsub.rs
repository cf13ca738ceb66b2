use std::{any::Any, fmt};

use crate::{ErrorExt, StatusCode};

/// Вид ресурса сессии, к которому относится ошибка.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Publication,
    Subscription,
}

/// Ошибки ядра pub/sub.
///
/// Ошибки неправильного использования API (`InvalidKeyExpression`,
/// `UnknownKeyId`, `ResourceExpired`, `SessionClosed`, `NotPullMode`)
/// возвращаются вызывающему синхронно. Ошибки пути доставки
/// (`DispatchCallbackFailed`, `BufferOverflowDropped`, `RemoteSendFailed`)
/// никогда не возвращаются издателю: они логируются, считаются и
/// публикуются в канал статуса сессии.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubError {
    /// Строка нарушает грамматику ключевых выражений.
    InvalidKeyExpression { expr: String, reason: String },
    /// Идентификатор не был выдан реестром этой сессии.
    UnknownKeyId { id: u64 },
    /// Хэндл ресурса устарел (undeclare, закрытие сессии или чужая сессия).
    ResourceExpired { kind: ResourceKind },
    /// Сессия закрыта или закрывается.
    SessionClosed { session: u64 },
    /// `pull`/`recv` вызван на push-подписке.
    NotPullMode { subscription: u64 },
    /// Callback подписчика вернул ошибку или запаниковал.
    DispatchCallbackFailed {
        subscription: u64,
        key: String,
        reason: String,
    },
    /// Буфер pull-подписки переполнен, самый старый сэмпл выброшен.
    BufferOverflowDropped { subscription: u64, dropped: u64 },
    /// Транспорт не смог отправить сэмпл удалённым узлам.
    RemoteSendFailed { key: String, reason: String },
}

impl PubSubError {
    pub fn invalid_key_expr(
        expr: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidKeyExpression {
            expr: expr.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Publication => write!(f, "publication"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

impl fmt::Display for PubSubError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::InvalidKeyExpression { expr, reason } => {
                write!(f, "invalid key expression '{expr}': {reason}")
            }
            Self::UnknownKeyId { id } => write!(f, "unknown key id {id}"),
            Self::ResourceExpired { kind } => write!(f, "{kind} resource expired"),
            Self::SessionClosed { session } => write!(f, "session {session} is closed"),
            Self::NotPullMode { subscription } => {
                write!(f, "subscription {subscription} is not in pull mode")
            }
            Self::DispatchCallbackFailed {
                subscription,
                key,
                reason,
            } => write!(
                f,
                "callback of subscription {subscription} failed on '{key}': {reason}"
            ),
            Self::BufferOverflowDropped {
                subscription,
                dropped,
            } => write!(
                f,
                "pull buffer of subscription {subscription} overflowed ({dropped} dropped in total)"
            ),
            Self::RemoteSendFailed { key, reason } => {
                write!(f, "remote send of '{key}' failed: {reason}")
            }
        }
    }
}

impl std::error::Error for PubSubError {}

impl ErrorExt for PubSubError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidKeyExpression { .. } => StatusCode::InvalidKeyExpr,
            Self::UnknownKeyId { .. } => StatusCode::UnknownKeyId,
            Self::ResourceExpired { .. } => StatusCode::ResourceExpired,
            Self::SessionClosed { .. } => StatusCode::SessionClosed,
            Self::NotPullMode { .. } => StatusCode::InvalidOperation,
            Self::DispatchCallbackFailed { .. } => StatusCode::CallbackFailed,
            Self::BufferOverflowDropped { .. } => StatusCode::BufferOverflow,
            Self::RemoteSendFailed { .. } => StatusCode::RemoteSendFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
