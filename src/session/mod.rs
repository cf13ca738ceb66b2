//! Сессии: подключение клиента к домену и владение его ресурсами.
//!
//! - `config`: [`SessionConfig`], ключи конфигурации и загрузка из окружения.
//! - `core`: [`Session`] и её операции.
//! - `handle`: копируемые хэндлы публикаций и подписок.
//! - `status`: канал событий жизненного цикла.
//! - `table`: поколенческая таблица ресурсов.

pub mod config;
pub mod core;
pub mod handle;
pub mod status;
pub mod table;

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

pub use self::config::{SessionConfig, SessionConfigBuilder, SessionMode};
pub use self::core::{PublicationOptions, Session, WeakSession};
pub use handle::{PublicationResource, Resource, SubscriptionResource};
pub use status::{SessionStatus, StatusSender};

/// Счётчик идентификаторов сессий, общий для всех доменов процесса.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Идентификатор сессии, уникальный в пределах процесса.
///
/// Хэндлы ресурсов несут идентификатор сессии-владельца, поэтому он не
/// может повторяться и между сессиями разных доменов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Выдаёт следующий свободный идентификатор.
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
