use std::fmt;

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ключевые выражения
/// - 3xxx: Сессии и ресурсы (публикации, подписки)
/// - 4xxx: Доставка сэмплов
/// - 5xxx: Конфигурация
/// - 6xxx: IO / транспорт
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Internal = 1001,
    InvalidArgs = 1002,
    InvalidOperation = 1003,

    // === 2xxx: Ключевые выражения ===
    InvalidKeyExpr = 2000,
    UnknownKeyId = 2001,

    // === 3xxx: Сессии и ресурсы ===
    ResourceExpired = 3000,
    SessionClosed = 3001,

    // === 4xxx: Доставка ===
    CallbackFailed = 4000,
    BufferOverflow = 4001,
    RemoteSendFailed = 4002,

    // === 5xxx: Конфигурация ===
    InvalidConfig = 5000,
    ConfigLoadFailed = 5001,

    // === 6xxx: IO/транспорт ===
    Io = 6000,
    ConnectionFailed = 6001,
}

/// Уровень, на котором логируется ошибка с данным статусом.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::BufferOverflow => LogLevel::Debug,
            Self::InvalidArgs
            | Self::InvalidOperation
            | Self::InvalidKeyExpr
            | Self::UnknownKeyId
            | Self::ResourceExpired
            | Self::SessionClosed
            | Self::InvalidConfig => LogLevel::Info,
            Self::CallbackFailed | Self::RemoteSendFailed | Self::ConnectionFailed => {
                LogLevel::Warn
            }
            Self::Internal => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
