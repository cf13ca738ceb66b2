use std::{borrow::Borrow, fmt, str::FromStr, sync::Arc};

use zmesh_error::{PubSubError, PubSubResult};

/// Разделитель сегментов.
pub const SEPARATOR: char = '/';
/// Wildcard одного сегмента.
pub const SINGLE_WILD: &str = "*";
/// Wildcard любого числа сегментов (включая ноль).
pub const MULTI_WILD: &str = "**";

/// Неизменяемое валидированное ключевое выражение, например `demo/*/temp`.
///
/// Клонирование дешёвое (`Arc<str>`). Сравнение и хэш побайтовые, поэтому
/// `KeyExpr` можно искать в коллекциях по `&str`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyExpr(Arc<str>);

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl KeyExpr {
    /// Проверяет строку по грамматике и создаёт выражение.
    ///
    /// Ошибка [`PubSubError::InvalidKeyExpression`], если строка пустая,
    /// содержит NUL, пустой сегмент, `*` внутри сегмента или два `**`
    /// подряд.
    pub fn new(expr: &str) -> PubSubResult<Self> {
        validate(expr)?;
        Ok(Self(Arc::from(expr)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Итератор по сегментам выражения.
    pub fn segments(&self) -> std::str::Split<'_, char> {
        self.0.split(SEPARATOR)
    }

    /// Содержит ли выражение хотя бы один wildcard-сегмент.
    pub fn is_wild(&self) -> bool {
        self.segments()
            .any(|segment| segment == SINGLE_WILD || segment == MULTI_WILD)
    }

    /// Покрывается ли `self` шаблоном `pattern`.
    pub fn is_matched_by(
        &self,
        pattern: &KeyExpr,
    ) -> bool {
        super::matches(self.as_str(), pattern.as_str())
    }
}

fn validate(expr: &str) -> PubSubResult<()> {
    if expr.is_empty() {
        return Err(PubSubError::invalid_key_expr(expr, "key expression is empty"));
    }
    if expr.contains('\0') {
        return Err(PubSubError::invalid_key_expr(expr, "embedded NUL byte"));
    }

    let mut previous_multi = false;
    for segment in expr.split(SEPARATOR) {
        if segment.is_empty() {
            return Err(PubSubError::invalid_key_expr(expr, "empty segment"));
        }
        let is_multi = segment == MULTI_WILD;
        if segment.contains('*') && segment != SINGLE_WILD && !is_multi {
            return Err(PubSubError::invalid_key_expr(
                expr,
                "'*' must form a whole segment",
            ));
        }
        if is_multi && previous_multi {
            return Err(PubSubError::invalid_key_expr(
                expr,
                "consecutive '**' segments",
            ));
        }
        previous_multi = is_multi;
    }

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для KeyExpr
////////////////////////////////////////////////////////////////////////////////

impl Borrow<str> for KeyExpr {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for KeyExpr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyExpr {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for KeyExpr {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "KeyExpr({})", self.0)
    }
}

impl FromStr for KeyExpr {
    type Err = PubSubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for KeyExpr {
    type Error = PubSubError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for KeyExpr {
    type Error = PubSubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(Self(Arc::from(value)))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
