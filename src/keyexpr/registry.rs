use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use zmesh_error::{PubSubError, PubSubResult};

use super::KeyExpr;

/// Компактный идентификатор ключевого выражения внутри одного реестра.
///
/// Выдаётся монотонно начиная с 1 и никогда не переиспользуется.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u64);

impl KeyId {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Реестр интернированных ключевых выражений.
///
/// Одна строка (побайтово, с учётом регистра) получает ровно один `KeyId`,
/// отображение `KeyId -> KeyExpr` после выдачи не меняется. Выделение
/// идентификатора происходит под блокировкой шарда `DashMap`, поэтому
/// конкурентные `intern` одной строки получают один и тот же id.
#[derive(Debug)]
pub struct KeyExprRegistry {
    by_expr: DashMap<KeyExpr, KeyId>,
    by_id: DashMap<KeyId, KeyExpr>,
    next_id: AtomicU64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl KeyExprRegistry {
    pub fn new() -> Self {
        Self {
            by_expr: DashMap::new(),
            by_id: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Интернирует строку, проверяя грамматику.
    ///
    /// Уже известная строка возвращает прежний id без повторной валидации.
    pub fn intern(
        &self,
        expr: &str,
    ) -> PubSubResult<KeyId> {
        if let Some(id) = self.by_expr.get(expr) {
            return Ok(*id);
        }
        let key_expr = KeyExpr::new(expr)?;
        Ok(self.intern_expr(&key_expr))
    }

    /// Интернирует уже валидированное выражение.
    pub fn intern_expr(
        &self,
        key_expr: &KeyExpr,
    ) -> KeyId {
        if let Some(id) = self.by_expr.get(key_expr.as_str()) {
            return *id;
        }
        let entry = self.by_expr.entry(key_expr.clone()).or_insert_with(|| {
            let id = KeyId(self.next_id.fetch_add(1, Ordering::Relaxed));
            self.by_id.insert(id, key_expr.clone());
            id
        });
        *entry
    }

    /// Возвращает выражение по идентификатору.
    pub fn resolve(
        &self,
        id: KeyId,
    ) -> PubSubResult<KeyExpr> {
        self.by_id
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(PubSubError::UnknownKeyId { id: id.get() })
    }

    /// Id уже интернированной строки, без выделения нового.
    pub fn lookup(
        &self,
        expr: &str,
    ) -> Option<KeyId> {
        self.by_expr.get(expr).map(|id| *id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for KeyExprRegistry {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
