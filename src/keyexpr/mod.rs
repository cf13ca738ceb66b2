//! Ключевые выражения.
//!
//! - `expr`: валидированный тип [`KeyExpr`] и грамматика выражений.
//! - `matching`: сопоставление опубликованного ключа с шаблоном подписки.
//! - `registry`: интернирование выражений в компактные [`KeyId`].

pub mod expr;
pub mod matching;
pub mod registry;

pub use expr::KeyExpr;
pub use matching::matches;
pub use registry::{KeyExprRegistry, KeyId};
