//! Путь публикации: сэмплы, подписчики и диспетчер.
//!
//! - `sample`: единица доставки и класс надёжности.
//! - `subscriber`: режимы доставки (push/pull), буфер pull-подписки и
//!   барьер, отделяющий доставки от `undeclare`.
//! - `dispatcher`: индекс шаблонов, кэш маршрутов и доставка по всем
//!   сессиям домена.

pub mod dispatcher;
pub mod sample;
pub mod subscriber;

pub use dispatcher::*;
pub use sample::*;
pub use subscriber::{Callback, DeliveryMode, SubscriberId, SubscriberSlot};
