use super::{table::SlotKey, SessionId};
use crate::{keyexpr::KeyId, pubsub::SubscriberId};

/// Хэндл объявленной публикации.
///
/// Копируемый идентификатор, а не владелец: состояние живёт в таблице
/// сессии. После `undeclare` или закрытия сессии любое использование
/// возвращает `ResourceExpired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicationResource {
    pub(crate) session: SessionId,
    pub(crate) slot: SlotKey,
    pub(crate) key_id: KeyId,
}

impl PublicationResource {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn key_id(&self) -> KeyId {
        self.key_id
    }
}

/// Хэндл объявленной подписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionResource {
    pub(crate) session: SessionId,
    pub(crate) slot: SlotKey,
    pub(crate) id: SubscriberId,
}

impl SubscriptionResource {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Любой ресурс сессии, для `Session::undeclare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Publication(PublicationResource),
    Subscription(SubscriptionResource),
}

impl From<PublicationResource> for Resource {
    fn from(value: PublicationResource) -> Self {
        Self::Publication(value)
    }
}

impl From<SubscriptionResource> for Resource {
    fn from(value: SubscriptionResource) -> Self {
        Self::Subscription(value)
    }
}
