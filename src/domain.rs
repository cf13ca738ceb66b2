use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    pubsub::Dispatcher,
    session::{Session, SessionConfig, SessionId},
    transport::{LocalTransport, Transport},
};

struct DomainInner {
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    live_sessions: AtomicUsize,
}

/// Домен обмена сообщениями: сессии одного домена доставляют друг другу
/// локально через общий [`Dispatcher`].
///
/// Клонирование дешёвое. Сессия держит клон домена, так что домен живёт,
/// пока жива хотя бы одна его сессия.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    /// Домен без удалённых узлов ([`LocalTransport`]).
    pub fn new() -> Self {
        Self::with_transport(Arc::new(LocalTransport))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(DomainInner {
                dispatcher: Arc::new(Dispatcher::new(Arc::clone(&transport))),
                transport,
                live_sessions: AtomicUsize::new(0),
            }),
        }
    }

    /// Открывает сессию. Локально всегда успешно; сбои подключения к
    /// `connect`-узлам приходят в канал статуса сессии.
    pub fn open(
        &self,
        config: SessionConfig,
    ) -> Session {
        let id = SessionId::next();
        self.inner.live_sessions.fetch_add(1, Ordering::Relaxed);
        Session::new(id, self.clone(), config)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Количество открытых (не закрытых) сессий.
    pub fn live_sessions(&self) -> usize {
        self.inner.live_sessions.load(Ordering::Relaxed)
    }

    pub(crate) fn session_closed(&self) {
        self.inner.live_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("live_sessions", &self.live_sessions())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет уникальность идентификаторов и счётчик живых сессий.
    #[test]
    fn test_session_ids_are_unique() {
        let domain = Domain::new();
        let a = domain.open(SessionConfig::default());
        let b = domain.open(SessionConfig::default());
        assert_ne!(a.id(), b.id());
        assert_eq!(domain.live_sessions(), 2);

        a.close().unwrap();
        assert_eq!(domain.live_sessions(), 1);
        drop(b);
        assert_eq!(domain.live_sessions(), 0);
    }

    /// Тест проверяет, что приватные домены изолированы друг от друга.
    #[test]
    fn test_private_domains_are_isolated() {
        let a = Session::open(SessionConfig::default());
        let b = Session::open(SessionConfig::default());
        b.declare_subscription("**", crate::pubsub::DeliveryMode::pull())
            .unwrap();
        assert_eq!(a.domain().dispatcher().subscriber_count(), 0);
        assert_eq!(b.domain().dispatcher().subscriber_count(), 1);
        assert_ne!(a.id(), b.id());
    }
}
