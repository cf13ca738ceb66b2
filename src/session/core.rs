use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};
use zmesh_error::{PubSubError, PubSubResult, ResourceKind};

use super::{
    table::ResourceTable, PublicationResource, Resource, SessionConfig, SessionId, SessionStatus,
    StatusSender, SubscriptionResource,
};
use crate::{
    domain::Domain,
    keyexpr::{KeyExpr, KeyExprRegistry, KeyId},
    pubsub::{DeliveryMode, Dispatcher, Reliability, Sample, SourceInfo, SubscriberSlot},
};

/// Параметры объявления публикации.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicationOptions {
    /// `None` — надёжность из конфигурации сессии.
    pub reliability: Option<Reliability>,
}

impl PublicationOptions {
    pub fn reliability(
        mut self,
        reliability: Reliability,
    ) -> Self {
        self.reliability = Some(reliability);
        self
    }
}

#[derive(Debug)]
struct PublicationEntry {
    key_id: KeyId,
    key_expr: KeyExpr,
    reliability: Reliability,
    sequence: AtomicU64,
}

enum Lifecycle {
    Open(Arc<KeyExprRegistry>),
    Closed,
}

struct SessionInner {
    id: SessionId,
    domain: Domain,
    config: SessionConfig,
    status: Arc<StatusSender>,
    lifecycle: RwLock<Lifecycle>,
    publications: Mutex<ResourceTable<Arc<PublicationEntry>>>,
    subscriptions: Mutex<ResourceTable<Arc<SubscriberSlot>>>,
}

/// Сессия клиента в домене.
///
/// Владеет собственным реестром ключей и таблицами публикаций и подписок.
/// Клонирование дешёвое и даёт ту же сессию; когда уничтожается последний
/// клон, сессия закрывается, если её не закрыли явно.
///
/// Все операции держат рекурсивную read-блокировку жизненного цикла на
/// время выполнения, `close` берёт write-блокировку и тем самым ждёт их
/// завершения. Callback подписчика не должен закрывать сессию, чей `put`
/// его вызвал, и не должен отписывать собственную подписку.
///
/// Push-callback, захвативший клон своей же сессии, образует цикл
/// ссылок (сессия → подписка → callback → сессия): такая сессия не
/// закроется при drop. Внутрь callback передавайте [`WeakSession`] из
/// [`Session::downgrade`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// Слабая ссылка на сессию, не продлевающая ей жизнь.
#[derive(Clone)]
pub struct WeakSession {
    inner: Weak<SessionInner>,
}

impl WeakSession {
    /// `None`, если все сильные клоны сессии уже уничтожены.
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

impl fmt::Debug for WeakSession {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WeakSession")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Session {
    /// Открывает сессию в новом приватном домене.
    pub fn open(config: SessionConfig) -> Self {
        Domain::new().open(config)
    }

    pub(crate) fn new(
        id: SessionId,
        domain: Domain,
        config: SessionConfig,
    ) -> Self {
        let status = Arc::new(StatusSender::new(config.status_capacity));
        status.report(SessionStatus::Opened);
        domain.transport().connect(&config.connect, &status);

        info!(
            session = %id,
            mode = ?config.mode,
            connect = config.connect.len(),
            "session opened"
        );

        Self {
            inner: Arc::new(SessionInner {
                id,
                domain,
                config,
                status,
                lifecycle: RwLock::new(Lifecycle::Open(Arc::new(KeyExprRegistry::new()))),
                publications: Mutex::new(ResourceTable::new()),
                subscriptions: Mutex::new(ResourceTable::new()),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn domain(&self) -> &Domain {
        &self.inner.domain
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.lifecycle.read_recursive(), Lifecycle::Closed)
    }

    /// Подписка на события жизненного цикла сессии.
    ///
    /// Первый вызов получает и события, случившиеся до него (`Opened`,
    /// `ConnectFailed`).
    pub fn status(&self) -> broadcast::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn intern(
        &self,
        expr: &str,
    ) -> PubSubResult<KeyId> {
        self.with_open(|registry| registry.intern(expr))
    }

    pub fn resolve(
        &self,
        id: KeyId,
    ) -> PubSubResult<KeyExpr> {
        self.with_open(|registry| registry.resolve(id))
    }

    pub fn declare_publication(
        &self,
        key_id: KeyId,
    ) -> PubSubResult<PublicationResource> {
        self.declare_publication_with(key_id, PublicationOptions::default())
    }

    /// Объявляет публикацию на конкретный (без wildcard) ключ.
    pub fn declare_publication_with(
        &self,
        key_id: KeyId,
        options: PublicationOptions,
    ) -> PubSubResult<PublicationResource> {
        self.with_open(|registry| {
            let key_expr = registry.resolve(key_id)?;
            if key_expr.is_wild() {
                return Err(PubSubError::invalid_key_expr(
                    key_expr.as_str(),
                    "publications require a key without wildcards",
                ));
            }

            let reliability = options.reliability.unwrap_or(self.inner.config.reliability);
            let entry = Arc::new(PublicationEntry {
                key_id,
                key_expr: key_expr.clone(),
                reliability,
                sequence: AtomicU64::new(0),
            });
            let slot = self.inner.publications.lock().insert(entry);
            self.dispatcher().register_publisher(&key_expr);

            debug!(
                session = %self.inner.id,
                key = %key_expr,
                ?reliability,
                "publication declared"
            );
            Ok(PublicationResource {
                session: self.inner.id,
                slot,
                key_id,
            })
        })
    }

    /// Объявляет подписку на шаблон. Получает только будущие `put`.
    pub fn declare_subscription(
        &self,
        pattern: &str,
        mode: DeliveryMode,
    ) -> PubSubResult<SubscriptionResource> {
        self.with_open(|registry| {
            let pattern = KeyExpr::new(pattern)?;
            let dispatcher = self.dispatcher();
            let slot = Arc::new(SubscriberSlot::new(
                dispatcher.next_subscriber_id(),
                self.inner.id,
                pattern,
                mode,
                self.inner.config.pull_capacity,
                Arc::clone(registry),
                Arc::clone(&self.inner.status),
            ));
            let key = self.inner.subscriptions.lock().insert(Arc::clone(&slot));
            dispatcher.register_subscriber(Arc::clone(&slot));

            debug!(
                session = %self.inner.id,
                subscription = %slot.id(),
                pattern = %slot.pattern(),
                pull = slot.is_pull(),
                "subscription declared"
            );
            Ok(SubscriptionResource {
                session: self.inner.id,
                slot: key,
                id: slot.id(),
            })
        })
    }

    /// Отменяет объявление ресурса.
    ///
    /// Для подписки возвращается только после того, как текущие доставки
    /// завершились; callback после этого не вызывается.
    pub fn undeclare(
        &self,
        resource: impl Into<Resource>,
    ) -> PubSubResult<()> {
        match resource.into() {
            Resource::Publication(handle) => self.with_open(|_| {
                let key = self.owned(handle.session, handle.slot, ResourceKind::Publication)?;
                let entry = self
                    .inner
                    .publications
                    .lock()
                    .remove(key)
                    .ok_or(expired(ResourceKind::Publication))?;
                self.dispatcher().unregister_publisher(&entry.key_expr);
                debug!(session = %self.inner.id, key = %entry.key_expr, "publication undeclared");
                Ok(())
            }),
            // Барьер доставки проходится под read-блокировкой: `close` не
            // вернётся, пока слот ещё в индексе диспетчера.
            Resource::Subscription(handle) => self.with_open(|_| {
                let key = self.owned(handle.session, handle.slot, ResourceKind::Subscription)?;
                let slot = self
                    .inner
                    .subscriptions
                    .lock()
                    .remove(key)
                    .ok_or(expired(ResourceKind::Subscription))?;
                self.dispatcher().unregister_subscriber(&slot);
                debug!(
                    session = %self.inner.id,
                    subscription = %slot.id(),
                    "subscription undeclared"
                );
                Ok(())
            }),
        }
    }

    /// Публикует payload. Возвращается после передачи сэмпла диспетчеру.
    pub fn put(
        &self,
        publication: PublicationResource,
        payload: impl Into<Bytes>,
    ) -> PubSubResult<()> {
        let payload = payload.into();
        self.with_open(|_| {
            let entry = self.publication(publication)?;
            let sample = Sample::new(
                entry.key_id,
                entry.key_expr.clone(),
                payload,
                SourceInfo {
                    session: self.inner.id,
                    sequence: entry.sequence.fetch_add(1, Ordering::Relaxed),
                },
            );

            let report = self.dispatcher().dispatch(&sample, entry.reliability);
            trace!(
                session = %self.inner.id,
                key = %sample.key_expr,
                delivered = report.delivered,
                "put handed off"
            );
            if let Some(err) = report.remote_error {
                self.inner.status.report(SessionStatus::DeliveryFailed(err));
            }
            Ok(())
        })
    }

    /// Забирает следующий сэмпл pull-подписки без ожидания.
    pub fn pull(
        &self,
        subscription: SubscriptionResource,
    ) -> PubSubResult<Option<Sample>> {
        self.with_open(|_| Ok(self.subscription(subscription)?.pull_buffer()?.try_pop()))
    }

    /// Ждёт следующий сэмпл pull-подписки.
    ///
    /// Если подписку отменили (или сессию закрыли) во время ожидания,
    /// возвращается `ResourceExpired`.
    pub async fn recv(
        &self,
        subscription: SubscriptionResource,
    ) -> PubSubResult<Sample> {
        let buffer = self.with_open(|_| {
            Ok(Arc::clone(self.subscription(subscription)?.pull_buffer()?))
        })?;
        buffer.recv().await.ok_or(expired(ResourceKind::Subscription))
    }

    /// Сколько сэмплов pull-подписки выброшено из-за переполнения.
    pub fn dropped_samples(
        &self,
        subscription: SubscriptionResource,
    ) -> PubSubResult<u64> {
        self.with_open(|_| Ok(self.subscription(subscription)?.dropped()))
    }

    /// Сколько живых подписок домена получат `put` этой публикации.
    pub fn matching_subscribers(
        &self,
        publication: PublicationResource,
    ) -> PubSubResult<usize> {
        self.with_open(|_| {
            let entry = self.publication(publication)?;
            Ok(self.dispatcher().matching_subscribers(&entry.key_expr))
        })
    }

    /// Закрывает сессию: отменяет все ресурсы и освобождает реестр.
    ///
    /// Ждёт завершения операций, начатых до вызова. Повторный `close`
    /// возвращает `SessionClosed`.
    pub fn close(&self) -> PubSubResult<()> {
        self.inner.close()
    }

    fn with_open<T>(
        &self,
        f: impl FnOnce(&Arc<KeyExprRegistry>) -> PubSubResult<T>,
    ) -> PubSubResult<T> {
        let lifecycle = self.inner.lifecycle.read_recursive();
        match &*lifecycle {
            Lifecycle::Open(registry) => f(registry),
            Lifecycle::Closed => Err(self.inner.closed_error()),
        }
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.inner.domain.dispatcher()
    }

    /// Хэндл чужой сессии считается устаревшим.
    fn owned<K>(
        &self,
        owner: SessionId,
        key: K,
        kind: ResourceKind,
    ) -> PubSubResult<K> {
        if owner == self.inner.id {
            Ok(key)
        } else {
            Err(expired(kind))
        }
    }

    fn publication(
        &self,
        handle: PublicationResource,
    ) -> PubSubResult<Arc<PublicationEntry>> {
        let slot = self.owned(handle.session, handle.slot, ResourceKind::Publication)?;
        self.inner
            .publications
            .lock()
            .get(slot)
            .cloned()
            .ok_or(expired(ResourceKind::Publication))
    }

    fn subscription(
        &self,
        handle: SubscriptionResource,
    ) -> PubSubResult<Arc<SubscriberSlot>> {
        let slot = self.owned(handle.session, handle.slot, ResourceKind::Subscription)?;
        self.inner
            .subscriptions
            .lock()
            .get(slot)
            .cloned()
            .ok_or(expired(ResourceKind::Subscription))
    }
}

fn expired(kind: ResourceKind) -> PubSubError {
    PubSubError::ResourceExpired { kind }
}

impl SessionInner {
    fn closed_error(&self) -> PubSubError {
        PubSubError::SessionClosed {
            session: self.id.get(),
        }
    }

    fn close(&self) -> PubSubResult<()> {
        let registry = {
            let mut lifecycle = self.lifecycle.write();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
                Lifecycle::Open(registry) => registry,
                Lifecycle::Closed => return Err(self.closed_error()),
            }
        };

        let dispatcher = self.domain.dispatcher();
        let subscriptions = self.subscriptions.lock().drain();
        for slot in &subscriptions {
            dispatcher.unregister_subscriber(slot);
        }
        let publications = self.publications.lock().drain();
        for entry in &publications {
            dispatcher.unregister_publisher(&entry.key_expr);
        }

        self.status.report(SessionStatus::Closed);
        self.domain.session_closed();
        info!(
            session = %self.id,
            subscriptions = subscriptions.len(),
            publications = publications.len(),
            interned = registry.len(),
            "session closed"
        );
        Ok(())
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if matches!(*self.lifecycle.get_mut(), Lifecycle::Open(_)) {
            let _ = self.close();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.config.mode)
            .field("closed", &self.is_closed())
            .field("publications", &self.inner.publications.lock().len())
            .field("subscriptions", &self.inner.subscriptions.lock().len())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn open() -> Session {
        Session::open(SessionConfig::default())
    }

    #[test]
    fn test_intern_and_resolve() {
        let session = open();
        let id = session.intern("demo/example/zmesh-pub").unwrap();
        assert_eq!(id.get(), 1);
        assert_eq!(
            session.resolve(id).unwrap().as_str(),
            "demo/example/zmesh-pub"
        );
    }

    #[test]
    fn test_declare_publication_unknown_key() {
        let session = open();
        let foreign = Session::open(SessionConfig::default());
        let _ = foreign.intern("a").unwrap();
        let id = foreign.intern("b").unwrap();
        assert_eq!(
            session.declare_publication(id).unwrap_err(),
            PubSubError::UnknownKeyId { id: 2 }
        );
    }

    #[test]
    fn test_wildcard_publication_rejected() {
        let session = open();
        let id = session.intern("demo/*").unwrap();
        assert!(matches!(
            session.declare_publication(id),
            Err(PubSubError::InvalidKeyExpression { .. })
        ));
    }

    #[test]
    fn test_sequence_numbers_per_publication() {
        let session = open();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session
            .declare_subscription(
                "s/**",
                DeliveryMode::push(move |sample| {
                    sink.lock()
                        .push((sample.key_expr.to_string(), sample.source.sequence));
                    Ok(())
                }),
            )
            .unwrap();

        let a = session.declare_publication(session.intern("s/a").unwrap()).unwrap();
        let b = session.declare_publication(session.intern("s/b").unwrap()).unwrap();
        session.put(a, "1").unwrap();
        session.put(a, "2").unwrap();
        session.put(b, "3").unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                ("s/a".to_string(), 0),
                ("s/a".to_string(), 1),
                ("s/b".to_string(), 0)
            ]
        );
    }

    #[test]
    fn test_publication_options_override_reliability() {
        let session = open();
        let id = session.intern("r").unwrap();
        let publication = session
            .declare_publication_with(
                id,
                PublicationOptions::default().reliability(Reliability::BestEffort),
            )
            .unwrap();
        let entry = session.publication(publication).unwrap();
        assert_eq!(entry.reliability, Reliability::BestEffort);

        let default = session.declare_publication(id).unwrap();
        assert_eq!(
            session.publication(default).unwrap().reliability,
            Reliability::Reliable
        );
        assert_ne!(publication, default);
    }

    #[test]
    fn test_undeclare_twice_is_expired() {
        let session = open();
        let publication = session.declare_publication(session.intern("x").unwrap()).unwrap();
        session.undeclare(publication).unwrap();
        assert_eq!(
            session.undeclare(publication),
            Err(PubSubError::ResourceExpired {
                kind: ResourceKind::Publication
            })
        );
        assert_eq!(
            session.put(publication, "late"),
            Err(PubSubError::ResourceExpired {
                kind: ResourceKind::Publication
            })
        );
    }

    #[test]
    fn test_pull_on_push_subscription() {
        let session = open();
        let sub = session
            .declare_subscription("p", DeliveryMode::push(|_| Ok(())))
            .unwrap();
        assert_eq!(
            session.pull(sub).unwrap_err(),
            PubSubError::NotPullMode {
                subscription: sub.id().get()
            }
        );
    }

    #[test]
    fn test_drop_last_clone_closes_session() {
        let session = open();
        let domain = session.domain().clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        session
            .declare_subscription(
                "d/**",
                DeliveryMode::push(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        let clone = session.clone();
        drop(session);
        assert_eq!(domain.dispatcher().subscriber_count(), 1);
        drop(clone);
        assert_eq!(domain.dispatcher().subscriber_count(), 0);
        assert_eq!(domain.live_sessions(), 0);
    }

    #[test]
    fn test_status_sequence() {
        let session = open();
        let mut status = session.status();
        session.close().unwrap();
        assert_eq!(status.try_recv().unwrap(), SessionStatus::Opened);
        assert_eq!(status.try_recv().unwrap(), SessionStatus::Closed);
    }
}
