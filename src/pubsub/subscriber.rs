use std::{
    borrow::Cow,
    collections::VecDeque,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use zmesh_error::PubSubError;

use super::Sample;
use crate::{
    keyexpr::{KeyExpr, KeyExprRegistry},
    session::{SessionId, SessionStatus, StatusSender},
};

/// Push-callback подписчика.
///
/// Вызывается синхронно в потоке издателя. `Err` или паника изолируются:
/// доставка другим подписчикам продолжается, сбой уходит в лог и канал
/// статуса сессии подписчика.
pub type Callback = Box<dyn Fn(&Sample) -> anyhow::Result<()> + Send + Sync>;

/// Режим доставки подписки.
pub enum DeliveryMode {
    /// Callback вызывается на каждый совпавший `put`.
    Push(Callback),
    /// Сэмплы копятся в ограниченном буфере (drop-oldest). `None` берёт
    /// ёмкость из конфигурации сессии.
    Pull { capacity: Option<usize> },
}

impl DeliveryMode {
    pub fn push<F>(callback: F) -> Self
    where
        F: Fn(&Sample) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Push(Box::new(callback))
    }

    pub fn pull() -> Self {
        Self::Pull { capacity: None }
    }

    pub fn pull_with_capacity(capacity: usize) -> Self {
        Self::Pull {
            capacity: Some(capacity),
        }
    }
}

impl fmt::Debug for DeliveryMode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Push(_) => f.write_str("Push(..)"),
            Self::Pull { capacity } => f.debug_struct("Pull").field("capacity", capacity).finish(),
        }
    }
}

/// Уникальный в пределах домена идентификатор подписчика.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////
// PullBuffer
////////////////////////////////////////////////////////////////////////////////

/// Ограниченная очередь pull-подписки.
///
/// При переполнении выбрасывается самый старый сэмпл и растёт счётчик
/// `dropped`. `recv` ждёт через [`Notify`]; после `close` ожидающие
/// просыпаются и получают `None`.
#[derive(Debug)]
pub(crate) struct PullBuffer {
    queue: Mutex<VecDeque<Sample>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl PullBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Кладёт сэмпл в очередь. Возвращает общее число выброшенных
    /// сэмплов, если ради этого пришлось выбросить самый старый.
    pub(crate) fn push(
        &self,
        sample: Sample,
    ) -> Option<u64> {
        let overflowed = {
            let mut queue = self.queue.lock();
            let overflowed = queue.len() >= self.capacity;
            if overflowed {
                queue.pop_front();
            }
            queue.push_back(sample);
            overflowed
        };
        self.notify.notify_one();

        overflowed.then(|| self.dropped.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn try_pop(&self) -> Option<Sample> {
        self.queue.lock().pop_front()
    }

    /// Ждёт следующий сэмпл. `None` означает, что буфер закрыт.
    pub(crate) async fn recv(&self) -> Option<Sample> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Регистрируемся до проверки, иначе можно пропустить notify.
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(sample) = self.try_pop() {
                return Some(sample);
            }
            notified.await;
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.queue.lock().clear();
        self.notify.notify_waiters();
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

////////////////////////////////////////////////////////////////////////////////
// SubscriberSlot
////////////////////////////////////////////////////////////////////////////////

enum Sink {
    Push(Callback),
    Pull(Arc<PullBuffer>),
}

/// Результат доставки одного сэмпла одному подписчику.
#[derive(Debug)]
pub(crate) enum Delivery {
    Delivered,
    /// Подписчик уже отписан: сэмпл не доставлен.
    Inactive,
    CallbackFailed(PubSubError),
    /// Сэмпл поставлен в очередь, но ради него выброшен самый старый.
    Overflow(PubSubError),
}

/// Состояние подписки, общее для таблицы сессии и индекса диспетчера.
///
/// `sink` работает как барьер: доставки берут рекурсивную read-блокировку,
/// `close` берёт write-блокировку и убирает sink. После возврата из
/// `close` callback больше не вызывается и уже уничтожен.
pub struct SubscriberSlot {
    id: SubscriberId,
    session: SessionId,
    pattern: KeyExpr,
    registry: Arc<KeyExprRegistry>,
    sink: RwLock<Option<Sink>>,
    buffer: Option<Arc<PullBuffer>>,
    status: Arc<StatusSender>,
    delivered: AtomicU64,
}

impl SubscriberSlot {
    /// `pull_capacity` используется для `DeliveryMode::Pull { capacity: None }`.
    pub(crate) fn new(
        id: SubscriberId,
        session: SessionId,
        pattern: KeyExpr,
        mode: DeliveryMode,
        pull_capacity: usize,
        registry: Arc<KeyExprRegistry>,
        status: Arc<StatusSender>,
    ) -> Self {
        let (sink, buffer) = match mode {
            DeliveryMode::Push(callback) => (Sink::Push(callback), None),
            DeliveryMode::Pull { capacity } => {
                let buffer = Arc::new(PullBuffer::new(capacity.unwrap_or(pull_capacity)));
                (Sink::Pull(Arc::clone(&buffer)), Some(buffer))
            }
        };
        Self {
            id,
            session,
            pattern,
            registry,
            sink: RwLock::new(Some(sink)),
            buffer,
            status,
            delivered: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn pattern(&self) -> &KeyExpr {
        &self.pattern
    }

    pub fn is_pull(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.sink.read_recursive().is_some()
    }

    /// Сколько сэмплов дошло до подписчика.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Сколько сэмплов выброшено из-за переполнения (0 для push).
    pub fn dropped(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |buffer| buffer.dropped())
    }

    /// Сколько сэмплов ждёт в pull-буфере.
    pub fn pending(&self) -> usize {
        self.buffer.as_ref().map_or(0, |buffer| buffer.len())
    }

    pub(crate) fn pull_buffer(&self) -> Result<&Arc<PullBuffer>, PubSubError> {
        self.buffer.as_ref().ok_or(PubSubError::NotPullMode {
            subscription: self.id.get(),
        })
    }

    pub(crate) fn report(
        &self,
        status: SessionStatus,
    ) {
        self.status.report(status);
    }

    /// Доставляет сэмпл подписчику.
    ///
    /// Сэмпл из чужой сессии получает `KeyId` из реестра этой подписки.
    pub(crate) fn deliver(
        &self,
        sample: &Sample,
    ) -> Delivery {
        let gate = self.sink.read_recursive();
        let Some(sink) = gate.as_ref() else {
            return Delivery::Inactive;
        };

        let sample = if sample.source.session == self.session {
            Cow::Borrowed(sample)
        } else {
            Cow::Owned(sample.with_key_id(self.registry.intern_expr(&sample.key_expr)))
        };

        let outcome = match sink {
            Sink::Push(callback) => match catch_unwind(AssertUnwindSafe(|| callback(&*sample))) {
                Ok(Ok(())) => Delivery::Delivered,
                Ok(Err(err)) => {
                    Delivery::CallbackFailed(self.callback_failed(&sample, format!("{err:#}")))
                }
                Err(panic) => {
                    let reason = format!("callback panicked: {}", panic_message(&*panic));
                    Delivery::CallbackFailed(self.callback_failed(&sample, reason))
                }
            },
            Sink::Pull(buffer) => match buffer.push(sample.into_owned()) {
                None => Delivery::Delivered,
                Some(dropped) => Delivery::Overflow(PubSubError::BufferOverflowDropped {
                    subscription: self.id.get(),
                    dropped,
                }),
            },
        };

        if !matches!(outcome, Delivery::CallbackFailed(_)) {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Закрывает подписку. Ждёт завершения текущих доставок.
    ///
    /// Возвращает `false`, если подписка уже была закрыта.
    pub(crate) fn close(&self) -> bool {
        let previous = self.sink.write().take();
        match previous {
            Some(Sink::Pull(buffer)) => {
                buffer.close();
                true
            }
            Some(Sink::Push(callback)) => {
                drop(callback);
                true
            }
            None => false,
        }
    }

    fn callback_failed(
        &self,
        sample: &Sample,
        reason: String,
    ) -> PubSubError {
        PubSubError::DispatchCallbackFailed {
            subscription: self.id.get(),
            key: sample.key_expr.to_string(),
            reason,
        }
    }
}

impl fmt::Debug for SubscriberSlot {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriberSlot")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("pattern", &self.pattern)
            .field("pull", &self.is_pull())
            .field("active", &self.is_active())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use bytes::Bytes;
    use tokio::time::timeout;

    use super::*;
    use crate::pubsub::SourceInfo;

    fn registry_and_sample(
        key: &str,
        payload: &'static str,
    ) -> (Arc<KeyExprRegistry>, Sample) {
        let registry = Arc::new(KeyExprRegistry::new());
        let id = registry.intern(key).unwrap();
        let sample = Sample::new(
            id,
            registry.resolve(id).unwrap(),
            Bytes::from_static(payload.as_bytes()),
            SourceInfo {
                session: SessionId::new(1),
                sequence: 0,
            },
        );
        (registry, sample)
    }

    fn slot(
        session: u64,
        mode: DeliveryMode,
        registry: Arc<KeyExprRegistry>,
    ) -> SubscriberSlot {
        SubscriberSlot::new(
            SubscriberId::new(7),
            SessionId::new(session),
            KeyExpr::new("demo/**").unwrap(),
            mode,
            2,
            registry,
            Arc::new(StatusSender::new(8)),
        )
    }

    /// Тест проверяет drop-oldest и счётчик выброшенных сэмплов.
    #[test]
    fn test_pull_buffer_drop_oldest() {
        let buffer = PullBuffer::new(2);
        let (_, sample) = registry_and_sample("demo/a", "x");
        for (i, expected) in [None, None, Some(1), Some(2)].into_iter().enumerate() {
            let mut s = sample.clone();
            s.source.sequence = i as u64;
            assert_eq!(buffer.push(s), expected);
        }
        assert_eq!(buffer.dropped(), 2);
        assert_eq!(buffer.try_pop().unwrap().source.sequence, 2);
        assert_eq!(buffer.try_pop().unwrap().source.sequence, 3);
        assert!(buffer.try_pop().is_none());
    }

    #[test]
    fn test_zero_capacity_holds_one_sample() {
        let buffer = PullBuffer::new(0);
        let (_, sample) = registry_and_sample("demo/a", "x");
        assert_eq!(buffer.push(sample.clone()), None);
        assert_eq!(buffer.push(sample), Some(1));
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_pull_buffer_recv_wakes_on_push() {
        let buffer = Arc::new(PullBuffer::new(4));
        let (_, sample) = registry_and_sample("demo/a", "x");

        let waiter = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.recv().await })
        };
        tokio::task::yield_now().await;
        buffer.push(sample);

        let got = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(got.unwrap().payload_str(), "x");
    }

    #[tokio::test]
    async fn test_pull_buffer_recv_wakes_on_close() {
        let buffer = Arc::new(PullBuffer::new(4));
        let waiter = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.recv().await })
        };
        tokio::task::yield_now().await;
        buffer.close();

        let got = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("timed out")
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_push_delivery_and_close() {
        let (registry, sample) = registry_and_sample("demo/a", "x");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slot = slot(
            1,
            DeliveryMode::push(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            registry,
        );

        assert!(matches!(slot.deliver(&sample), Delivery::Delivered));
        assert!(slot.close());
        assert!(matches!(slot.deliver(&sample), Delivery::Inactive));
        assert!(!slot.close());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(slot.delivered(), 1);
    }

    /// Тест проверяет изоляцию ошибки и паники callback.
    #[test]
    fn test_callback_error_and_panic_are_isolated() {
        let (registry, sample) = registry_and_sample("demo/a", "x");
        let failing = slot(
            1,
            DeliveryMode::push(|_| anyhow::bail!("boom")),
            Arc::clone(&registry),
        );
        match failing.deliver(&sample) {
            Delivery::CallbackFailed(PubSubError::DispatchCallbackFailed { reason, key, .. }) => {
                assert_eq!(reason, "boom");
                assert_eq!(key, "demo/a");
            }
            other => panic!("unexpected {other:?}"),
        }

        let panicking = slot(1, DeliveryMode::push(|_| panic!("kaboom")), registry);
        match panicking.deliver(&sample) {
            Delivery::CallbackFailed(PubSubError::DispatchCallbackFailed { reason, .. }) => {
                assert!(reason.contains("kaboom"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(panicking.is_active());
    }

    #[test]
    fn test_pull_overflow_reported() {
        let (registry, sample) = registry_and_sample("demo/a", "x");
        let slot = slot(1, DeliveryMode::pull(), registry);
        assert!(slot.is_pull());
        assert!(matches!(slot.deliver(&sample), Delivery::Delivered));
        assert!(matches!(slot.deliver(&sample), Delivery::Delivered));
        assert!(matches!(
            slot.deliver(&sample),
            Delivery::Overflow(PubSubError::BufferOverflowDropped { dropped: 1, .. })
        ));
        assert_eq!(slot.dropped(), 1);
        assert_eq!(slot.pending(), 2);
    }

    /// Тест проверяет переинтернирование ключа для подписчика из другой
    /// сессии.
    #[test]
    fn test_cross_session_key_id_is_reinterned() {
        let (_, sample) = registry_and_sample("demo/a", "x");
        let subscriber_registry = Arc::new(KeyExprRegistry::new());
        let _ = subscriber_registry.intern("other/1").unwrap();
        let _ = subscriber_registry.intern("other/2").unwrap();

        let slot = slot(2, DeliveryMode::pull(), Arc::clone(&subscriber_registry));
        slot.deliver(&sample);

        let got = slot.pull_buffer().unwrap().try_pop().unwrap();
        assert_eq!(got.key_id.get(), 3);
        assert_eq!(subscriber_registry.resolve(got.key_id).unwrap().as_str(), "demo/a");
    }

    #[test]
    fn test_push_slot_is_not_pull() {
        let (registry, _) = registry_and_sample("demo/a", "x");
        let slot = slot(1, DeliveryMode::push(|_| Ok(())), registry);
        assert_eq!(
            slot.pull_buffer().unwrap_err(),
            PubSubError::NotPullMode { subscription: 7 }
        );
    }
}
