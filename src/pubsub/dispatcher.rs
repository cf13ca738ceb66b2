use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use tracing::trace;
use zmesh_error::{ErrorExt, PubSubError};

use super::{subscriber::Delivery, Reliability, Sample, SubscriberId, SubscriberSlot};
use crate::{
    keyexpr::{matches, KeyExpr},
    log_at,
    session::SessionStatus,
    transport::Transport,
};

/// Верхняя граница кэша маршрутов; при переполнении кэш сбрасывается.
pub const MAX_CACHED_ROUTES: usize = 4096;

type Route = Arc<[Arc<SubscriberSlot>]>;

#[derive(Debug, Default)]
struct SubscriptionIndex {
    by_pattern: HashMap<KeyExpr, Vec<Arc<SubscriberSlot>>>,
    /// Опубликованный ключ → подписчики, отсортированные по id.
    /// Сбрасывается при каждом declare/undeclare.
    routes: HashMap<KeyExpr, Route>,
}

impl SubscriptionIndex {
    fn compute_route(
        &self,
        key: &KeyExpr,
    ) -> Route {
        let mut matched: Vec<Arc<SubscriberSlot>> = self
            .by_pattern
            .iter()
            .filter(|(pattern, _)| matches(key.as_str(), pattern.as_str()))
            .flat_map(|(_, slots)| slots.iter().cloned())
            .collect();
        matched.sort_by_key(|slot| slot.id());
        matched.into()
    }
}

#[derive(Debug, Default)]
struct Counters {
    puts: AtomicU64,
    deliveries: AtomicU64,
    unmatched_puts: AtomicU64,
    callback_failures: AtomicU64,
    dropped_samples: AtomicU64,
    remote_sends: AtomicU64,
    remote_failures: AtomicU64,
}

/// Снимок счётчиков диспетчера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub puts: u64,
    /// Успешные локальные доставки (по одной на подписчика).
    pub deliveries: u64,
    /// `put` без единого локального подписчика.
    pub unmatched_puts: u64,
    pub callback_failures: u64,
    pub dropped_samples: u64,
    pub remote_sends: u64,
    pub remote_failures: u64,
}

/// Итог одного `dispatch`.
#[derive(Debug)]
pub struct DispatchReport {
    pub delivered: usize,
    pub remote_error: Option<PubSubError>,
}

/// Маршрутизатор сэмплов домена.
///
/// Доставляет сэмпл каждой живой подписке, чей шаблон покрывает ключ,
/// во всех сессиях домена, затем отдаёт его транспорту для удалённых
/// узлов. Индекс под `RwLock` не удерживается во время доставки.
pub struct Dispatcher {
    index: RwLock<SubscriptionIndex>,
    publishers: DashMap<KeyExpr, usize>,
    transport: Arc<dyn Transport>,
    next_subscriber: AtomicU64,
    counters: Counters,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            index: RwLock::new(SubscriptionIndex::default()),
            publishers: DashMap::new(),
            transport,
            next_subscriber: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn next_subscriber_id(&self) -> SubscriberId {
        SubscriberId::new(self.next_subscriber.fetch_add(1, Ordering::Relaxed))
    }

    /// Доставляет сэмпл всем совпавшим подписчикам.
    ///
    /// Сбои отдельных подписчиков изолируются: логируются, считаются и
    /// публикуются в канал статуса сессии подписчика. Ошибка удалённой
    /// отправки возвращается в отчёте, а не как `Err`.
    pub fn dispatch(
        &self,
        sample: &Sample,
        reliability: Reliability,
    ) -> DispatchReport {
        self.counters.puts.fetch_add(1, Ordering::Relaxed);

        let route = self.route(&sample.key_expr);
        if route.is_empty() {
            self.counters.unmatched_puts.fetch_add(1, Ordering::Relaxed);
        }

        let mut delivered = 0;
        for slot in route.iter() {
            match slot.deliver(sample) {
                Delivery::Delivered => delivered += 1,
                Delivery::Inactive => {}
                Delivery::CallbackFailed(err) => {
                    self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
                    log_at!(
                        err.status_code().log_level(),
                        subscription = %slot.id(),
                        session = %slot.session(),
                        key = %sample.key_expr,
                        error = %err,
                        "subscriber callback failed"
                    );
                    slot.report(SessionStatus::DeliveryFailed(err));
                }
                Delivery::Overflow(err) => {
                    delivered += 1;
                    self.counters.dropped_samples.fetch_add(1, Ordering::Relaxed);
                    log_at!(
                        err.status_code().log_level(),
                        subscription = %slot.id(),
                        key = %sample.key_expr,
                        "pull buffer overflow, oldest sample dropped"
                    );
                    slot.report(SessionStatus::DeliveryFailed(err));
                }
            }
        }
        self.counters
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);

        trace!(
            key = %sample.key_expr,
            sequence = sample.source.sequence,
            delivered,
            "sample dispatched"
        );

        DispatchReport {
            delivered,
            remote_error: self.send_remote(sample, reliability),
        }
    }

    fn send_remote(
        &self,
        sample: &Sample,
        reliability: Reliability,
    ) -> Option<PubSubError> {
        let remotes = self.transport.matching_remotes(&sample.key_expr);
        if remotes.is_empty() {
            return None;
        }

        self.counters.remote_sends.fetch_add(1, Ordering::Relaxed);
        let err = self
            .transport
            .send_remote(sample, reliability, &remotes)
            .err()?;

        self.counters.remote_failures.fetch_add(1, Ordering::Relaxed);
        let err = PubSubError::RemoteSendFailed {
            key: sample.key_expr.to_string(),
            reason: format!("{err:#}"),
        };
        log_at!(
            err.status_code().log_level(),
            key = %sample.key_expr,
            remotes = remotes.len(),
            error = %err,
            "remote send failed"
        );
        Some(err)
    }

    fn route(
        &self,
        key: &KeyExpr,
    ) -> Route {
        if let Some(route) = self.index.read().routes.get(key) {
            return Arc::clone(route);
        }

        let mut index = self.index.write();
        if let Some(route) = index.routes.get(key) {
            return Arc::clone(route);
        }
        let route = index.compute_route(key);
        if index.routes.len() >= MAX_CACHED_ROUTES {
            index.routes.clear();
        }
        index.routes.insert(key.clone(), Arc::clone(&route));
        route
    }

    pub(crate) fn register_subscriber(
        &self,
        slot: Arc<SubscriberSlot>,
    ) {
        let mut index = self.index.write();
        index
            .by_pattern
            .entry(slot.pattern().clone())
            .or_default()
            .push(slot);
        index.routes.clear();
    }

    /// Убирает подписчика из индекса и закрывает его.
    ///
    /// После возврата ни одна доставка до подписчика не дойдёт: текущие
    /// доставки дожидаются в `SubscriberSlot::close`.
    pub(crate) fn unregister_subscriber(
        &self,
        slot: &SubscriberSlot,
    ) -> bool {
        let removed = {
            let mut index = self.index.write();
            let mut removed = false;
            if let Some(slots) = index.by_pattern.get_mut(slot.pattern()) {
                let before = slots.len();
                slots.retain(|s| s.id() != slot.id());
                removed = slots.len() != before;
                if slots.is_empty() {
                    index.by_pattern.remove(slot.pattern());
                }
            }
            index.routes.clear();
            removed
        };
        slot.close();
        removed
    }

    pub(crate) fn register_publisher(
        &self,
        key: &KeyExpr,
    ) {
        *self.publishers.entry(key.clone()).or_insert(0) += 1;
    }

    pub(crate) fn unregister_publisher(
        &self,
        key: &KeyExpr,
    ) {
        if let Entry::Occupied(mut entry) = self.publishers.entry(key.clone()) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }

    /// Количество объявленных публикаций на ключ во всём домене.
    pub fn publisher_count(
        &self,
        key: &KeyExpr,
    ) -> usize {
        self.publishers.get(key).map_or(0, |count| *count)
    }

    /// Количество живых подписок, которые получат `put` на `key`.
    pub fn matching_subscribers(
        &self,
        key: &KeyExpr,
    ) -> usize {
        self.route(key).iter().filter(|slot| slot.is_active()).count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.index.read().by_pattern.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            puts: c.puts.load(Ordering::Relaxed),
            deliveries: c.deliveries.load(Ordering::Relaxed),
            unmatched_puts: c.unmatched_puts.load(Ordering::Relaxed),
            callback_failures: c.callback_failures.load(Ordering::Relaxed),
            dropped_samples: c.dropped_samples.load(Ordering::Relaxed),
            remote_sends: c.remote_sends.load(Ordering::Relaxed),
            remote_failures: c.remote_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscribers", &self.subscriber_count())
            .field("publishers", &self.publishers.len())
            .field("stats", &self.stats())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
