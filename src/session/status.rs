use parking_lot::Mutex;
use tokio::sync::broadcast;
use zmesh_error::PubSubError;

use crate::transport::Endpoint;

/// Событие жизненного цикла сессии.
///
/// Канал статуса best-effort: медленный получатель теряет старые события
/// (`RecvError::Lagged`), отправитель никогда не блокируется.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Opened,
    Connected { endpoint: Endpoint },
    ConnectFailed { endpoint: Endpoint, reason: String },
    /// Сбой на пути доставки: callback, переполнение буфера, удалённая
    /// отправка.
    DeliveryFailed(PubSubError),
    Closed,
}

/// Отправляющая сторона канала статуса.
///
/// Хранит первый приёмник, созданный вместе с каналом: первый вызов
/// [`StatusSender::subscribe`] забирает его и видит события с момента
/// открытия сессии (`Opened`, `ConnectFailed`).
#[derive(Debug)]
pub struct StatusSender {
    tx: broadcast::Sender<SessionStatus>,
    initial: Mutex<Option<broadcast::Receiver<SessionStatus>>>,
}

impl StatusSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            initial: Mutex::new(Some(rx)),
        }
    }

    /// Публикует событие. Отсутствие получателей не ошибка.
    pub fn report(
        &self,
        status: SessionStatus,
    ) {
        let _ = self.tx.send(status);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatus> {
        self.initial
            .lock()
            .take()
            .unwrap_or_else(|| self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    /// Тест проверяет, что события до первого subscribe не теряются.
    #[test]
    fn test_first_subscriber_sees_early_events() {
        let sender = StatusSender::new(4);
        sender.report(SessionStatus::Opened);

        let mut first = sender.subscribe();
        let mut second = sender.subscribe();
        assert_eq!(first.try_recv().unwrap(), SessionStatus::Opened);
        assert_eq!(second.try_recv(), Err(TryRecvError::Empty));

        sender.report(SessionStatus::Closed);
        assert_eq!(first.try_recv().unwrap(), SessionStatus::Closed);
        assert_eq!(second.try_recv().unwrap(), SessionStatus::Closed);
    }

    #[test]
    fn test_report_without_receivers_is_silent() {
        let sender = StatusSender::new(1);
        drop(sender.subscribe());
        sender.report(SessionStatus::Closed);
    }

    #[test]
    fn test_lagging_receiver() {
        let sender = StatusSender::new(2);
        let mut rx = sender.subscribe();
        for _ in 0..3 {
            sender.report(SessionStatus::Opened);
        }
        assert_eq!(rx.try_recv(), Err(TryRecvError::Lagged(1)));
    }
}
