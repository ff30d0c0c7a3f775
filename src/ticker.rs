use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Тикер прошедшего времени: раз в секунду пересчитывает elapsed от
/// фиксированного startTime и публикует его в watch-канал для UI.
/// Display only: никогда не является источником сохраняемой длительности.
pub struct Ticker {
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    tx: watch::Sender<u64>,
    // Держим один receiver, чтобы send не падал без подписчиков UI
    _rx: watch::Receiver<u64>,
}

impl Ticker {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(0u64);
        Self {
            handle: tokio::sync::Mutex::new(None),
            tx,
            _rx: rx,
        }
    }

    /// Подписка UI на секунды прошедшего времени
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Запустить тикер. Не более одного живого тикера: предыдущий
    /// всегда отменяется перед заменой.
    pub async fn start(&self, started_at: DateTime<Utc>, total_paused_ms: i64) {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
            // Дожидаемся фактического завершения: тик старого тикера не должен
            // попасть в канал после тиков нового
            let _ = handle.await;
            debug!("[TICKER] Previous ticker cancelled before replace");
        }

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            // Первый тик срабатывает сразу, далее раз в секунду;
            // пропущенные тики при лагах не накапливаются
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let elapsed_ms =
                    (Utc::now() - started_at).num_milliseconds().saturating_sub(total_paused_ms);
                let elapsed_secs = (elapsed_ms.max(0) / 1000) as u64;
                if tx.send(elapsed_secs).is_err() {
                    break;
                }
            }
        });

        *guard = Some(handle);
    }

    /// Остановить тикер и обнулить отображение.
    /// Отмена до смены состояния: устаревший тик не должен перезаписать
    /// только что очищенный display.
    pub async fn stop(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
            let _ = handle.await;
            debug!("[TICKER] Display ticker cancelled");
        }
        let _ = self.tx.send(0);
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}
