use crate::engine::{TimerEngine, TimerError, TimerState};
use crate::models::{ActiveTimer, DEFAULT_DESCRIPTION};
use crate::network::check_online_status;
use chrono::Utc;
use tracing::{error, info, warn};

impl TimerEngine {
    /// Зеркалировать подтверждённое сервером состояние в локальный кеш.
    /// Кеш - recovery hint: ошибка записи не откатывает переход,
    /// сервер уже знает истину и следующий reconcile её восстановит.
    pub(crate) fn mirror_cache(&self, timer: &ActiveTimer) {
        let db = match &self.db {
            Some(db) => db,
            None => return,
        };
        match serde_json::to_string(timer) {
            Ok(payload) => {
                if let Err(e) = db.save_active_timer(&payload) {
                    error!("[CACHE] Failed to mirror timer state: {}", e);
                }
            }
            Err(e) => error!("[CACHE] Failed to serialize timer state: {}", e),
        }
    }

    /// Очистить слот кеша (на stop и при обнаружении staleness)
    pub(crate) fn clear_cache(&self) {
        if let Some(db) = &self.db {
            if let Err(e) = db.clear_active_timer() {
                error!("[CACHE] Failed to clear timer slot: {}", e);
            }
        }
    }

    /// Оптимистичное восстановление из кеша, без сети.
    /// UI сразу видит идущий таймер; авторитетная сверка придёт из reconcile().
    /// GUARD: Никогда не падать на ошибке восстановления
    pub(crate) fn restore_from_cache(&self) {
        let db = match &self.db {
            Some(db) => db,
            None => return,
        };

        match db.load_active_timer() {
            Ok(Some(payload)) => match serde_json::from_str::<ActiveTimer>(&payload) {
                Ok(timer) => {
                    info!(
                        "[RECOVERY] Restored cached timer: entry={} started_at={}",
                        timer.entry_id, timer.started_at
                    );
                    // Пауза восстанавливается как пауза: elapsed не продолжает расти
                    let restored = if timer.paused_at.is_some() {
                        TimerState::Paused { timer }
                    } else {
                        TimerState::Running { timer }
                    };
                    match self.state.lock() {
                        Ok(mut state) => *state = restored,
                        Err(e) => error!("[RECOVERY] Mutex poisoned for state: {}", e),
                    }
                }
                Err(e) => {
                    warn!("[RECOVERY] Corrupted cache payload ({}), clearing slot", e);
                    self.clear_cache();
                }
            },
            Ok(None) => info!("[RECOVERY] No cached timer, starting Idle"),
            Err(e) => {
                error!("[RECOVERY] Failed to read cache: {}. Starting Idle.", e);
            }
        }
    }

    /// Сверка с сервером: выполняется один раз на старте сессии и идемпотентна.
    /// Кеш даёт мгновенный UI, сервер перезаписывает его своей истиной:
    /// это защищает и от clock drift, и от клиента, упавшего сразу после start.
    pub async fn reconcile(&self) -> Result<(), TimerError> {
        // Оптимистично запустить тикер по локальному состоянию (без loading flash)
        let optimistic = {
            let state = self.lock_state()?;
            match &*state {
                TimerState::Running { timer } => Some((timer.started_at, timer.total_paused_ms)),
                _ => None,
            }
        };
        if let Some((started_at, total_paused_ms)) = optimistic {
            self.ticker.start(started_at, total_paused_ms).await;
        }

        match self.remote.list_for_user(&self.user_id).await {
            Ok(remote_entries) => {
                match remote_entries.iter().find(|e| e.end_time.is_none()) {
                    Some(running) => {
                        // Remote wins: память и кеш перезаписываются серверными значениями
                        let paused_at = if running.is_paused {
                            Some(running.paused_at.unwrap_or_else(Utc::now))
                        } else {
                            None
                        };
                        let timer = ActiveTimer {
                            entry_id: running.id.clone(),
                            user_id: running.user_id.clone(),
                            project_id: running.project_id.clone(),
                            task_id: running.task_id.clone(),
                            started_at: running.start_time,
                            description: running
                                .description
                                .clone()
                                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
                            paused_at,
                            total_paused_ms: running.total_paused_time,
                        };
                        info!(
                            "[RECOVERY] Remote running timer confirmed: entry={} started_at={}",
                            timer.entry_id, timer.started_at
                        );
                        {
                            let mut state = self.lock_state()?;
                            *state = if timer.paused_at.is_some() {
                                TimerState::Paused {
                                    timer: timer.clone(),
                                }
                            } else {
                                TimerState::Running {
                                    timer: timer.clone(),
                                }
                            };
                        }
                        self.mirror_cache(&timer);
                        if timer.paused_at.is_some() {
                            self.ticker.stop().await;
                        } else {
                            self.ticker
                                .start(timer.started_at, timer.total_paused_ms)
                                .await;
                        }
                    }
                    None => {
                        let had_local = {
                            let state = self.lock_state()?;
                            !matches!(&*state, TimerState::Idle)
                        };
                        if had_local {
                            // Клиент упал или рассинхронизировался: кеш только hint
                            warn!(
                                "[RECOVERY] Cached timer has no remote counterpart, dropping to Idle"
                            );
                            {
                                let mut state = self.lock_state()?;
                                *state = TimerState::Idle;
                            }
                            self.clear_cache();
                            self.ticker.stop().await;
                        }
                    }
                }
            }
            Err(e) => {
                // Деградация: доверяем кешу и работаем оптимистично до следующей сверки
                if check_online_status(self.remote.api_base_url()).await {
                    warn!(
                        "[RECOVERY] Listing failed while online ({}), keeping optimistic local state",
                        e
                    );
                } else {
                    info!(
                        "[RECOVERY] Offline ({}), keeping optimistic local state until next reconcile",
                        e
                    );
                }
            }
        }

        Ok(())
    }
}
