use crate::engine::{TimerEngine, TimerError, TimerState, TimerStateForAPI, TimerStateResponse};
use crate::entries::{materialize_closed, materialize_entry};
use crate::models::{
    is_valid_object_id, normalize_description, ActiveTimer, EntryPatch, ManualLogRequest,
    TimeEntry, TimerTarget,
};
use crate::remote::RemoteError;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard};
use tracing::{debug, info, warn};

/// Сброс single-flight флага при выходе из перехода (в том числе при ошибке)
fn release_transition_flag(flag: Arc<AtomicBool>) {
    flag.store(false, Ordering::SeqCst);
}

/// Прошедшее время для отображения. В паузе elapsed заморожен на pausedAt.
/// Никогда не пишется в сохраняемую длительность.
fn display_elapsed_seconds(timer: &ActiveTimer, now: DateTime<Utc>) -> u64 {
    let reference = timer.paused_at.unwrap_or(now);
    let elapsed_ms = (reference - timer.started_at)
        .num_milliseconds()
        .saturating_sub(timer.total_paused_ms);
    (elapsed_ms.max(0) / 1000) as u64
}

/// Сервер сообщает, что таймер уже остановлен: потерянный ответ прошлого
/// stop или гонка с другим устройством. Желаемое состояние уже достигнуто.
fn stop_already_achieved(err: &RemoteError) -> bool {
    matches!(
        err,
        RemoteError::Http { status: 400, message } if message.contains("already stopped")
    )
}

impl TimerEngine {
    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, TimerState>, TimerError> {
        self.state
            .lock()
            .map_err(|e| TimerError::Internal(format!("Mutex poisoned: {}", e)))
    }

    pub(crate) fn lock_entries(&self) -> Result<MutexGuard<'_, Vec<TimeEntry>>, TimerError> {
        self.entries
            .lock()
            .map_err(|e| TimerError::Internal(format!("Mutex poisoned: {}", e)))
    }

    /// Single-flight: второй конкурентный переход отклоняется до сетевого
    /// вызова. Lock состояния никогда не держится через await.
    fn acquire_transition_guard(
        &self,
    ) -> Result<scopeguard::ScopeGuard<Arc<AtomicBool>, fn(Arc<AtomicBool>)>, TimerError> {
        if self
            .transition_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("[FSM] Transition rejected: another timer operation is in flight");
            return Err(TimerError::Busy(
                "Another timer operation is in flight".into(),
            ));
        }
        Ok(scopeguard::guard(
            self.transition_in_flight.clone(),
            release_transition_flag as fn(Arc<AtomicBool>),
        ))
    }

    fn validate_reference(kind: &str, id: &str) -> Result<(), TimerError> {
        if !is_valid_object_id(id) {
            return Err(TimerError::InvalidId(format!(
                "Invalid {} reference: {:?}",
                kind, id
            )));
        }
        Ok(())
    }

    /// Переход: Idle → Running.
    /// Предусловия (цель задана, таймер не работает) проверяются до сетевого
    /// вызова; память и кеш обновляются только после подтверждения сервером.
    pub async fn start(
        &self,
        project_id: &str,
        task_id: &str,
        description: Option<&str>,
    ) -> Result<TimerStateResponse, TimerError> {
        Self::validate_reference("user", &self.user_id)?;
        Self::validate_reference("project", project_id)?;
        Self::validate_reference("task", task_id)?;

        let _guard = self.acquire_transition_guard()?;

        {
            let state = self.lock_state()?;
            match &*state {
                TimerState::Idle => {}
                TimerState::Running { .. } | TimerState::Paused { .. } => {
                    // Недопустимый переход: у пользователя уже есть активный таймер
                    warn!("[FSM] Invalid transition: start while a timer is active");
                    return Err(TimerError::Precondition("Timer is already running".into()));
                }
            }
        }

        let description = normalize_description(description);
        let target = TimerTarget {
            user_id: self.user_id.clone(),
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
        };

        let response = self
            .remote
            .start_timer(&target, &description)
            .await
            .map_err(TimerError::Remote)?;

        // Commit: серверный startTime авторитетен (защита от clock drift)
        let timer = ActiveTimer {
            entry_id: response.id,
            user_id: target.user_id,
            project_id: target.project_id,
            task_id: target.task_id,
            started_at: response.start_time,
            description,
            paused_at: None,
            total_paused_ms: 0,
        };
        {
            let mut state = self.lock_state()?;
            *state = TimerState::Running {
                timer: timer.clone(),
            };
        }
        self.mirror_cache(&timer);
        self.ticker.start(timer.started_at, 0).await;

        info!(
            "[TIMER] Started: entry={} task={} project={}",
            timer.entry_id, timer.task_id, timer.project_id
        );
        self.get_state()
    }

    /// Переход: Running → Paused
    pub async fn pause(&self) -> Result<TimerStateResponse, TimerError> {
        let _guard = self.acquire_transition_guard()?;

        let timer = {
            let state = self.lock_state()?;
            match &*state {
                TimerState::Running { timer } => timer.clone(),
                TimerState::Paused { .. } => {
                    warn!("[FSM] Invalid transition: Paused → Paused (already paused)");
                    return Err(TimerError::Precondition("Timer is already paused".into()));
                }
                TimerState::Idle => {
                    warn!("[FSM] Invalid transition: Idle → Paused (no active timer)");
                    return Err(TimerError::Precondition(
                        "Cannot pause: no active timer".into(),
                    ));
                }
            }
        };

        let response = self
            .remote
            .pause_timer(&timer.entry_id)
            .await
            .map_err(TimerError::Remote)?;

        // Серверный pausedAt авторитетен; локальные часы только fallback
        let mut paused = timer;
        paused.paused_at = Some(response.paused_at.unwrap_or_else(Utc::now));
        {
            let mut state = self.lock_state()?;
            *state = TimerState::Paused {
                timer: paused.clone(),
            };
        }
        self.mirror_cache(&paused);
        self.ticker.stop().await;

        info!("[TIMER] Paused: entry={}", paused.entry_id);
        self.get_state()
    }

    /// Переход: Paused → Running
    pub async fn resume(&self) -> Result<TimerStateResponse, TimerError> {
        let _guard = self.acquire_transition_guard()?;

        let timer = {
            let state = self.lock_state()?;
            match &*state {
                TimerState::Paused { timer } => timer.clone(),
                TimerState::Running { .. } => {
                    warn!("[FSM] Invalid transition: Running → Running (already running)");
                    return Err(TimerError::Precondition("Timer is already running".into()));
                }
                TimerState::Idle => {
                    warn!("[FSM] Invalid transition: Idle → Running (use start instead)");
                    return Err(TimerError::Precondition(
                        "Cannot resume: no active timer. Use start instead".into(),
                    ));
                }
            }
        };

        let response = self
            .remote
            .resume_timer(&timer.entry_id)
            .await
            .map_err(TimerError::Remote)?;

        let mut resumed = timer;
        // Серверный totalPausedTime авторитетен; иначе накапливаем локально
        resumed.total_paused_ms = match response.total_paused_time {
            Some(total) => total,
            None => {
                let paused_at = resumed.paused_at.unwrap_or_else(Utc::now);
                let pause_ms = (Utc::now() - paused_at).num_milliseconds().max(0);
                resumed.total_paused_ms.saturating_add(pause_ms)
            }
        };
        resumed.paused_at = None;
        {
            let mut state = self.lock_state()?;
            *state = TimerState::Running {
                timer: resumed.clone(),
            };
        }
        self.mirror_cache(&resumed);
        self.ticker
            .start(resumed.started_at, resumed.total_paused_ms)
            .await;

        info!(
            "[TIMER] Resumed: entry={} total_paused_ms={}",
            resumed.entry_id, resumed.total_paused_ms
        );
        self.get_state()
    }

    /// Переход: Running/Paused → Idle. Возвращает материализованную запись.
    /// Повторный stop без активного таймера - no-op: Ok(None), без сетевого
    /// вызова, без второй записи.
    pub async fn stop(&self, description: Option<&str>) -> Result<Option<TimeEntry>, TimerError> {
        let _guard = self.acquire_transition_guard()?;

        let timer = {
            let state = self.lock_state()?;
            match &*state {
                TimerState::Running { timer } | TimerState::Paused { timer } => timer.clone(),
                TimerState::Idle => {
                    debug!("[FSM] Stop with no active timer is a no-op");
                    return Ok(None);
                }
            }
        };

        match self.remote.stop_timer(&timer.entry_id, description).await {
            Ok(record) => {
                let entry = materialize_closed(&timer, &record);
                {
                    let mut state = self.lock_state()?;
                    *state = TimerState::Idle;
                }
                self.clear_cache();
                self.ticker.stop().await;
                {
                    // Новая запись в начало списка
                    let mut entries = self.lock_entries()?;
                    entries.insert(0, entry.clone());
                }
                info!(
                    "[TIMER] Stopped: entry={} duration={}m",
                    entry.id, entry.duration_minutes
                );
                Ok(Some(entry))
            }
            Err(e) if stop_already_achieved(&e) => {
                // Сервер уже закрыл таймер: сходимся к Idle, серверная истина
                info!("[TIMER] Stop already achieved on server, converging to Idle");
                {
                    let mut state = self.lock_state()?;
                    *state = TimerState::Idle;
                }
                self.clear_cache();
                self.ticker.stop().await;
                Ok(None)
            }
            Err(e) => Err(TimerError::Remote(e)),
        }
    }

    /// Ручное логирование завершённого интервала. Не трогает FSM живого
    /// таймера; валидация выполняется до сетевого вызова.
    pub async fn log_manual(
        &self,
        project_id: &str,
        task_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        description: Option<&str>,
    ) -> Result<TimeEntry, TimerError> {
        Self::validate_reference("user", &self.user_id)?;
        Self::validate_reference("project", project_id)?;
        Self::validate_reference("task", task_id)?;
        if end_time <= start_time {
            return Err(TimerError::Precondition(
                "endTime must be after startTime".into(),
            ));
        }

        let request = ManualLogRequest {
            user_id: self.user_id.clone(),
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
            start_time,
            end_time,
            description: description.map(|d| d.to_string()),
        };
        let remote_entry = self
            .remote
            .log_manual(&request)
            .await
            .map_err(TimerError::Remote)?;

        let entry = materialize_entry(&remote_entry);
        {
            let mut entries = self.lock_entries()?;
            entries.insert(0, entry.clone());
        }
        info!(
            "[TIMER] Manual entry logged: entry={} duration={}m",
            entry.id, entry.duration_minutes
        );
        Ok(entry)
    }

    /// Обновить список записей с сервера (завершённые записи, новые в начале)
    pub async fn refresh_entries(&self) -> Result<Vec<TimeEntry>, TimerError> {
        let remote_entries = self
            .remote
            .list_for_user(&self.user_id)
            .await
            .map_err(TimerError::Remote)?;

        let mut materialized: Vec<TimeEntry> = remote_entries
            .iter()
            .filter(|e| e.end_time.is_some())
            .map(materialize_entry)
            .collect();
        materialized.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        {
            let mut entries = self.lock_entries()?;
            *entries = materialized.clone();
        }
        Ok(materialized)
    }

    /// Правка записи (ручная коррекция, вне машины состояний)
    pub async fn update_entry(
        &self,
        entry_id: &str,
        patch: &EntryPatch,
    ) -> Result<TimeEntry, TimerError> {
        Self::validate_reference("entry", entry_id)?;
        let remote_entry = self
            .remote
            .update_entry(entry_id, patch)
            .await
            .map_err(TimerError::Remote)?;

        let entry = materialize_entry(&remote_entry);
        {
            let mut entries = self.lock_entries()?;
            match entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => entries.insert(0, entry.clone()),
            }
        }
        Ok(entry)
    }

    /// Удаление записи (вне машины состояний)
    pub async fn delete_entry(&self, entry_id: &str) -> Result<(), TimerError> {
        Self::validate_reference("entry", entry_id)?;
        self.remote
            .delete_entry(entry_id)
            .await
            .map_err(TimerError::Remote)?;
        {
            let mut entries = self.lock_entries()?;
            entries.retain(|e| e.id != entry_id);
        }
        Ok(())
    }

    /// Снимок списка записей в памяти
    pub fn entries(&self) -> Result<Vec<TimeEntry>, TimerError> {
        Ok(self.lock_entries()?.clone())
    }

    /// Текущее состояние плюс elapsed для отображения
    pub fn get_state(&self) -> Result<TimerStateResponse, TimerError> {
        let state = self.lock_state()?;
        let now = Utc::now();
        let (state_for_api, elapsed_seconds) = match &*state {
            TimerState::Idle => (TimerStateForAPI::Idle, 0),
            TimerState::Running { timer } => (
                TimerStateForAPI::Running {
                    timer: timer.clone(),
                },
                display_elapsed_seconds(timer, now),
            ),
            TimerState::Paused { timer } => (
                TimerStateForAPI::Paused {
                    timer: timer.clone(),
                },
                display_elapsed_seconds(timer, now),
            ),
        };
        Ok(TimerStateResponse {
            state: state_for_api,
            elapsed_seconds,
        })
    }
}
