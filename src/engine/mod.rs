use crate::database::Database;
use crate::models::{ActiveTimer, TimeEntry};
use crate::remote::{RemoteError, TimerRemote};
use crate::ticker::Ticker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

mod core;
mod db;

/// Timer Reconciliation Core - строгая FSM.
/// Единственный владелец состояния активного таймера пользователя:
/// проверяет предусловия, зовёт сервер и только после подтверждения
/// обновляет память и локальный кеш.
pub struct TimerEngine {
    /// Состояние FSM - единственный источник истины в памяти
    pub(crate) state: Arc<Mutex<TimerState>>,
    /// Single-flight: не более одного перехода в полёте для пользователя
    pub(crate) transition_in_flight: Arc<AtomicBool>,
    /// Список time entries в памяти (новые в начале)
    pub(crate) entries: Arc<Mutex<Vec<TimeEntry>>>,
    /// Клиент серверного timer API - источник истины
    pub(crate) remote: TimerRemote,
    /// Локальный durable cache (recovery hint, не авторитет)
    pub(crate) db: Option<Arc<Database>>,
    /// Пользователь сессии: по одному движку на авторизованного пользователя
    pub(crate) user_id: String,
    /// Тикер прошедшего времени (display only)
    pub(crate) ticker: Ticker,
}

/// Состояние таймера - строгая FSM.
/// Невозможные состояния физически невозможны.
#[derive(Debug, Clone)]
pub enum TimerState {
    /// Нет активного таймера
    Idle,
    /// Таймер работает
    Running { timer: ActiveTimer },
    /// Таймер на паузе (pausedAt хранится внутри timer)
    Paused { timer: ActiveTimer },
}

/// Ответ для UI - состояние плюс elapsed для отображения
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerStateResponse {
    #[serde(flatten)]
    pub state: TimerStateForAPI,
    /// Прошедшее время для отображения (display only)
    pub elapsed_seconds: u64,
}

/// Упрощенная версия TimerState для API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "state")]
pub enum TimerStateForAPI {
    Idle,
    Running { timer: ActiveTimer },
    Paused { timer: ActiveTimer },
}

/// Ошибки таймерного ядра (классифицированы для отображения пользователю)
#[derive(Debug)]
pub enum TimerError {
    /// Нарушение предусловия: отклонено локально, без сетевого вызова
    Precondition(String),
    /// Некорректный ссылочный идентификатор
    InvalidId(String),
    /// Другой переход уже в полёте
    Busy(String),
    /// Ошибка обращения к серверу; состояние не изменено
    Remote(RemoteError),
    /// Внутренняя ошибка (poisoned mutex и подобное)
    Internal(String),
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::Precondition(s) => write!(f, "Precondition: {}", s),
            TimerError::InvalidId(s) => write!(f, "Invalid id: {}", s),
            TimerError::Busy(s) => write!(f, "Busy: {}", s),
            TimerError::Remote(e) => write!(f, "Remote: {}", e),
            TimerError::Internal(s) => write!(f, "Internal: {}", s),
        }
    }
}

impl TimerEngine {
    /// Создать движок без локального кеша (для тестов или fallback)
    pub fn new(user_id: impl Into<String>, remote: TimerRemote) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState::Idle)),
            transition_in_flight: Arc::new(AtomicBool::new(false)),
            entries: Arc::new(Mutex::new(Vec::new())),
            remote,
            db: None,
            user_id: user_id.into(),
            ticker: Ticker::new(),
        }
    }

    /// Создать движок с durable cache и оптимистично восстановить состояние
    /// из слота. Сетевая сверка выполняется отдельно через reconcile().
    pub fn with_db(user_id: impl Into<String>, remote: TimerRemote, db: Arc<Database>) -> Self {
        let engine = Self {
            state: Arc::new(Mutex::new(TimerState::Idle)),
            transition_in_flight: Arc::new(AtomicBool::new(false)),
            entries: Arc::new(Mutex::new(Vec::new())),
            remote,
            db: Some(db),
            user_id: user_id.into(),
            ticker: Ticker::new(),
        };
        engine.restore_from_cache();
        engine
    }

    pub fn remote(&self) -> &TimerRemote {
        &self.remote
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Подписка UI на секунды прошедшего времени
    pub fn elapsed_watch(&self) -> tokio::sync::watch::Receiver<u64> {
        self.ticker.subscribe()
    }
}
