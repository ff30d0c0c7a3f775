use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Описание по умолчанию, если пользователь оставил поле пустым
pub const DEFAULT_DESCRIPTION: &str = "Timer session";

/// Билинговая цель таймера: пользователь + проект + задача.
/// Таймер всегда принадлежит ровно одной задаче одного проекта.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTarget {
    pub user_id: String,
    pub project_id: String,
    pub task_id: String,
}

/// Активный таймер (не более одного на пользователя).
/// Живёт в памяти и зеркалируется в локальный кеш после подтверждения сервером.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimer {
    /// Идентификатор time entry на сервере (возвращается start)
    pub entry_id: String,
    pub user_id: String,
    pub project_id: String,
    pub task_id: String,
    /// Авторитетное значение приходит от сервера, не от локальных часов
    pub started_at: DateTime<Utc>,
    pub description: String,
    /// Момент постановки на паузу (None = таймер не на паузе)
    pub paused_at: Option<DateTime<Utc>>,
    /// Накопленные миллисекунды пауз за один запуск
    pub total_paused_ms: i64,
}

/// Завершённая запись времени с фиксированной длительностью.
/// Хранится на сервере; ядро только создаёт/читает/правит её через API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub task_id: String,
    /// Календарный день начала (UTC)
    pub date: NaiveDate,
    /// Длительность в минутах, всегда >= 0
    pub duration_minutes: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Ответ API на запуск таймера
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTimerResponse {
    pub id: String,
    pub start_time: DateTime<Utc>,
}

/// Ответ API на паузу (pausedAt сервера авторитетен)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseTimerResponse {
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
}

/// Ответ API на возобновление (totalPausedTime сервера авторитетен)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeTimerResponse {
    #[serde(default)]
    pub total_paused_time: Option<i64>,
}

/// Закрытая запись, возвращаемая stop
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTimerRecord {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub total_paused_time: i64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Запись листинга time entries пользователя.
/// У авторитетного работающего таймера endTime отсутствует.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTimeEntry {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_paused_time: i64,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Запрос ручного логирования завершённого интервала (без живого таймера)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualLogRequest {
    pub user_id: String,
    pub project_id: String,
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Частичное обновление записи (ручные правки из UI)
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Результат обновления токена
#[derive(Debug)]
pub struct TokenRefreshResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Валидация ссылочного идентификатора: 24 hex-символа (12 байт).
/// Некорректный идентификатор отклоняется до любого сетевого вызова.
pub fn is_valid_object_id(id: &str) -> bool {
    id.len() == 24 && hex::decode(id).map(|bytes| bytes.len() == 12).unwrap_or(false)
}

/// Пустое или пробельное описание заменяется плейсхолдером
pub fn normalize_description(description: Option<&str>) -> String {
    match description.map(str::trim) {
        Some(d) if !d.is_empty() => d.to_string(),
        _ => DEFAULT_DESCRIPTION.to_string(),
    }
}
