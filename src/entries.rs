use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::{ActiveTimer, ClosedTimerRecord, RemoteTimeEntry, TimeEntry, DEFAULT_DESCRIPTION};

/// Длительность в минутах: round((end - start - paused) / 60000).
/// Отрицательный результат недостижим при соблюдении предусловий;
/// на всякий случай клампится в 0 и логируется как аномалия.
pub fn duration_minutes(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    total_paused_ms: i64,
) -> i64 {
    let raw_ms = (end - start).num_milliseconds().saturating_sub(total_paused_ms);
    if raw_ms < 0 {
        warn!(
            "[MATERIALIZE] Negative computed duration: {} ms, clamping to 0",
            raw_ms
        );
        return 0;
    }
    (raw_ms + 30_000) / 60_000
}

/// Материализовать закрытый таймер в time entry.
/// Чистая трансформация без I/O: длительность выводится из временных меток,
/// никогда из тикера отображения.
pub fn materialize_closed(timer: &ActiveTimer, record: &ClosedTimerRecord) -> TimeEntry {
    TimeEntry {
        id: record.id.clone(),
        user_id: timer.user_id.clone(),
        project_id: timer.project_id.clone(),
        task_id: timer.task_id.clone(),
        date: record.start_time.date_naive(),
        duration_minutes: duration_minutes(
            record.start_time,
            record.end_time,
            record.total_paused_time,
        ),
        description: record
            .description
            .clone()
            .unwrap_or_else(|| timer.description.clone()),
        created_at: record.end_time,
    }
}

/// Материализовать запись листинга (ручной лог или завершённую серверную запись).
/// totalPausedTime у ручных логов отсутствует и трактуется как 0.
pub fn materialize_entry(remote: &RemoteTimeEntry) -> TimeEntry {
    let end = match remote.end_time {
        Some(end) => end,
        None => {
            warn!(
                "[MATERIALIZE] Entry {} has no endTime, treating as zero-length",
                remote.id
            );
            remote.start_time
        }
    };
    TimeEntry {
        id: remote.id.clone(),
        user_id: remote.user_id.clone(),
        project_id: remote.project_id.clone(),
        task_id: remote.task_id.clone(),
        date: remote.start_time.date_naive(),
        // Сервер мог сохранить правленную длительность; локальный расчёт - fallback
        duration_minutes: remote.duration.unwrap_or_else(|| {
            duration_minutes(remote.start_time, end, remote.total_paused_time)
        }),
        description: remote
            .description
            .clone()
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
        created_at: remote.created_at.unwrap_or(end),
    }
}
