use chrono::Utc;
use rusqlite::Error::InvalidParameterName;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Error propagation is unchanged, caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!("[DB] {}: Disk full. Free space on drive.", context);
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check the cache directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// Локальный durable cache таймера: единственный слот активной записи.
/// Отсутствие строки в слоте означает Idle. Кеш - recovery hint,
/// авторитетом всегда остаётся сервер.
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Безопасная блокировка соединения с обработкой poisoned mutex
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, rusqlite::Error> {
        self.conn.lock().map_err(|e| {
            InvalidParameterName(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock.",
                e
            ))
        })
    }

    pub fn new(db_path: &str) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        // GUARD: Integrity check on startup, detect corruption before init
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| InvalidParameterName(format!("Integrity check failed: {}", e)))?;
        if integrity.to_lowercase() != "ok" {
            return Err(InvalidParameterName(format!(
                "Database corruption detected: {}",
                integrity
            )));
        }

        // WAL для защиты от corruption при внезапном завершении процесса
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| {
                warn!(
                    "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                    e
                );
            })
            .ok();
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 1;

    /// Versioned migrations using SQLite user_version pragma.
    fn run_migrations(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            // Один глобальный слот: CHECK(slot = 0) физически запрещает вторую строку
            conn.execute(
                "CREATE TABLE IF NOT EXISTS active_timer (
                    slot INTEGER PRIMARY KEY CHECK (slot = 0),
                    payload TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
                [],
            )?;
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    /// Записать слот активного таймера (вызывается только после подтверждения сервером).
    /// GUARD: Транзакция для атомарности (защита от partial writes)
    pub fn save_active_timer(&self, payload: &str) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let now = Utc::now().timestamp();

        conn.execute("BEGIN IMMEDIATE TRANSACTION", []).map_err(|e| {
            log_io_error_if_any("save_active_timer begin", &e);
            error!("[DB] Failed to begin transaction: {}", e);
            e
        })?;

        let result = conn.execute(
            "INSERT INTO active_timer (slot, payload, updated_at) VALUES (0, ?1, ?2)
             ON CONFLICT(slot) DO UPDATE SET payload = ?1, updated_at = ?2",
            params![payload, now],
        );

        match result {
            Ok(_) => conn.execute("COMMIT", []).map(|_| ()).map_err(|e| {
                log_io_error_if_any("save_active_timer commit", &e);
                error!("[DB] Failed to commit transaction: {}", e);
                let _ = conn.execute("ROLLBACK", []);
                e
            }),
            Err(e) => {
                log_io_error_if_any("save_active_timer", &e);
                error!("[DB] Failed to save timer slot: {}. Rolling back.", e);
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Прочитать слот активного таймера
    pub fn load_active_timer(&self) -> SqliteResult<Option<String>> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare("SELECT payload FROM active_timer WHERE slot = 0")?;
        let mut rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Очистить слот (на stop и при обнаружении staleness кеша)
    pub fn clear_active_timer(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM active_timer WHERE slot = 0", [])
            .map(|_| ())
            .map_err(|e| {
                log_io_error_if_any("clear_active_timer", &e);
                e
            })
    }
}
