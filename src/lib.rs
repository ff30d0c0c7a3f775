//! Timer reconciliation core для desktop-клиента Taskora.
//!
//! Ядро владеет единственным куском изменяемого состояния ("идёт ли таймер,
//! по какой задаче, с какого момента"), сверяет локальный durable cache с
//! серверной истиной и материализует billable time entries для задач,
//! инвойсов и отчётов.

mod auth;
mod database;
mod engine;
mod entries;
mod models;
mod network;
mod remote;
mod ticker;

pub use crate::auth::AuthManager;
pub use crate::database::Database;
pub use crate::engine::{
    TimerEngine, TimerError, TimerState, TimerStateForAPI, TimerStateResponse,
};
pub use crate::entries::{duration_minutes, materialize_closed, materialize_entry};
pub use crate::models::{
    is_valid_object_id, normalize_description, ActiveTimer, ClosedTimerRecord, EntryPatch,
    ManualLogRequest, PauseTimerResponse, RemoteTimeEntry, ResumeTimerResponse,
    StartTimerResponse, TimeEntry, TimerTarget, TokenRefreshResult, DEFAULT_DESCRIPTION,
};
pub use crate::network::check_online_status;
pub use crate::remote::{RemoteConfig, RemoteError, TimerRemote};
pub use crate::ticker::Ticker;


/// Инициализация логирования: по умолчанию info (если RUST_LOG не задан),
/// чтобы [TIMER]/[RECOVERY] были видны
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
