use crate::auth::AuthManager;
use crate::models::{
    ClosedTimerRecord, EntryPatch, ManualLogRequest, PauseTimerResponse, RemoteTimeEntry,
    ResumeTimerResponse, StartTimerResponse, TimerTarget,
};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Ошибки обращения к timer API (для разбора и логирования)
#[derive(Debug)]
pub enum RemoteError {
    Network(String),
    Http { status: u16, message: String },
    Auth(String),
    Parse(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Network(s) => write!(f, "Network: {}", s),
            RemoteError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
            RemoteError::Auth(s) => write!(f, "Auth: {}", s),
            RemoteError::Parse(s) => write!(f, "Parse: {}", s),
        }
    }
}

/// Конфигурация клиента timer API (api_base_url, таймауты, app_version)
#[derive(Clone)]
pub struct RemoteConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// App version sent in X-App-Version header for debugging version skew
    pub app_version: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://app.taskora.io/api".to_string(),
            http_timeout_secs: 30,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Клиент серверного timer API.
/// Сервер - источник истины по состоянию таймера и сохранённым записям;
/// клиент трактует его как at-least-once RPC-пир, который может тормозить
/// и падать. Записывающие вызовы не ретраятся автоматически.
#[derive(Clone)]
pub struct TimerRemote {
    pub(crate) api_base_url: String,
    pub(crate) auth_manager: Arc<AuthManager>,
    pub(crate) client: reqwest::Client,
    pub(crate) app_version: String,
}

impl TimerRemote {
    pub fn new(config: RemoteConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_base_url: config.api_base_url.clone(),
            auth_manager: Arc::new(AuthManager::new(config.api_base_url)),
            client,
            app_version: config.app_version,
        }
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth_manager
    }

    /// Выполнить запрос с bearer-токеном.
    /// При 401 токен обновляется через refresh и запрос повторяется один раз.
    async fn send_authorized<F>(&self, make: F) -> Result<reqwest::Response, RemoteError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut access_token = self
            .auth_manager
            .get_access_token()
            .await
            .map_err(RemoteError::Auth)?;
        let refresh_token = self
            .auth_manager
            .get_refresh_token()
            .await
            .map_err(RemoteError::Auth)?;

        let mut retry_with_refresh = true;

        loop {
            let request = make(&self.client)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", access_token))
                .header("X-App-Version", &self.app_version);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 401 && retry_with_refresh {
                        if let Some(refresh) = refresh_token.as_ref() {
                            info!("[REMOTE] Token expired (401), refreshing");
                            match self.auth_manager.refresh_token(refresh).await {
                                Ok(token_result) => {
                                    access_token = token_result.access_token.clone();
                                    let new_refresh = token_result
                                        .refresh_token
                                        .or_else(|| refresh_token.clone());
                                    self.auth_manager
                                        .set_tokens(Some(access_token.clone()), new_refresh)
                                        .await;
                                    retry_with_refresh = false; // Только одна попытка обновления
                                    continue;
                                }
                                Err(e) => {
                                    warn!("[REMOTE] Failed to refresh token: {}", e);
                                    return Err(RemoteError::Auth(e));
                                }
                            }
                        }
                        return Err(RemoteError::Auth(
                            "Token expired (401) but no refresh token available".into(),
                        ));
                    }

                    return Ok(response);
                }
                Err(e) => return Err(RemoteError::Network(e.to_string())),
            }
        }
    }

    /// Разобрать успешный JSON-ответ или собрать RemoteError::Http из тела
    async fn into_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                status.canonical_reason().unwrap_or("Unknown").to_string()
            } else {
                body
            };
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))
    }

    /// Запустить таймер. Сервер отклоняет вызов, если у пользователя уже
    /// есть работающий таймер или ссылки невалидны.
    pub async fn start_timer(
        &self,
        target: &TimerTarget,
        description: &str,
    ) -> Result<StartTimerResponse, RemoteError> {
        let url = format!("{}/time-entries", self.api_base_url);
        let body = serde_json::json!({
            "userId": &target.user_id,
            "projectId": &target.project_id,
            "taskId": &target.task_id,
            "description": description,
        });
        let response = self
            .send_authorized(|client| client.post(&url).json(&body))
            .await?;
        Self::into_json(response).await
    }

    pub async fn pause_timer(&self, entry_id: &str) -> Result<PauseTimerResponse, RemoteError> {
        let url = format!("{}/time-entries/{}/pause", self.api_base_url, entry_id);
        let response = self
            .send_authorized(|client| client.put(&url).json(&serde_json::json!({})))
            .await?;
        Self::into_json(response).await
    }

    pub async fn resume_timer(&self, entry_id: &str) -> Result<ResumeTimerResponse, RemoteError> {
        let url = format!("{}/time-entries/{}/resume", self.api_base_url, entry_id);
        let response = self
            .send_authorized(|client| client.put(&url).json(&serde_json::json!({})))
            .await?;
        Self::into_json(response).await
    }

    /// Остановить таймер. Идемпотентен на сервере: повторный stop возвращает
    /// уже закрытую запись. Клиентский idempotency key позволяет серверу
    /// дедуплицировать слепой повтор после потерянного ответа.
    pub async fn stop_timer(
        &self,
        entry_id: &str,
        description: Option<&str>,
    ) -> Result<ClosedTimerRecord, RemoteError> {
        let url = format!("{}/time-entries/{}/stop", self.api_base_url, entry_id);
        let idempotency_key = new_idempotency_key();
        let body = match description {
            Some(d) => serde_json::json!({ "description": d }),
            None => serde_json::json!({}),
        };
        let response = self
            .send_authorized(|client| {
                client
                    .put(&url)
                    .header("X-Idempotency-Key", idempotency_key.as_str())
                    .json(&body)
            })
            .await?;
        Self::into_json(response).await
    }

    /// Ручное логирование завершённого интервала. Сервер отклоняет
    /// endTime <= startTime; клиент валидирует то же самое до вызова.
    pub async fn log_manual(
        &self,
        request: &ManualLogRequest,
    ) -> Result<RemoteTimeEntry, RemoteError> {
        let url = format!("{}/time-entries/manual", self.api_base_url);
        let response = self
            .send_authorized(|client| client.post(&url).json(request))
            .await?;
        Self::into_json(response).await
    }

    /// Листинг записей пользователя. Используется при восстановлении:
    /// запись без endTime - авторитетный работающий таймер.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<RemoteTimeEntry>, RemoteError> {
        let url = format!("{}/users/{}/time-entries", self.api_base_url, user_id);
        let response = self.send_authorized(|client| client.get(&url)).await?;
        Self::into_json(response).await
    }

    /// Правка записи (ручная коррекция из UI, вне машины состояний)
    pub async fn update_entry(
        &self,
        entry_id: &str,
        patch: &EntryPatch,
    ) -> Result<RemoteTimeEntry, RemoteError> {
        let url = format!("{}/time-entries/{}", self.api_base_url, entry_id);
        let response = self
            .send_authorized(|client| client.patch(&url).json(patch))
            .await?;
        Self::into_json(response).await
    }

    /// Удаление записи (вне машины состояний)
    pub async fn delete_entry(&self, entry_id: &str) -> Result<(), RemoteError> {
        let url = format!("{}/time-entries/{}", self.api_base_url, entry_id);
        let response = self.send_authorized(|client| client.delete(&url)).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                status.canonical_reason().unwrap_or("Unknown").to_string()
            } else {
                body
            };
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// Случайный idempotency key: 16 байт, hex
fn new_idempotency_key() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}
