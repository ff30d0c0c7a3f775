use crate::models::TokenRefreshResult;
use std::sync::Arc;

/// Менеджер аутентификации: хранит пару токенов сессии.
/// Токены живут только в памяти процесса и задаются оболочкой приложения
/// после логина пользователя.
pub struct AuthManager {
    api_base_url: String,
    pub access_token: Arc<tokio::sync::RwLock<Option<String>>>,
    pub refresh_token: Arc<tokio::sync::RwLock<Option<String>>>,
}

impl AuthManager {
    pub fn new(api_base_url: String) -> Self {
        Self {
            api_base_url,
            access_token: Arc::new(tokio::sync::RwLock::new(None)),
            refresh_token: Arc::new(tokio::sync::RwLock::new(None)),
        }
    }

    /// Установить токены (вызывается оболочкой после логина или refresh)
    pub async fn set_tokens(&self, access_token: Option<String>, refresh_token: Option<String>) {
        *self.access_token.write().await = access_token;
        *self.refresh_token.write().await = refresh_token;
    }

    /// Получить access token
    pub async fn get_access_token(&self) -> Result<String, String> {
        self.access_token
            .read()
            .await
            .clone()
            .ok_or_else(|| "Access token not set. Call set_tokens first.".to_string())
    }

    /// Получить refresh token
    pub async fn get_refresh_token(&self) -> Result<Option<String>, String> {
        Ok(self.refresh_token.read().await.clone())
    }

    /// Обновить access token через refresh token.
    /// Истёкший access token - штатная ситуация, вызывается из retry-пути 401.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefreshResult, String> {
        #[derive(serde::Deserialize)]
        struct RefreshResponse {
            access_token: String,
            #[serde(default)]
            refresh_token: Option<String>,
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        let response = client
            .post(format!("{}/auth/refresh", self.api_base_url))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| format!("Network error during token refresh: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Token refresh failed with status: {}", status));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse refresh response: {}", e))?;

        Ok(TokenRefreshResult {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
        })
    }
}
