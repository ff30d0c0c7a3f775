use reqwest::Client;
use std::time::Duration;

// Проверка online статуса через легковесный HTTP запрос к API.
// Используется только для классификации деградации восстановления
// (offline или ошибка сервера), состояние таймера не меняет.
pub async fn check_online_status(api_base_url: &str) -> bool {
    let client = match Client::builder().timeout(Duration::from_secs(2)).build() {
        Ok(client) => client,
        Err(_) => return false,
    };

    match client
        .get(format!("{}/health", api_base_url))
        .timeout(Duration::from_secs(2))
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(_) => {
            // Fallback: сам базовый URL (health endpoint может отсутствовать)
            match client.get(api_base_url).timeout(Duration::from_secs(2)).send().await {
                Ok(response) => response.status().as_u16() < 500,
                Err(_) => false,
            }
        }
    }
}
