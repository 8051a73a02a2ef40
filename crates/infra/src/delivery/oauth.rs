//! OAuth2 refresh-token exchange for the mail channel.

use serde::Deserialize;

use super::DeliveryError;
use crate::config::SmtpSettings;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges refresh tokens for short-lived access tokens.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl TokenClient {
    pub fn new(settings: &SmtpSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: settings.token_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
        }
    }

    pub async fn access_token(&self, refresh_token: &str) -> Result<String, DeliveryError> {
        if refresh_token.trim().is_empty() {
            return Err(DeliveryError::Auth("missing refresh token".into()));
        }

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DeliveryError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Auth(format!("unreadable token response: {e}")))?;
        Ok(token.access_token)
    }
}
