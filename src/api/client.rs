use std::time::Duration;

use reqwest::Client as HttpClient;
use serde_json::Value;
use url::Url;

use crate::api::error::ApiError;
use crate::api::models::{is_connected_payload, normalize_phone, ChatMessage, SessionStart};
use crate::app::ServerSettings;
use crate::utils::filter_bmp;

/// Client for a WPPConnect-style automation server. Sessions are addressed by
/// name; tokens are owned by the caller and passed per request.
#[derive(Clone)]
pub struct ApiClient {
    pub http: HttpClient,
    base_url: String,
    secret_key: String,
    country_code: String,
}

impl ApiClient {
    pub fn new(settings: &ServerSettings) -> Self {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            http,
            base_url: crate::utils::normalize_url(&settings.base_url),
            secret_key: settings.secret_key.clone(),
            country_code: settings.country_code.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, session: &str, tail: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push("api")
            .push(session)
            .extend(tail);
        Ok(url)
    }

    fn with_auth(req: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
    }

    fn map_send_error(&self, e: reqwest::Error) -> ApiError {
        if e.is_connect() {
            ApiError::Unreachable(self.base_url.clone())
        } else {
            ApiError::Transport(e)
        }
    }

    /// Error payloads usually carry a `message` field; fall back to the raw body.
    async fn status_error(resp: reqwest::Response) -> ApiError {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|json| json.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(text);
        ApiError::Status { status, message }
    }

    pub async fn generate_token(&self, session: &str) -> Result<String, ApiError> {
        let url = self.endpoint(session, &[self.secret_key.as_str(), "generate-token"])?;
        let resp = self.http.post(url).send().await.map_err(|e| self.map_send_error(e))?;
        if !matches!(resp.status().as_u16(), 200 | 201) {
            return Err(Self::status_error(resp).await);
        }
        let json: Value = resp.json().await?;
        json.get("token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(ApiError::TokenNotInResponse)
    }

    /// Starts (or resumes) a session, generating a token first when none is held.
    /// Returns the token in use alongside the server's answer.
    pub async fn start_session(&self, session: &str, token: Option<String>) -> Result<(String, SessionStart), ApiError> {
        let token = match token {
            Some(t) => t,
            None => self.generate_token(session).await?,
        };
        let url = self.endpoint(session, &["start-session"])?;
        let resp = Self::with_auth(self.http.post(url), &token)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        if resp.status().as_u16() != 200 {
            return Err(Self::status_error(resp).await);
        }
        let json: Value = resp.json().await?;
        let outcome = if json.get("qrcode").is_some() {
            SessionStart::QrCode
        } else if json.get("status").and_then(|v| v.as_str()) == Some("CONNECTED") {
            SessionStart::Connected
        } else {
            SessionStart::Initializing
        };
        Ok((token, outcome))
    }

    /// Any failure, including a missing token, reads as "not connected".
    pub async fn check_connection(&self, session: &str, token: Option<&str>) -> bool {
        let Some(token) = token else { return false };
        let Ok(url) = self.endpoint(session, &["check-connection-session"]) else { return false };
        match Self::with_auth(self.http.get(url), token).send().await {
            Ok(resp) if resp.status().as_u16() == 200 => match resp.json::<Value>().await {
                Ok(json) => is_connected_payload(&json),
                Err(_) => false,
            },
            Ok(_) => false,
            Err(e) => {
                log::debug!("connection check for {session} failed: {e}");
                false
            }
        }
    }

    pub async fn close_session(&self, session: &str, token: Option<&str>) -> Result<(), ApiError> {
        self.post_lifecycle(session, token, "close-session").await
    }

    pub async fn logout_session(&self, session: &str, token: Option<&str>) -> Result<(), ApiError> {
        self.post_lifecycle(session, token, "logout-session").await
    }

    async fn post_lifecycle(&self, session: &str, token: Option<&str>, action: &str) -> Result<(), ApiError> {
        let token = token.ok_or(ApiError::MissingToken)?;
        let url = self.endpoint(session, &[action])?;
        let resp = Self::with_auth(self.http.post(url), token)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        if resp.status().as_u16() == 200 {
            Ok(())
        } else {
            Err(Self::status_error(resp).await)
        }
    }

    pub async fn send_message(&self, session: &str, token: Option<&str>, phone: &str, message: &str) -> Result<(), ApiError> {
        let token = token.ok_or(ApiError::MissingToken)?;
        let url = self.endpoint(session, &["send-message"])?;
        let body = serde_json::json!({
            "phone": normalize_phone(phone, &self.country_code),
            "message": filter_bmp(message),
        });
        let resp = Self::with_auth(self.http.post(url), token)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        if matches!(resp.status().as_u16(), 200 | 201) {
            Ok(())
        } else {
            Err(Self::status_error(resp).await)
        }
    }

    /// Recent chat history with a contact, oldest first as the server returns it.
    pub async fn messages_for_contact(&self, session: &str, token: Option<&str>, phone: &str) -> Result<Vec<ChatMessage>, ApiError> {
        let token = token.ok_or(ApiError::MissingToken)?;
        let phone = normalize_phone(phone, &self.country_code);
        let url = self.endpoint(session, &["all-messages-in-chat", phone.as_str()])?;
        let resp = Self::with_auth(self.http.get(url), token)
            .query(&[("includeMe", "true")])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        if resp.status().as_u16() != 200 {
            return Err(Self::status_error(resp).await);
        }
        let json: Value = resp.json().await?;
        let items = json
            .get("response")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().map(ChatMessage::from_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&ServerSettings {
            base_url: base.to_string(),
            ..ServerSettings::default()
        })
    }

    #[test]
    fn endpoints_escape_session_names() {
        let c = client("http://localhost:21465/");
        let url = c.endpoint("Sales Team", &["send-message"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:21465/api/Sales%20Team/send-message");
    }

    #[test]
    fn token_endpoint_embeds_secret() {
        let c = client("localhost:21465");
        let url = c.endpoint("work", &["THISISMYSECURETOKEN", "generate-token"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:21465/api/work/THISISMYSECURETOKEN/generate-token");
    }

    #[test]
    fn calls_without_token_fail_fast() {
        let c = client("http://127.0.0.1:9");
        let res = crate::utils::RUNTIME.block_on(c.send_message("work", None, "11987654321", "oi"));
        assert!(matches!(res, Err(ApiError::MissingToken)));
        let connected = crate::utils::RUNTIME.block_on(c.check_connection("work", None));
        assert!(!connected);
    }
}
