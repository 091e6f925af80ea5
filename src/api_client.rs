// api_client.rs - Typed gateway to the Guide AI backend
use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::types::{ChatThread, Profile, UserSummary, VideoAnswer};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Generic failure strings shown when the backend gives nothing better.
pub const GENERIC_SERVER_ERROR: &str = "Server error. Please try again later.";
pub const GENERIC_CONNECTIVITY: &str = "Unable to reach the server. Please try again.";

const CSRF_COOKIE: &str = "csrftoken";
const CSRF_HEADER: &str = "X-CSRFToken";

/// Normalized gateway failure. Every endpoint makes exactly one attempt;
/// classification into user-facing messages happens in the flows above.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The backend answered with a non-success status. `message` is the
    /// server-supplied `error` string when the body carried one.
    #[error("backend returned HTTP {status}")]
    Status { status: u16, message: Option<String> },
    /// The request never produced an HTTP response.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(_) => None,
        }
    }

    /// Server-supplied error string from the response body, when present.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message, .. } => message.as_deref(),
            ApiError::Network(_) => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Confirmation payload of a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub message: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest<'a> {
    email: &'a str,
    password: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    phone_number: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest<'a> {
    first_name: &'a str,
    last_name: &'a str,
    phone_number: &'a str,
}

/// `PUT /auth/profile/` echoes the saved fields without the join date.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest<'a> {
    code: &'a str,
    new_password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    video_url: &'a str,
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    chats: Vec<ChatThread>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    #[allow(dead_code)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// The video endpoints the chat orchestrator depends on.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn process_video(
        &self,
        video_url: &str,
        query: &str,
        chat_id: Option<i64>,
    ) -> Result<VideoAnswer, ApiError>;

    async fn chat_history(&self) -> Result<Vec<ChatThread>, ApiError>;
}

/// The account endpoints the password-change flow depends on.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn request_password_change(&self) -> Result<(), ApiError>;
    async fn change_password(&self, code: &str, new_password: &str) -> Result<(), ApiError>;
}

/// HTTP client for the Guide AI backend. Session identity travels in the
/// cookie jar; the anti-forgery token is captured from `Set-Cookie` headers
/// and replayed on every mutating request (empty string until the backend
/// hands one out, which the server rejects as unauthenticated).
#[derive(Debug, Clone)]
pub struct GuideApiClient {
    client: Client,
    base_url: String,
    csrf_token: Arc<RwLock<Option<String>>>,
}

impl GuideApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            csrf_token: Arc::new(RwLock::new(None)),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn csrf_header_value(&self) -> String {
        self.csrf_token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Remember the anti-forgery token whenever the backend sets or rotates it.
    fn capture_csrf(&self, response: &Response) {
        for value in response.headers().get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            if let Some(token) = csrf_from_set_cookie(raw) {
                if let Ok(mut guard) = self.csrf_token.write() {
                    *guard = Some(token);
                }
            }
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        self.capture_csrf(&response);
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .ok()
                .and_then(|body| extract_error(&body));
            debug!("Request failed with HTTP {}: {:?}", status, message);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.endpoint(path))
            .header(CSRF_HEADER, self.csrf_header_value())
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.client
            .put(self.endpoint(path))
            .header(CSRF_HEADER, self.csrf_header_value())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        debug!("POST /auth/login/ for {}", email);
        let request = self
            .post("/auth/login/")
            .json(&LoginRequest { email, password });
        self.execute(request).await
    }

    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
        phone_number: &str,
    ) -> Result<(), ApiError> {
        debug!("POST /auth/signup/ for {}", email);
        let request = self.post("/auth/signup/").json(&SignupRequest {
            email,
            password,
            first_name,
            last_name,
            phone_number,
        });
        self.execute::<MessageResponse>(request).await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        debug!("POST /auth/logout/");
        let request = self.post("/auth/logout/").json(&serde_json::json!({}));
        self.execute::<MessageResponse>(request).await?;
        Ok(())
    }

    pub async fn profile(&self) -> Result<Profile, ApiError> {
        debug!("GET /auth/profile/");
        let request = self.client.get(self.endpoint("/auth/profile/"));
        self.execute(request).await
    }

    pub async fn update_profile(
        &self,
        first_name: &str,
        last_name: &str,
        phone_number: &str,
    ) -> Result<ProfileUpdate, ApiError> {
        debug!("PUT /auth/profile/");
        let request = self.put("/auth/profile/").json(&UpdateProfileRequest {
            first_name,
            last_name,
            phone_number,
        });
        self.execute(request).await
    }

    pub async fn request_password_change(&self) -> Result<(), ApiError> {
        debug!("POST /auth/request-password-change/");
        let request = self
            .post("/auth/request-password-change/")
            .json(&serde_json::json!({}));
        self.execute::<MessageResponse>(request).await?;
        Ok(())
    }

    pub async fn change_password(&self, code: &str, new_password: &str) -> Result<(), ApiError> {
        debug!("POST /auth/change-password/");
        let request = self
            .post("/auth/change-password/")
            .json(&ChangePasswordRequest { code, new_password });
        self.execute::<MessageResponse>(request).await?;
        Ok(())
    }

    pub async fn process_video(
        &self,
        video_url: &str,
        query: &str,
        chat_id: Option<i64>,
    ) -> Result<VideoAnswer, ApiError> {
        debug!(
            "POST /videos/process/ (thread: {})",
            chat_id.map(|id| id.to_string()).unwrap_or_else(|| "new".to_string())
        );
        let request = self.post("/videos/process/").json(&ProcessRequest {
            video_url,
            query,
            chat_id,
        });
        self.execute(request).await
    }

    pub async fn chat_history(&self) -> Result<Vec<ChatThread>, ApiError> {
        debug!("GET /videos/history/");
        let request = self.client.get(self.endpoint("/videos/history/"));
        let response: HistoryResponse = self.execute(request).await?;
        Ok(response.chats)
    }
}

#[async_trait]
impl VideoBackend for GuideApiClient {
    async fn process_video(
        &self,
        video_url: &str,
        query: &str,
        chat_id: Option<i64>,
    ) -> Result<VideoAnswer, ApiError> {
        GuideApiClient::process_video(self, video_url, query, chat_id).await
    }

    async fn chat_history(&self) -> Result<Vec<ChatThread>, ApiError> {
        GuideApiClient::chat_history(self).await
    }
}

#[async_trait]
impl AccountApi for GuideApiClient {
    async fn request_password_change(&self) -> Result<(), ApiError> {
        GuideApiClient::request_password_change(self).await
    }

    async fn change_password(&self, code: &str, new_password: &str) -> Result<(), ApiError> {
        GuideApiClient::change_password(self, code, new_password).await
    }
}

/// Pull the csrftoken value out of one raw `Set-Cookie` header.
fn csrf_from_set_cookie(raw: &str) -> Option<String> {
    let pair = raw.split(';').next()?;
    let (name, token) = pair.split_once('=')?;
    if name.trim() == CSRF_COOKIE && !token.is_empty() {
        Some(token.to_string())
    } else {
        None
    }
}

fn extract_error(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error.or(parsed.message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csrf_cookie_parsing() {
        assert_eq!(
            csrf_from_set_cookie("csrftoken=abc123; Path=/; SameSite=Lax"),
            Some("abc123".to_string())
        );
        assert_eq!(
            csrf_from_set_cookie("sessionid=xyz; Path=/; HttpOnly"),
            None
        );
        assert_eq!(csrf_from_set_cookie("csrftoken=; Path=/"), None);
        assert_eq!(csrf_from_set_cookie("garbage"), None);
    }

    #[test]
    fn test_error_body_extraction() {
        assert_eq!(
            extract_error(r#"{"error": "Invalid verification code"}"#),
            Some("Invalid verification code".to_string())
        );
        assert_eq!(
            extract_error(r#"{"message": "Not allowed"}"#),
            Some("Not allowed".to_string())
        );
        assert_eq!(extract_error("<html>502</html>"), None);
        assert_eq!(extract_error(r#"{"detail": "other"}"#), None);
    }

    #[test]
    fn test_process_request_omits_unset_thread_id() {
        let without = serde_json::to_value(ProcessRequest {
            video_url: "https://example.com/v.mp4",
            query: "What happens?",
            chat_id: None,
        })
        .unwrap();
        assert!(without.get("chatId").is_none());
        assert_eq!(without["videoUrl"], "https://example.com/v.mp4");

        let with = serde_json::to_value(ProcessRequest {
            video_url: "https://example.com/v.mp4",
            query: "And then?",
            chat_id: Some(12),
        })
        .unwrap();
        assert_eq!(with["chatId"], 12);
    }

    #[test]
    fn test_api_error_accessors() {
        let err = ApiError::Status {
            status: 400,
            message: Some("Invalid verification code".to_string()),
        };
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.server_message(), Some("Invalid verification code"));

        let bare = ApiError::Status {
            status: 502,
            message: None,
        };
        assert_eq!(bare.status(), Some(502));
        assert_eq!(bare.server_message(), None);
    }

    #[test]
    fn test_header_value_defaults_to_empty() {
        let client = GuideApiClient::new(DEFAULT_BASE_URL).unwrap();
        assert_eq!(client.csrf_header_value(), "");
    }
}
