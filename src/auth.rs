// auth.rs - Login/signup orchestration and the password-change state machine
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::api_client::{AccountApi, ApiError, GuideApiClient, ProfileUpdate};
use crate::session::SessionStore;
use crate::types::{Profile, UserSummary};
use crate::utils;

pub const RESEND_COOLDOWN: Duration = Duration::from_secs(30);

const SERVER_ERROR_MESSAGE: &str = "Server error. Please try again later";

/// User-facing failure from an auth flow. Validation failures never reach
/// the network; the other variants classify what the gateway reported.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    ServerError(String),
    #[error("{0}")]
    Connectivity(String),
}

impl AuthError {
    /// Classify a gateway failure: 4xx surfaces the server's message (or the
    /// given fallback), 5xx and transport failures get generic text.
    fn from_api(err: &ApiError, client_fallback: &str, connectivity: &str) -> Self {
        match err.status() {
            Some(status) if (400..500).contains(&status) => AuthError::Rejected(
                err.server_message().unwrap_or(client_fallback).to_string(),
            ),
            Some(status) if status >= 500 => {
                AuthError::ServerError(SERVER_ERROR_MESSAGE.to_string())
            }
            _ => AuthError::Connectivity(connectivity.to_string()),
        }
    }
}

/// Everything needed to create an account.
#[derive(Debug, Clone)]
pub struct SignupDetails {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
}

/// Drives the auth and profile endpoints and keeps the persisted session
/// flag in sync with the outcome.
pub struct AuthClient {
    api: GuideApiClient,
    session: Arc<SessionStore>,
}

impl AuthClient {
    pub fn new(api: GuideApiClient, session: Arc<SessionStore>) -> Self {
        Self { api, session }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserSummary, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "Email and password are required".to_string(),
            ));
        }
        match self.api.login(email, password).await {
            Ok(confirmation) => {
                self.session.set(true);
                info!("Logged in as {}", confirmation.user.email);
                Ok(confirmation.user)
            }
            Err(err) => Err(AuthError::from_api(
                &err,
                "Invalid email or password",
                "Unable to log in. Please check your connection",
            )),
        }
    }

    /// Create the account, then immediately log in with the same credentials
    /// so a fresh signup lands in an authenticated session.
    pub async fn signup(&self, details: &SignupDetails) -> Result<UserSummary, AuthError> {
        if details.email.trim().is_empty() || details.password.is_empty() {
            return Err(AuthError::Validation(
                "Email and password are required".to_string(),
            ));
        }
        if details.password != details.confirm_password {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }
        let phone_digits = utils::strip_phone(&details.phone_number);
        if !phone_digits.is_empty() && !utils::is_valid_phone(&phone_digits) {
            return Err(AuthError::Validation(
                "Please enter a valid 10-digit US phone number".to_string(),
            ));
        }

        let classify = |err: &ApiError| {
            AuthError::from_api(
                err,
                "Email already exists",
                "Unable to sign up. Please check your connection",
            )
        };

        self.api
            .signup(
                &details.email,
                &details.password,
                &details.first_name,
                &details.last_name,
                &phone_digits,
            )
            .await
            .map_err(|err| classify(&err))?;

        let confirmation = self
            .api
            .login(&details.email, &details.password)
            .await
            .map_err(|err| classify(&err))?;

        self.session.set(true);
        info!("Signed up and logged in as {}", confirmation.user.email);
        Ok(confirmation.user)
    }

    /// Best-effort server logout; the local flag is cleared regardless.
    pub async fn logout(&self) {
        if let Err(err) = self.api.logout().await {
            warn!("Logout request failed: {}", err);
        }
        self.session.set(false);
    }

    pub async fn profile(&self) -> Result<Profile, AuthError> {
        self.api.profile().await.map_err(|err| {
            AuthError::from_api(&err, "Failed to load profile", "Failed to load profile")
        })
    }

    /// Validate the phone number client-side, then save. An empty phone is
    /// allowed; a non-empty one must reduce to exactly 10 digits.
    pub async fn save_profile(
        &self,
        first_name: &str,
        last_name: &str,
        phone_number: &str,
    ) -> Result<ProfileUpdate, AuthError> {
        let phone_digits = utils::strip_phone(phone_number);
        if !phone_digits.is_empty() && !utils::is_valid_phone(&phone_digits) {
            return Err(AuthError::Validation(
                "Please enter a valid 10-digit US phone number".to_string(),
            ));
        }
        self.api
            .update_profile(first_name, last_name, &phone_digits)
            .await
            .map_err(|err| {
                AuthError::from_api(&err, "Failed to update profile", "Failed to update profile")
            })
    }
}

/// Steps of the password change. The code entered at `CodeVerified` passed
/// the client-side format check only; the backend verifies it for real when
/// the change is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordChangeState {
    Idle,
    CodeRequested { requested_at: Instant },
    CodeVerified { code: String, requested_at: Instant },
    Completed,
}

/// Multi-step password change: request a code out-of-band, confirm its
/// format, then atomically verify-and-change on the backend. Resends are
/// gated by a cooldown; a rejected code drops back to the entry step.
pub struct PasswordChangeFlow {
    api: Arc<dyn AccountApi>,
    state: PasswordChangeState,
    resend_cooldown: Duration,
}

impl PasswordChangeFlow {
    pub fn new(api: Arc<dyn AccountApi>) -> Self {
        Self {
            api,
            state: PasswordChangeState::Idle,
            resend_cooldown: RESEND_COOLDOWN,
        }
    }

    #[cfg(test)]
    fn with_cooldown(api: Arc<dyn AccountApi>, resend_cooldown: Duration) -> Self {
        Self {
            api,
            state: PasswordChangeState::Idle,
            resend_cooldown,
        }
    }

    pub fn state(&self) -> &PasswordChangeState {
        &self.state
    }

    /// Seconds left before another code may be requested.
    pub fn resend_remaining(&self) -> u64 {
        match &self.state {
            PasswordChangeState::CodeRequested { requested_at }
            | PasswordChangeState::CodeVerified { requested_at, .. } => self
                .resend_cooldown
                .saturating_sub(requested_at.elapsed())
                .as_secs(),
            _ => 0,
        }
    }

    /// Ask the backend to email a fresh verification code. A failure drops
    /// the flow back to `Idle`.
    pub async fn request_code(&mut self) -> Result<(), AuthError> {
        match &self.state {
            PasswordChangeState::CodeVerified { .. } | PasswordChangeState::Completed => {
                return Err(AuthError::Validation(
                    "No code request is pending".to_string(),
                ));
            }
            PasswordChangeState::CodeRequested { requested_at }
                if requested_at.elapsed() < self.resend_cooldown =>
            {
                return Err(AuthError::Validation(format!(
                    "Please wait {}s before requesting another code",
                    self.resend_remaining().max(1)
                )));
            }
            _ => {}
        }

        match self.api.request_password_change().await {
            Ok(()) => {
                self.state = PasswordChangeState::CodeRequested {
                    requested_at: Instant::now(),
                };
                Ok(())
            }
            Err(err) => {
                self.state = PasswordChangeState::Idle;
                Err(AuthError::from_api(
                    &err,
                    "Failed to send verification code. Please try again.",
                    "Failed to send verification code. Please try again.",
                ))
            }
        }
    }

    /// Format check only. Acceptance here is a UX step, not verification;
    /// the backend rejects a wrong code when the change is submitted.
    pub fn verify_code(&mut self, code: &str) -> Result<(), AuthError> {
        let requested_at = match &self.state {
            PasswordChangeState::CodeRequested { requested_at } => *requested_at,
            _ => {
                return Err(AuthError::Validation(
                    "Request a verification code first".to_string(),
                ));
            }
        };
        if !utils::is_valid_code(code) {
            return Err(AuthError::Validation(
                "Please enter a valid 6-digit code".to_string(),
            ));
        }
        self.state = PasswordChangeState::CodeVerified {
            code: code.to_string(),
            requested_at,
        };
        Ok(())
    }

    /// Submit the new password together with the verified code. A rejection
    /// that mentions the code sends the flow back to code entry.
    pub async fn change_password(
        &mut self,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        let (code, requested_at) = match &self.state {
            PasswordChangeState::CodeVerified {
                code,
                requested_at,
            } => (code.clone(), *requested_at),
            _ => {
                return Err(AuthError::Validation(
                    "Verify your code before setting a new password".to_string(),
                ));
            }
        };
        if new_password != confirm_password {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }
        if new_password.len() < 6 {
            return Err(AuthError::Validation(
                "Password must be at least 6 characters".to_string(),
            ));
        }

        match self.api.change_password(&code, new_password).await {
            Ok(()) => {
                self.state = PasswordChangeState::Completed;
                Ok(())
            }
            Err(err) => {
                let failure = AuthError::from_api(
                    &err,
                    "Failed to change password",
                    "Failed to change password",
                );
                if failure.to_string().contains("code") {
                    self.state = PasswordChangeState::CodeRequested { requested_at };
                }
                Err(failure)
            }
        }
    }

    /// Abandon the flow entirely (the "back to profile" path).
    pub fn reset(&mut self) {
        self.state = PasswordChangeState::Idle;
    }
}
