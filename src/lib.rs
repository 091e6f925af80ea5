// lib.rs - Guide AI client library: session state, API gateway, and chat orchestration
pub mod api_client;
pub mod auth;
pub mod chat;
pub mod session;
pub mod types;
pub mod utils;

// Re-export the pieces a front-end wires together.
pub use api_client::{ApiError, GuideApiClient, DEFAULT_BASE_URL};
pub use auth::{AuthClient, PasswordChangeFlow, PasswordChangeState, SignupDetails};
pub use chat::{ChatOrchestrator, SubmitOutcome};
pub use session::SessionStore;
pub use types::*;
