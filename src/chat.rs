// chat.rs - Conversation state and submission orchestration
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api_client::{ApiError, VideoBackend, GENERIC_CONNECTIVITY, GENERIC_SERVER_ERROR};
use crate::session::SessionStore;
use crate::types::{ChatThread, Message, MessageRole, VideoSource};
use crate::utils;

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";
pub const INVALID_URL_MESSAGE: &str = "Invalid URL format. Please provide a valid video URL.";

/// How long the expiry message stays on screen before the forced logout.
const LOGOUT_GRACE: Duration = Duration::from_millis(1500);

/// What a call to [`ChatOrchestrator::submit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank query, missing source, or a submission already in flight.
    Ignored,
    /// Input failed validation; nothing was sent.
    Invalid,
    /// The backend answered and the transcript was extended.
    Answered,
    /// The backend call failed; the optimistic user message is retained.
    Failed,
}

/// Turns a (video source, question) pair into a persisted exchange and keeps
/// the visible transcript consistent with backend state. One submission at a
/// time; thread continuity is keyed on the resolved video source string.
pub struct ChatOrchestrator {
    backend: Arc<dyn VideoBackend>,
    session: Arc<SessionStore>,
    messages: Vec<Message>,
    threads: Vec<ChatThread>,
    source: Option<VideoSource>,
    active_chat_id: Option<i64>,
    active_video_url: Option<String>,
    selected_id: Option<String>,
    processing: bool,
    error: Option<String>,
    logout_grace: Duration,
}

impl ChatOrchestrator {
    pub fn new(backend: Arc<dyn VideoBackend>, session: Arc<SessionStore>) -> Self {
        Self {
            backend,
            session,
            messages: Vec::new(),
            threads: Vec::new(),
            source: None,
            active_chat_id: None,
            active_video_url: None,
            selected_id: None,
            processing: false,
            error: None,
            logout_grace: LOGOUT_GRACE,
        }
    }

    #[cfg(test)]
    fn with_logout_grace(mut self, grace: Duration) -> Self {
        self.logout_grace = grace;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn threads(&self) -> &[ChatThread] {
        &self.threads
    }

    pub fn source(&self) -> Option<&VideoSource> {
        self.source.as_ref()
    }

    pub fn active_chat_id(&self) -> Option<i64> {
        self.active_chat_id
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn processing(&self) -> bool {
        self.processing
    }

    /// The message currently shown in the detail view.
    pub fn selected(&self) -> Option<&Message> {
        let id = self.selected_id.as_deref()?;
        self.messages.iter().find(|m| m.id == id)
    }

    /// Pick the video for the next submission. Continuity against the active
    /// thread is decided at submit time, not here.
    pub fn set_source(&mut self, source: VideoSource) {
        self.source = Some(source);
    }

    /// Select an assistant entry for the detail view. User entries are not
    /// selectable.
    pub fn select(&mut self, id: &str) -> bool {
        let found = self
            .messages
            .iter()
            .any(|m| m.id == id && m.role == MessageRole::Assistant);
        if found {
            self.selected_id = Some(id.to_string());
        }
        found
    }

    /// Submit a question about the current video source.
    pub async fn submit(&mut self, query: &str) -> SubmitOutcome {
        if self.processing {
            return SubmitOutcome::Ignored;
        }
        let query = query.trim();
        if query.is_empty() {
            return SubmitOutcome::Ignored;
        }
        let Some(source) = self.source.clone() else {
            return SubmitOutcome::Ignored;
        };
        if let VideoSource::Url { url } = &source {
            if !utils::is_http_url(url) {
                self.error = Some(INVALID_URL_MESSAGE.to_string());
                return SubmitOutcome::Invalid;
            }
        }

        let resolved = source.resolved().to_string();

        // Optimistic: the question lands in the transcript before the call,
        // and stays there even if the call fails.
        self.messages.push(Message::user(query, Some(source)));

        // A changed source starts a new backend thread; an unchanged one
        // keeps answering into the active thread.
        if self.active_video_url.as_deref() != Some(resolved.as_str()) {
            self.active_chat_id = None;
            self.active_video_url = Some(resolved.clone());
        }

        self.processing = true;
        self.error = None;
        let result = self
            .backend
            .process_video(&resolved, query, self.active_chat_id)
            .await;
        self.processing = false;

        match result {
            Ok(answer) => {
                self.active_chat_id = Some(answer.chat_id);
                let message = Message::assistant_from_answer(&answer);
                self.selected_id = Some(message.id.clone());
                self.messages.push(message);
                info!("Answer received for thread {}", answer.chat_id);
                self.refresh_threads().await;
                SubmitOutcome::Answered
            }
            Err(err) => {
                self.error = Some(classify_submit_error(&err));
                if err.status() == Some(401) {
                    self.schedule_forced_logout();
                }
                SubmitOutcome::Failed
            }
        }
    }

    /// Wipe the local conversation and detach from the active thread.
    pub async fn start_new_thread(&mut self) {
        self.messages.clear();
        self.active_chat_id = None;
        self.active_video_url = None;
        self.source = None;
        self.selected_id = None;
        self.error = None;
        self.refresh_threads().await;
    }

    /// Adopt a previously saved thread: rebuild the transcript from its
    /// stored history and select the most recent assistant entry.
    pub fn load_thread(&mut self, thread: &ChatThread) {
        self.active_chat_id = Some(thread.id);
        self.active_video_url = Some(thread.video_url.clone());
        self.source = Some(VideoSource::url(thread.video_url.clone()));
        self.error = None;
        self.messages.clear();

        let mut last_assistant = None;
        for exchange in &thread.history {
            self.messages.push(Message::user(exchange.query.as_str(), None));
            if let Some(answer) = &exchange.response {
                let message = Message::assistant_from_answer(answer);
                last_assistant = Some(message.id.clone());
                self.messages.push(message);
            }
        }
        self.selected_id = last_assistant;
    }

    /// Re-fetch the cached thread list. The list is advisory; a failed
    /// refresh keeps the previous cache.
    pub async fn refresh_threads(&mut self) {
        match self.backend.chat_history().await {
            Ok(chats) => self.threads = chats,
            Err(err) => warn!("Failed to refresh chat history: {}", err),
        }
    }

    /// A 401 means the cookie session is gone. Show the expiry message now,
    /// clear the persisted flag shortly after. The timer is fire-and-forget.
    fn schedule_forced_logout(&self) {
        let session = Arc::clone(&self.session);
        let grace = self.logout_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            warn!("Session expired; clearing the persisted login flag");
            session.set(false);
        });
    }
}

fn classify_submit_error(err: &ApiError) -> String {
    match err.status() {
        Some(401) => SESSION_EXPIRED_MESSAGE.to_string(),
        Some(status) if (400..500).contains(&status) => err
            .server_message()
            .map(str::to_string)
            .unwrap_or_else(|| GENERIC_CONNECTIVITY.to_string()),
        Some(status) if status >= 500 => GENERIC_SERVER_ERROR.to_string(),
        _ => GENERIC_CONNECTIVITY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatExchange, KeyFrame, RangeNote, VideoAnswer};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeBackend {
        responses: Mutex<VecDeque<Result<VideoAnswer, ApiError>>>,
        calls: Mutex<Vec<(String, String, Option<i64>)>>,
        history: Mutex<Vec<ChatThread>>,
    }

    impl FakeBackend {
        fn push_answer(&self, chat_id: i64, response: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(answer(chat_id, response)));
        }

        fn push_failure(&self, status: u16, message: Option<&str>) {
            self.responses.lock().unwrap().push_back(Err(ApiError::Status {
                status,
                message: message.map(str::to_string),
            }));
        }

        fn calls(&self) -> Vec<(String, String, Option<i64>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VideoBackend for FakeBackend {
        async fn process_video(
            &self,
            video_url: &str,
            query: &str,
            chat_id: Option<i64>,
        ) -> Result<VideoAnswer, ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push((video_url.to_string(), query.to_string(), chat_id));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Status { status: 500, message: None }))
        }

        async fn chat_history(&self) -> Result<Vec<ChatThread>, ApiError> {
            Ok(self.history.lock().unwrap().clone())
        }
    }

    fn answer(chat_id: i64, response: &str) -> VideoAnswer {
        VideoAnswer {
            chat_id,
            response: response.to_string(),
            reasoning: "looked at the frames".to_string(),
            key_frames: vec![KeyFrame {
                timestamp: "0:45".to_string(),
                frame: "data:image/svg+xml;base64,AAAA".to_string(),
                description: "intro".to_string(),
            }],
            timestamps: vec![RangeNote {
                time: "0:45 - 1:30".to_string(),
                description: "Introduction".to_string(),
            }],
        }
    }

    fn scratch_session() -> Arc<SessionStore> {
        Arc::new(SessionStore::open(
            std::env::temp_dir().join(format!("guide-ai-chat-{}", Uuid::new_v4())),
        ))
    }

    fn orchestrator(backend: &Arc<FakeBackend>) -> ChatOrchestrator {
        ChatOrchestrator::new(
            Arc::clone(backend) as Arc<dyn VideoBackend>,
            scratch_session(),
        )
    }

    #[tokio::test]
    async fn test_blank_query_or_missing_source_is_a_no_op() {
        let backend = Arc::new(FakeBackend::default());
        let mut chat = orchestrator(&backend);

        assert_eq!(chat.submit("   ").await, SubmitOutcome::Ignored);
        assert_eq!(chat.submit("what happens?").await, SubmitOutcome::Ignored);
        assert!(chat.messages().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_url_never_reaches_the_backend() {
        let backend = Arc::new(FakeBackend::default());
        let mut chat = orchestrator(&backend);
        chat.set_source(VideoSource::url("example.com/video.mp4"));

        assert_eq!(chat.submit("what happens?").await, SubmitOutcome::Invalid);
        assert_eq!(chat.error(), Some(INVALID_URL_MESSAGE));
        assert!(chat.messages().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_appends_one_user_message_even_on_failure() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_failure(500, None);
        let mut chat = orchestrator(&backend);
        chat.set_source(VideoSource::url("https://example.com/v.mp4"));

        assert_eq!(chat.submit("what happens?").await, SubmitOutcome::Failed);
        let users: Vec<_> = chat
            .messages()
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .collect();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].content, "what happens?");
        assert_eq!(chat.error(), Some(GENERIC_SERVER_ERROR));
        assert!(!chat.processing());
    }

    #[tokio::test]
    async fn test_same_source_reuses_thread_and_new_source_clears_it() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_answer(12, "A1");
        backend.push_answer(12, "A2");
        backend.push_answer(34, "B1");
        let mut chat = orchestrator(&backend);

        chat.set_source(VideoSource::url("https://example.com/a.mp4"));
        assert_eq!(chat.submit("q1").await, SubmitOutcome::Answered);
        assert_eq!(chat.submit("q2").await, SubmitOutcome::Answered);

        chat.set_source(VideoSource::url("https://example.com/b.mp4"));
        assert_eq!(chat.submit("q3").await, SubmitOutcome::Answered);

        let calls = backend.calls();
        assert_eq!(calls[0].2, None);
        assert_eq!(calls[1].2, Some(12));
        assert_eq!(calls[2].2, None);
        assert_eq!(chat.active_chat_id(), Some(34));
    }

    #[tokio::test]
    async fn test_reselected_upload_starts_a_fresh_thread() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_answer(5, "A1");
        backend.push_answer(9, "A2");
        let mut chat = orchestrator(&backend);

        chat.set_source(VideoSource::upload("lecture.mp4"));
        chat.submit("q1").await;
        chat.set_source(VideoSource::upload("lecture.mp4"));
        chat.submit("q2").await;

        let calls = backend.calls();
        assert_eq!(calls[1].2, None);
        assert_ne!(calls[0].0, calls[1].0);
    }

    #[tokio::test]
    async fn test_answer_is_selected_and_ranges_are_split() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_answer(3, "Based on the video, ...");
        let mut chat = orchestrator(&backend);
        chat.set_source(VideoSource::url("https://example.com/v.mp4"));

        chat.submit("what happens?").await;
        let selected = chat.selected().expect("assistant message selected");
        assert_eq!(selected.role, MessageRole::Assistant);
        assert_eq!(selected.timestamps[0].start, "0:45");
        assert_eq!(selected.timestamps[0].end, "1:30");
        assert_eq!(selected.timestamps[0].content, "Introduction");
    }

    #[tokio::test]
    async fn test_400_surfaces_the_server_message_verbatim() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_failure(400, Some("Invalid URL format. Please provide a valid video URL."));
        let mut chat = orchestrator(&backend);
        chat.set_source(VideoSource::url("https://example.com/v.mp4"));

        chat.submit("q").await;
        assert_eq!(
            chat.error(),
            Some("Invalid URL format. Please provide a valid video URL.")
        );
    }

    #[tokio::test]
    async fn test_expired_session_logs_out_after_the_grace_delay() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_failure(401, None);
        let session = scratch_session();
        session.set(true);
        let mut chat = ChatOrchestrator::new(
            Arc::clone(&backend) as Arc<dyn VideoBackend>,
            Arc::clone(&session),
        )
        .with_logout_grace(Duration::from_millis(10));
        chat.set_source(VideoSource::url("https://example.com/v.mp4"));

        assert_eq!(chat.submit("q").await, SubmitOutcome::Failed);
        assert_eq!(chat.error(), Some(SESSION_EXPIRED_MESSAGE));
        assert!(session.get());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!session.get());
    }

    #[tokio::test]
    async fn test_start_new_thread_resets_everything() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_answer(12, "A1");
        let mut chat = orchestrator(&backend);
        chat.set_source(VideoSource::url("https://example.com/a.mp4"));
        chat.submit("q1").await;

        chat.start_new_thread().await;
        assert!(chat.messages().is_empty());
        assert_eq!(chat.active_chat_id(), None);
        assert!(chat.source().is_none());
        assert!(chat.selected().is_none());
        assert!(chat.error().is_none());
    }

    #[tokio::test]
    async fn test_load_thread_flattens_history() {
        let backend = Arc::new(FakeBackend::default());
        let mut chat = orchestrator(&backend);

        let thread = ChatThread {
            id: 12,
            video_url: "https://example.com/a.mp4".to_string(),
            title: "Q1".to_string(),
            last_message: "Q1".to_string(),
            updated_at: Utc::now(),
            message_count: 1,
            history: vec![ChatExchange {
                query: "Q1".to_string(),
                response: Some(VideoAnswer {
                    chat_id: 12,
                    response: "A1".to_string(),
                    reasoning: String::new(),
                    key_frames: vec![],
                    timestamps: vec![RangeNote {
                        time: "0:10 - 0:20".to_string(),
                        description: "d".to_string(),
                    }],
                }),
            }],
        };

        chat.load_thread(&thread);
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[0].role, MessageRole::User);
        assert_eq!(chat.messages()[0].content, "Q1");
        assert_eq!(chat.messages()[1].role, MessageRole::Assistant);
        assert_eq!(chat.messages()[1].content, "A1");
        assert_eq!(chat.messages()[1].timestamps[0].start, "0:10");
        assert_eq!(chat.messages()[1].timestamps[0].end, "0:20");
        assert_eq!(chat.messages()[1].timestamps[0].content, "d");

        let selected = chat.selected().expect("last assistant selected");
        assert_eq!(selected.content, "A1");
        assert_eq!(chat.active_chat_id(), Some(12));
    }

    #[tokio::test]
    async fn test_load_thread_skips_unanswered_exchanges() {
        let backend = Arc::new(FakeBackend::default());
        let mut chat = orchestrator(&backend);

        let thread = ChatThread {
            id: 4,
            video_url: "https://example.com/a.mp4".to_string(),
            title: "Q1".to_string(),
            last_message: "Q2".to_string(),
            updated_at: Utc::now(),
            message_count: 2,
            history: vec![
                ChatExchange {
                    query: "Q1".to_string(),
                    response: Some(VideoAnswer {
                        chat_id: 4,
                        response: "A1".to_string(),
                        reasoning: String::new(),
                        key_frames: vec![],
                        timestamps: vec![],
                    }),
                },
                ChatExchange {
                    query: "Q2".to_string(),
                    response: None,
                },
            ],
        };

        chat.load_thread(&thread);
        assert_eq!(chat.messages().len(), 3);
        assert_eq!(chat.messages()[2].role, MessageRole::User);
        assert_eq!(chat.messages()[2].content, "Q2");
        assert_eq!(chat.selected().unwrap().content, "A1");
    }

    #[tokio::test]
    async fn test_followup_after_load_reuses_the_loaded_thread() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_answer(12, "A2");
        let mut chat = orchestrator(&backend);

        let thread = ChatThread {
            id: 12,
            video_url: "https://example.com/a.mp4".to_string(),
            title: "Q1".to_string(),
            last_message: "Q1".to_string(),
            updated_at: Utc::now(),
            message_count: 1,
            history: vec![],
        };
        chat.load_thread(&thread);
        chat.submit("follow-up").await;

        assert_eq!(backend.calls()[0].2, Some(12));
    }

    #[tokio::test]
    async fn test_user_entries_are_not_selectable() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_answer(1, "A1");
        let mut chat = orchestrator(&backend);
        chat.set_source(VideoSource::url("https://example.com/v.mp4"));
        chat.submit("q1").await;

        let user_id = chat.messages()[0].id.clone();
        let assistant_id = chat.messages()[1].id.clone();
        assert!(!chat.select(&user_id));
        assert!(chat.select(&assistant_id));
        assert_eq!(chat.selected().unwrap().id, assistant_id);
    }
}
