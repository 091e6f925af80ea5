// types.rs - Common data structures shared by the gateway, flows, and terminal UI
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Where the active video comes from. An upload mints a fresh token per
/// selection, so re-selecting the same file resolves to a different source
/// string and starts a new thread on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Upload { name: String, token: String },
    Url { url: String },
}

impl VideoSource {
    pub fn upload(name: impl Into<String>) -> Self {
        let name = name.into();
        let token = format!("upload://{}/{}", Uuid::new_v4(), name);
        VideoSource::Upload { name, token }
    }

    pub fn url(url: impl Into<String>) -> Self {
        VideoSource::Url { url: url.into() }
    }

    /// The string sent to the backend; thread continuity is keyed on it.
    pub fn resolved(&self) -> &str {
        match self {
            VideoSource::Upload { token, .. } => token,
            VideoSource::Url { url } => url,
        }
    }

    /// Short human-readable label for rendering.
    pub fn describe(&self) -> &str {
        match self {
            VideoSource::Upload { name, .. } => name,
            VideoSource::Url { url } => url,
        }
    }
}

/// A backend-selected still image representing a moment in the video.
/// `frame` is either a `data:` URI or a plain URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyFrame {
    pub timestamp: String,
    pub frame: String,
    pub description: String,
}

/// Raw wire shape of a timestamp annotation: `time` is `"start - end"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeNote {
    pub time: String,
    pub description: String,
}

/// A `RangeNote` split into its start/end halves for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
    pub content: String,
}

/// Successful payload of `POST /videos/process/`, also stored verbatim as
/// the `response` half of each history exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoAnswer {
    pub chat_id: i64,
    pub response: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub key_frames: Vec<KeyFrame>,
    #[serde(default)]
    pub timestamps: Vec<RangeNote>,
}

/// One query/response pair inside a persisted thread. `response` is null
/// for an exchange the backend never finished answering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatExchange {
    pub query: String,
    #[serde(default)]
    pub response: Option<VideoAnswer>,
}

/// A server-persisted conversation scoped to one video source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: i64,
    #[serde(rename = "videoUrl")]
    pub video_url: String,
    #[serde(rename = "videoTitle")]
    pub title: String,
    #[serde(rename = "lastMessage", default)]
    pub last_message: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "messageCount", default)]
    pub message_count: i64,
    #[serde(rename = "chat_history", default)]
    pub history: Vec<ChatExchange>,
}

/// Account details from `GET /auth/profile/`. Email and join date are
/// immutable server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
    pub date_joined: DateTime<Utc>,
}

/// User confirmation returned by a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// One transcript entry. Immutable once created; assistant entries carry
/// the structured answer detail for the tabbed view.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub video: Option<VideoSource>,
    pub reasoning: Option<String>,
    pub frames: Vec<KeyFrame>,
    pub timestamps: Vec<TimeRange>,
}

impl Message {
    pub fn user(content: impl Into<String>, video: Option<VideoSource>) -> Self {
        Self {
            id: next_message_id(),
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            video,
            reasoning: None,
            frames: Vec::new(),
            timestamps: Vec::new(),
        }
    }

    pub fn assistant_from_answer(answer: &VideoAnswer) -> Self {
        let timestamps = answer
            .timestamps
            .iter()
            .map(|note| {
                let (start, end) = crate::utils::split_time_range(&note.time);
                TimeRange {
                    start,
                    end,
                    content: note.description.clone(),
                }
            })
            .collect();

        Self {
            id: next_message_id(),
            role: MessageRole::Assistant,
            content: answer.response.clone(),
            timestamp: Utc::now(),
            video: None,
            reasoning: Some(answer.reasoning.clone()),
            frames: answer.key_frames.clone(),
            timestamps,
        }
    }
}

/// Time-derived message ids: epoch milliseconds, bumped past the last issued
/// value so two messages created in the same millisecond stay unique.
fn next_message_id() -> String {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let mut candidate = Utc::now().timestamp_millis();
    loop {
        let last = LAST.load(Ordering::SeqCst);
        if candidate <= last {
            candidate = last + 1;
        }
        if LAST
            .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return candidate.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_unique_and_increasing() {
        let a = Message::user("first", None);
        let b = Message::user("second", None);
        let a_id: i64 = a.id.parse().unwrap();
        let b_id: i64 = b.id.parse().unwrap();
        assert!(b_id > a_id);
    }

    #[test]
    fn test_upload_sources_never_resolve_alike() {
        let first = VideoSource::upload("lecture.mp4");
        let second = VideoSource::upload("lecture.mp4");
        assert_ne!(first.resolved(), second.resolved());
        assert!(first.resolved().starts_with("upload://"));
        assert!(first.resolved().ends_with("/lecture.mp4"));
    }

    #[test]
    fn test_assistant_message_splits_ranges() {
        let answer = VideoAnswer {
            chat_id: 7,
            response: "A1".to_string(),
            reasoning: "frame-by-frame".to_string(),
            key_frames: vec![],
            timestamps: vec![RangeNote {
                time: "0:10 - 0:20".to_string(),
                description: "d".to_string(),
            }],
        };
        let message = Message::assistant_from_answer(&answer);
        assert_eq!(message.content, "A1");
        assert_eq!(
            message.timestamps,
            vec![TimeRange {
                start: "0:10".to_string(),
                end: "0:20".to_string(),
                content: "d".to_string(),
            }]
        );
    }

    #[test]
    fn test_thread_wire_shape_parses() {
        let json = serde_json::json!({
            "id": 12,
            "videoUrl": "3/45/video.mp4",
            "videoTitle": "What is covered here?",
            "lastMessage": "What is covered here?",
            "updatedAt": "2026-03-01T10:15:00+00:00",
            "messageCount": 1,
            "chat_history": [
                { "query": "What is covered here?", "response": null }
            ]
        });
        let thread: ChatThread = serde_json::from_value(json).unwrap();
        assert_eq!(thread.id, 12);
        assert_eq!(thread.title, "What is covered here?");
        assert_eq!(thread.history.len(), 1);
        assert!(thread.history[0].response.is_none());
    }
}
