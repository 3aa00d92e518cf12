use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{SessionId, TopicId, UserId};

/// Session configuration axis controlling whether the grading service injects
/// critical commentary after repeated failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTone {
    #[default]
    Neutral,
    Mean,
}

impl SessionTone {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionTone::Neutral => "neutral",
            SessionTone::Mean => "mean",
        }
    }
}

/// Locally tracked record of one quiz session.
///
/// Created when a session is started. `ended_at` and the final counters are
/// written at most once, at session end, from the server's totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub topic_id: TopicId,
    pub topic_title: String,
    pub book_title: String,
    pub tone: SessionTone,
    pub duration_minutes: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub score: Option<i64>,
    pub failures: Option<u32>,
    pub rejects: Option<u32>,
    pub owner_id: UserId,
}

impl SessionRecord {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        topic_id: TopicId,
        topic_title: impl Into<String>,
        book_title: impl Into<String>,
        tone: SessionTone,
        duration_minutes: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            topic_id,
            topic_title: topic_title.into(),
            book_title: book_title.into(),
            tone,
            duration_minutes,
            started_at: Some(started_at),
            ended_at: None,
            score: None,
            failures: None,
            rejects: None,
            owner_id: UserId::new(""),
        }
    }

    /// True once the end-of-session totals have been recorded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
