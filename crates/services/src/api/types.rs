//! Wire types for the remote grading service, mirrored from its documented
//! request/response contracts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use studypact_core::model::{BookId, PromptId, SessionId, SessionTone, Topic, TopicId, UserId};

// ─── Auth ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RegisterIn {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterOut {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserOut {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginIn {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginOut {
    pub token: String,
    pub user_id: UserId,
}

// ─── Ingestion ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct BookIn {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookOut {
    pub book_id: BookId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileUploadOut {
    pub book_id: BookId,
    pub chars: u64,
}

/// Topic generation strategy offered by the ingestion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopicMode {
    #[default]
    Rag,
    Rule,
}

impl TopicMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TopicMode::Rag => "rag",
            TopicMode::Rule => "rule",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateTopicsOut {
    pub created: u32,
    pub topics: Vec<Topic>,
}

// ─── Sessions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionIn {
    pub topic_id: TopicId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<SessionTone>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionOut {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionOut {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateQuestionsOut {
    pub generated: u32,
}

/// One question instance delivered for a session. Ephemeral: held only for
/// the lifetime of the current question, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub prompt_id: PromptId,
    pub question: Option<String>,
    pub prompt_text: Option<String>,
    #[serde(default)]
    pub choices: Vec<String>,
    pub remaining: Option<u32>,
}

impl Prompt {
    /// The displayable question text, whichever field the server filled.
    #[must_use]
    pub fn question_text(&self) -> &str {
        self.question
            .as_deref()
            .or(self.prompt_text.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextQuestionOut {
    pub next: Option<Prompt>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitIn {
    pub prompt_id: PromptId,
    pub answer: String,
    pub reject: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionReasoning {
    pub index: usize,
    pub text: String,
    pub correct: bool,
    pub reason: Option<String>,
}

/// Grading outcome for the last submitted or rejected prompt.
///
/// Every field is optional on the wire; cumulative totals are authoritative
/// when present and must win over any local bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOut {
    pub correct: Option<bool>,
    pub session_score: Option<i64>,
    pub failures: Option<u32>,
    pub correct_index: Option<usize>,
    pub correct_answer: Option<String>,
    pub explanation: Option<String>,
    pub options: Option<Vec<OptionReasoning>>,
    pub mean_comment: Option<String>,
    pub rejected: Option<bool>,
    pub session_rejects: Option<u32>,
    pub remaining: Option<u32>,
    pub session_complete: Option<bool>,
}

impl SubmitOut {
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.rejected.unwrap_or(false)
    }

    #[must_use]
    pub fn is_session_complete(&self) -> bool {
        self.session_complete.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndSessionOut {
    pub session_id: SessionId,
    pub ended_at: DateTime<Utc>,
    pub score: i64,
    pub aggregate: Option<LeaderboardAggregate>,
}

// ─── Leaderboard ───────────────────────────────────────────────────────────────

/// Per-user summary computed and owned by the remote leaderboard service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardAggregate {
    pub user_id: UserId,
    pub best_score: i64,
    pub total_score: i64,
    pub sessions: u32,
    pub updated_at: DateTime<Utc>,
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_prefers_question_over_prompt_text() {
        let prompt = Prompt {
            prompt_id: PromptId::new("p1"),
            question: Some("What is entropy?".into()),
            prompt_text: Some("fallback".into()),
            choices: vec!["a".into(), "b".into()],
            remaining: Some(4),
        };
        assert_eq!(prompt.question_text(), "What is entropy?");
    }

    #[test]
    fn submit_out_tolerates_sparse_payloads() {
        let out: SubmitOut = serde_json::from_str(r#"{"rejected":true,"session_rejects":1}"#).unwrap();
        assert!(out.is_rejected());
        assert!(!out.is_session_complete());
        assert_eq!(out.session_rejects, Some(1));
        assert_eq!(out.session_score, None);
    }

    #[test]
    fn create_session_omits_unset_fields() {
        let body = CreateSessionIn {
            topic_id: TopicId::new("t1"),
            requested_minutes: None,
            tone: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"topic_id":"t1"}"#);
    }
}
