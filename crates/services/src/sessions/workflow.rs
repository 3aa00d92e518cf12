use std::sync::Arc;

use storage::ScopedStore;
use studypact_core::Clock;
use studypact_core::model::{SessionRecord, SessionTone, TopicId};

use crate::api::{CreateSessionIn, GradingApi};
use crate::error::SessionError;

use super::runtime::SessionRuntime;

/// Everything needed to configure a new quiz session.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub topic_id: TopicId,
    pub topic_title: String,
    pub book_title: String,
    pub tone: SessionTone,
    pub duration_minutes: u32,
    pub question_count: u32,
}

impl SessionPlan {
    /// A 30-minute neutral session with five questions.
    #[must_use]
    pub fn new(
        topic_id: TopicId,
        topic_title: impl Into<String>,
        book_title: impl Into<String>,
    ) -> Self {
        Self {
            topic_id,
            topic_title: topic_title.into(),
            book_title: book_title.into(),
            tone: SessionTone::Neutral,
            duration_minutes: 30,
            question_count: 5,
        }
    }

    #[must_use]
    pub fn with_tone(mut self, tone: SessionTone) -> Self {
        self.tone = tone;
        self
    }

    #[must_use]
    pub fn with_duration_minutes(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_question_count(mut self, count: u32) -> Self {
        self.question_count = count;
        self
    }
}

/// Orchestrates session creation: create, start the server clock, generate
/// questions, record the session locally, and hand back a ready runtime.
#[derive(Clone)]
pub struct SessionLauncher {
    clock: Clock,
    api: Arc<dyn GradingApi>,
    history: Arc<ScopedStore<SessionRecord>>,
}

impl SessionLauncher {
    #[must_use]
    pub fn new(
        clock: Clock,
        api: Arc<dyn GradingApi>,
        history: Arc<ScopedStore<SessionRecord>>,
    ) -> Self {
        Self {
            clock,
            api,
            history,
        }
    }

    /// Set up a session end to end.
    ///
    /// The session record lands in history before the runtime is returned,
    /// so the active-session view can resolve topic and book titles.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` when any setup call or the history insert
    /// fails. Nothing is rolled back server-side; an abandoned session id is
    /// harmless.
    pub async fn launch(&self, plan: &SessionPlan) -> Result<SessionRuntime, SessionError> {
        let created = self
            .api
            .create_session(&CreateSessionIn {
                topic_id: plan.topic_id.clone(),
                requested_minutes: Some(plan.duration_minutes),
                tone: Some(plan.tone),
            })
            .await?;
        let session_id = created.session_id;

        self.api
            .start_session(&session_id, plan.duration_minutes)
            .await?;
        self.api
            .generate_questions(&session_id, plan.question_count)
            .await?;

        self.history
            .add(SessionRecord::new(
                session_id.clone(),
                plan.topic_id.clone(),
                plan.topic_title.clone(),
                plan.book_title.clone(),
                plan.tone,
                plan.duration_minutes,
                self.clock.now(),
            ))
            .await?;

        Ok(SessionRuntime::new(
            session_id,
            plan.duration_minutes,
            Arc::clone(&self.api),
            Arc::clone(&self.history),
        ))
    }
}
