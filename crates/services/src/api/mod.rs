mod client;
mod types;

pub use client::{ApiClient, ApiConfig};
pub use types::{
    BookIn, BookOut, CreateSessionIn, CreateSessionOut, EndSessionOut, FileUploadOut,
    GenerateQuestionsOut, GenerateTopicsOut, LeaderboardAggregate, LoginIn, LoginOut,
    NextQuestionOut, OptionReasoning, Prompt, RegisterIn, RegisterOut, StartSessionOut, SubmitIn,
    SubmitOut, TopicMode, UserOut,
};

use async_trait::async_trait;

use studypact_core::model::{BookId, SessionId, UserId};

use crate::error::ApiError;

/// Session-facing surface of the remote grading service.
#[async_trait]
pub trait GradingApi: Send + Sync {
    /// Create a session for a topic.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn create_session(&self, body: &CreateSessionIn) -> Result<CreateSessionOut, ApiError>;

    /// Start the session clock server-side.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn start_session(
        &self,
        session: &SessionId,
        duration_minutes: u32,
    ) -> Result<StartSessionOut, ApiError>;

    /// Ask the service to generate questions for the session.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn generate_questions(
        &self,
        session: &SessionId,
        count: u32,
    ) -> Result<GenerateQuestionsOut, ApiError>;

    /// Fetch the next prompt, or `None` when the session has run dry.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn next_question(&self, session: &SessionId) -> Result<Option<Prompt>, ApiError>;

    /// Submit (or reject) an answer for grading.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn submit(&self, session: &SessionId, body: &SubmitIn) -> Result<SubmitOut, ApiError>;

    /// Terminate the session and collect the final score.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn end_session(&self, session: &SessionId) -> Result<EndSessionOut, ApiError>;
}

/// Ingestion-facing surface: books and topic generation.
#[async_trait]
pub trait LibraryApi: Send + Sync {
    /// Ingest a book from raw text.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn ingest_book(&self, body: &BookIn) -> Result<BookOut, ApiError>;

    /// Upload a book file for ingestion.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn upload_book_file(
        &self,
        title: &str,
        authors: Option<&str>,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<FileUploadOut, ApiError>;

    /// Generate topics for a previously ingested book.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn generate_topics(
        &self,
        book_id: &BookId,
        mode: TopicMode,
    ) -> Result<GenerateTopicsOut, ApiError>;
}

/// Leaderboard reads.
#[async_trait]
pub trait LeaderboardApi: Send + Sync {
    /// One user's aggregate standing.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn user_aggregate(&self, user_id: &UserId) -> Result<LeaderboardAggregate, ApiError>;

    /// Ranked aggregates across users.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    async fn top_aggregates(
        &self,
        limit: u32,
        order_by: &str,
    ) -> Result<Vec<LeaderboardAggregate>, ApiError>;
}
