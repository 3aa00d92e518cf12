use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use studypact_core::model::{BookId, SessionId, UserId};

use crate::auth::AuthSession;
use crate::error::ApiError;

use super::types::{
    BookIn, BookOut, CreateSessionIn, CreateSessionOut, EndSessionOut, FileUploadOut,
    GenerateQuestionsOut, GenerateTopicsOut, LeaderboardAggregate, LoginIn, LoginOut,
    NextQuestionOut, Prompt, RegisterIn, RegisterOut, StartSessionOut, SubmitIn, SubmitOut,
    TopicMode, UserOut,
};
use super::{GradingApi, LeaderboardApi, LibraryApi};

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub upload_timeout: Duration,
}

impl ApiConfig {
    /// Read the client configuration from the environment, with local
    /// defaults for development.
    #[must_use]
    pub fn from_env() -> Self {
        let base_url =
            env::var("STUDYPACT_API_URL").unwrap_or_else(|_| "http://localhost:8000".into());
        let timeout = env::var("STUDYPACT_API_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(Duration::from_secs(30), Duration::from_secs);
        Self {
            base_url,
            timeout,
            // Large file uploads get a much longer window.
            upload_timeout: Duration::from_secs(120),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Thin REST client for the grading service.
///
/// Every call attaches the current bearer token. A 401 response forces a
/// logout before the error is surfaced; the sign-in redirect is the front
/// end's concern.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    upload_timeout: Duration,
    auth: Arc<AuthSession>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns `ApiError` when the underlying HTTP client cannot be built.
    pub fn new(config: &ApiConfig, auth: Arc<AuthSession>) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            upload_timeout: config.upload_timeout,
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let request = match self.auth.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            if let Err(e) = self.auth.logout().await {
                warn!(error = %e, "failed to clear auth state after 401");
            }
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ApiError::HttpStatus(status));
        }
        Ok(response.json().await?)
    }

    // ─── Auth ──────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    pub async fn register(&self, body: &RegisterIn) -> Result<RegisterOut, ApiError> {
        self.execute(self.http.post(self.url("/auth/register")).json(body))
            .await
    }

    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures; invalid
    /// credentials surface as `ApiError::Unauthorized`.
    pub async fn login(&self, body: &LoginIn) -> Result<LoginOut, ApiError> {
        self.execute(self.http.post(self.url("/auth/login")).json(body))
            .await
    }

    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    pub async fn current_user(&self) -> Result<UserOut, ApiError> {
        self.execute(self.http.get(self.url("/auth/users/me"))).await
    }
}

#[async_trait]
impl GradingApi for ApiClient {
    async fn create_session(&self, body: &CreateSessionIn) -> Result<CreateSessionOut, ApiError> {
        self.execute(self.http.post(self.url("/sessions/")).json(body))
            .await
    }

    async fn start_session(
        &self,
        session: &SessionId,
        duration_minutes: u32,
    ) -> Result<StartSessionOut, ApiError> {
        self.execute(
            self.http
                .post(self.url(&format!("/sessions/{session}/start")))
                .query(&[("duration_minutes", duration_minutes)]),
        )
        .await
    }

    async fn generate_questions(
        &self,
        session: &SessionId,
        count: u32,
    ) -> Result<GenerateQuestionsOut, ApiError> {
        self.execute(
            self.http
                .post(self.url(&format!("/sessions/{session}/generate_questions")))
                .query(&[("n", count)]),
        )
        .await
    }

    async fn next_question(&self, session: &SessionId) -> Result<Option<Prompt>, ApiError> {
        let out: NextQuestionOut = self
            .execute(
                self.http
                    .get(self.url(&format!("/sessions/{session}/next_question"))),
            )
            .await?;
        Ok(out.next)
    }

    async fn submit(&self, session: &SessionId, body: &SubmitIn) -> Result<SubmitOut, ApiError> {
        self.execute(
            self.http
                .post(self.url(&format!("/sessions/{session}/submit")))
                .json(body),
        )
        .await
    }

    async fn end_session(&self, session: &SessionId) -> Result<EndSessionOut, ApiError> {
        self.execute(self.http.post(self.url(&format!("/sessions/{session}/end"))))
            .await
    }
}

#[async_trait]
impl LibraryApi for ApiClient {
    async fn ingest_book(&self, body: &BookIn) -> Result<BookOut, ApiError> {
        self.execute(self.http.post(self.url("/ingest/book")).json(body))
            .await
    }

    async fn upload_book_file(
        &self,
        title: &str,
        authors: Option<&str>,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<FileUploadOut, ApiError> {
        let mut query = vec![("title", title.to_owned())];
        if let Some(authors) = authors {
            query.push(("authors", authors.to_owned()));
        }
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_owned()));
        self.execute(
            self.http
                .post(self.url("/ingest/file"))
                .timeout(self.upload_timeout)
                .query(&query)
                .multipart(form),
        )
        .await
    }

    async fn generate_topics(
        &self,
        book_id: &BookId,
        mode: TopicMode,
    ) -> Result<GenerateTopicsOut, ApiError> {
        self.execute(
            self.http
                .post(self.url(&format!("/ingest/books/{book_id}/topics")))
                .query(&[("mode", mode.as_str())]),
        )
        .await
    }
}

#[async_trait]
impl LeaderboardApi for ApiClient {
    async fn user_aggregate(&self, user_id: &UserId) -> Result<LeaderboardAggregate, ApiError> {
        self.execute(
            self.http
                .get(self.url(&format!("/leaderboard/aggregate/{user_id}"))),
        )
        .await
    }

    async fn top_aggregates(
        &self,
        limit: u32,
        order_by: &str,
    ) -> Result<Vec<LeaderboardAggregate>, ApiError> {
        self.execute(
            self.http
                .get(self.url("/leaderboard/aggregates"))
                .query(&[("limit", limit.to_string()), ("order_by", order_by.to_owned())]),
        )
        .await
    }
}
