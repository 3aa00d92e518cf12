use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use storage::ScopedStore;
use studypact_core::model::{SessionId, SessionRecord};

use crate::api::{GradingApi, LeaderboardAggregate, Prompt, SubmitIn, SubmitOut};
use crate::error::SessionError;

use super::view::RuntimeSnapshot;

/// Ticks a tone comment stays on screen (5 seconds at the 1 Hz drive).
const COMMENT_TICKS: u8 = 5;

/// Where the runtime is in the life of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimePhase {
    /// A question fetch is pending or about to be issued.
    Loading,
    /// A prompt is live and waiting for an answer.
    AwaitingAnswer,
    /// The last submission has been graded; waiting for the user to advance.
    Graded,
    /// No questions left. The user must explicitly finish.
    Complete,
    /// The end-session call has begun. Terminal.
    Ending,
}

/// One countdown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Seconds remaining after this tick.
    Running(u32),
    /// The countdown just hit zero. Reported exactly once.
    Expired,
    /// The countdown is not running: unstarted, already expired, or ending.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A prompt was delivered and is now awaiting an answer.
    Delivered,
    /// The service has no further questions for this session.
    NoMoreQuestions,
    /// Another fetch was already in flight; this call did nothing.
    Dropped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The server graded the submission.
    Graded(SubmitOut),
    /// A submission was already in flight or already graded; this call did
    /// nothing.
    Dropped,
}

/// What the results view renders once a session has ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub topic_title: String,
    pub book_title: String,
    pub score: i64,
    pub answered: u32,
    pub failures: u32,
    pub rejects: u32,
    pub ended_at: Option<DateTime<Utc>>,
    pub aggregate: Option<LeaderboardAggregate>,
    /// False when the end call failed and the totals are local fallbacks.
    pub synced: bool,
}

#[derive(Debug)]
struct RuntimeState {
    phase: RuntimePhase,
    started: bool,
    seconds_left: u32,
    expired: bool,
    prompt: Option<Prompt>,
    selected: Option<usize>,
    last_result: Option<SubmitOut>,
    score: i64,
    failures: u32,
    rejects: u32,
    answered: u32,
    remaining: Option<u32>,
    mean_comment: Option<String>,
    comment_ticks: u8,
    complete: bool,
    fetching: bool,
    submitting: bool,
    ending: bool,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            phase: RuntimePhase::Loading,
            started: false,
            seconds_left: 0,
            expired: false,
            prompt: None,
            selected: None,
            last_result: None,
            score: 0,
            failures: 0,
            rejects: 0,
            answered: 0,
            remaining: None,
            mean_comment: None,
            comment_ticks: 0,
            complete: false,
            fetching: false,
            submitting: false,
            ending: false,
        }
    }
}

/// Drives one quiz session from question delivery through scoring to
/// termination.
///
/// The runtime reconciles a 1 Hz countdown with asynchronous, possibly
/// failing network calls. Within one session at most one fetch, one submit,
/// and one end call are ever in flight; a same-kind call while one is pending
/// is dropped, not queued. Cumulative counters shown to the user come from
/// the server's response payloads; local bookkeeping is only the fallback
/// when the terminating call fails.
#[derive(Clone)]
pub struct SessionRuntime {
    session_id: SessionId,
    duration_minutes: u32,
    api: Arc<dyn GradingApi>,
    history: Arc<ScopedStore<SessionRecord>>,
    state: Arc<Mutex<RuntimeState>>,
}

impl SessionRuntime {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        duration_minutes: u32,
        api: Arc<dyn GradingApi>,
        history: Arc<ScopedStore<SessionRecord>>,
    ) -> Self {
        Self {
            session_id,
            duration_minutes,
            api,
            history,
            state: Arc::new(Mutex::new(RuntimeState::new())),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Arm the countdown at `duration_minutes * 60` seconds.
    ///
    /// One-shot: the initializing path may fire more than once, only the
    /// first call arms a timer. Returns false on repeat calls.
    pub fn start(&self) -> bool {
        let mut s = self.lock();
        if s.started {
            return false;
        }
        s.started = true;
        s.seconds_left = self.duration_minutes * 60;
        true
    }

    /// Advance the countdown by one second.
    ///
    /// `Expired` is reported exactly once; after that (and as soon as ending
    /// begins) the countdown is `Halted`. The caller reacts to `Expired` by
    /// invoking [`end`](Self::end).
    pub fn tick(&self) -> TickOutcome {
        let mut s = self.lock();

        if s.comment_ticks > 0 {
            s.comment_ticks -= 1;
            if s.comment_ticks == 0 {
                s.mean_comment = None;
            }
        }

        if !s.started || s.ending || s.expired {
            return TickOutcome::Halted;
        }
        if s.seconds_left == 0 {
            s.expired = true;
            return TickOutcome::Expired;
        }

        s.seconds_left -= 1;
        if s.seconds_left == 0 {
            s.expired = true;
            TickOutcome::Expired
        } else {
            TickOutcome::Running(s.seconds_left)
        }
    }

    /// Request the next prompt for the session.
    ///
    /// An empty response marks the session complete without ending it; the
    /// user finishes explicitly. On failure the runtime stays in `Loading`
    /// and the guard is released so the caller can retry.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Api` when the fetch fails. Recoverable.
    pub async fn fetch_next(&self) -> Result<FetchOutcome, SessionError> {
        {
            let mut s = self.lock();
            if s.fetching {
                return Ok(FetchOutcome::Dropped);
            }
            s.fetching = true;
            s.phase = RuntimePhase::Loading;
        }

        let result = self.api.next_question(&self.session_id).await;

        let mut s = self.lock();
        s.fetching = false;
        match result {
            Ok(Some(prompt)) => {
                if let Some(remaining) = prompt.remaining {
                    s.remaining = Some(remaining);
                }
                s.prompt = Some(prompt);
                s.phase = RuntimePhase::AwaitingAnswer;
                Ok(FetchOutcome::Delivered)
            }
            Ok(None) => {
                s.complete = true;
                s.prompt = None;
                s.phase = RuntimePhase::Complete;
                Ok(FetchOutcome::NoMoreQuestions)
            }
            Err(e) => Err(SessionError::Api(e)),
        }
    }

    /// Submit an answer, or reject the prompt when `reject` is set.
    ///
    /// Valid only while a prompt is awaiting an answer and nothing has been
    /// graded yet; anything else is dropped. The selected choice index is
    /// recorded before the round trip for immediate feedback, but every
    /// cumulative counter is taken from the server's response. On failure the
    /// runtime rolls back to a retryable awaiting-answer state with counters
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Api` when the submit call fails. Recoverable.
    pub async fn submit(&self, answer: &str, reject: bool) -> Result<SubmitOutcome, SessionError> {
        let prompt_id = {
            let mut s = self.lock();
            if s.submitting || s.last_result.is_some() {
                return Ok(SubmitOutcome::Dropped);
            }
            let Some(prompt) = &s.prompt else {
                return Ok(SubmitOutcome::Dropped);
            };
            let prompt_id = prompt.prompt_id.clone();
            s.submitting = true;
            if !reject {
                s.selected = answer.parse::<usize>().ok();
            }
            prompt_id
        };

        let body = SubmitIn {
            prompt_id,
            answer: answer.to_owned(),
            reject,
        };
        let result = self.api.submit(&self.session_id, &body).await;

        let mut s = self.lock();
        match result {
            Ok(out) => {
                s.answered += 1;
                if let Some(remaining) = out.remaining {
                    s.remaining = Some(remaining);
                }
                if out.is_rejected() {
                    s.rejects = out.session_rejects.unwrap_or(s.rejects + 1);
                } else {
                    if let Some(score) = out.session_score {
                        s.score = score;
                    }
                    if let Some(failures) = out.failures {
                        s.failures = failures;
                    }
                    if let Some(comment) = out.mean_comment.clone() {
                        s.mean_comment = Some(comment);
                        s.comment_ticks = COMMENT_TICKS;
                    }
                }
                if out.is_session_complete() {
                    s.complete = true;
                }
                s.phase = RuntimePhase::Graded;
                s.last_result = Some(out.clone());
                Ok(SubmitOutcome::Graded(out))
            }
            Err(e) => {
                s.submitting = false;
                s.phase = RuntimePhase::AwaitingAnswer;
                Err(SessionError::Api(e))
            }
        }
    }

    /// Clear the last result and move on: fetch the next prompt, or, when
    /// the session is already complete, just clear the displayed prompt
    /// without a network call.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Api` when the follow-up fetch fails.
    pub async fn advance(&self) -> Result<FetchOutcome, SessionError> {
        let fetch_needed = {
            let mut s = self.lock();
            s.last_result = None;
            s.selected = None;
            s.submitting = false;
            if s.complete {
                s.prompt = None;
                s.phase = RuntimePhase::Complete;
                false
            } else {
                true
            }
        };

        if fetch_needed {
            self.fetch_next().await
        } else {
            Ok(FetchOutcome::NoMoreQuestions)
        }
    }

    /// Terminate the session. Idempotent: concurrent triggers (timer expiry,
    /// manual end, finish button) execute the remote call at most once, and
    /// the countdown halts as soon as the first trigger lands.
    ///
    /// Always yields an outcome for the results view. When the remote call
    /// fails (e.g. the server already ended the session), the outcome carries
    /// the locally accumulated totals instead of failing. Returns `None` only
    /// for the dropped duplicate triggers.
    pub async fn end(&self) -> Option<SessionOutcome> {
        let (answered, failures, rejects, local_score) = {
            let mut s = self.lock();
            if s.ending {
                return None;
            }
            s.ending = true;
            s.phase = RuntimePhase::Ending;
            (s.answered, s.failures, s.rejects, s.score)
        };

        let (topic_title, book_title) = self
            .history
            .get(self.session_id.as_str())
            .map_or_else(
                || ("Unknown Topic".to_owned(), "Unknown Book".to_owned()),
                |r| (r.topic_title, r.book_title),
            );

        match self.api.end_session(&self.session_id).await {
            Ok(out) => {
                let persisted = self
                    .history
                    .update(self.session_id.as_str(), |r| {
                        r.ended_at = Some(out.ended_at);
                        r.score = Some(out.score);
                        r.failures = Some(failures);
                        r.rejects = Some(rejects);
                    })
                    .await;
                if let Err(e) = persisted {
                    warn!(session = %self.session_id, error = %e, "failed to persist session end");
                }

                Some(SessionOutcome {
                    session_id: self.session_id.clone(),
                    topic_title,
                    book_title,
                    score: out.score,
                    answered,
                    failures,
                    rejects,
                    ended_at: Some(out.ended_at),
                    aggregate: out.aggregate,
                    synced: true,
                })
            }
            Err(e) => {
                // Likely already ended server-side; the user still gets a
                // results view from the local totals.
                warn!(session = %self.session_id, error = %e, "end call failed, using local totals");
                Some(SessionOutcome {
                    session_id: self.session_id.clone(),
                    topic_title,
                    book_title,
                    score: local_score,
                    answered,
                    failures,
                    rejects,
                    ended_at: None,
                    aggregate: None,
                    synced: false,
                })
            }
        }
    }

    /// A consistent copy of the displayable state.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let s = self.lock();
        RuntimeSnapshot {
            phase: s.phase,
            seconds_left: s.seconds_left,
            duration_secs: self.duration_minutes * 60,
            prompt: s.prompt.clone(),
            selected: s.selected,
            last_result: s.last_result.clone(),
            score: s.score,
            failures: s.failures,
            rejects: s.rejects,
            answered: s.answered,
            remaining: s.remaining,
            mean_comment: s.mean_comment.clone(),
            complete: s.complete,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drive the 1 Hz countdown on a background task, ending the session when it
/// expires.
///
/// Spawn after [`SessionRuntime::start`]. Resolves to the end outcome on
/// expiry, or `None` once the countdown halts because the session ended
/// through another path.
pub fn spawn_countdown(runtime: SessionRuntime) -> tokio::task::JoinHandle<Option<SessionOutcome>> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.tick().await;
        loop {
            interval.tick().await;
            match runtime.tick() {
                TickOutcome::Running(_) => {}
                TickOutcome::Expired => return runtime.end().await,
                TickOutcome::Halted => return None,
            }
        }
    })
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
