#![forbid(unsafe_code)]

pub mod api;
pub mod auth;
pub mod book_service;
pub mod error;
pub mod leaderboard;
pub mod resync;
pub mod sessions;

pub use studypact_core::Clock;

pub use api::{ApiClient, ApiConfig, GradingApi, LeaderboardApi, LibraryApi};
pub use auth::{AuthSession, IdentitySubscription};
pub use book_service::BookService;
pub use error::{ApiError, AuthError, BookServiceError, SessionError};
pub use leaderboard::{AggregateOrder, LeaderboardService};
pub use resync::ResyncCoordinator;

pub use sessions::{
    FetchOutcome, RuntimePhase, RuntimeSnapshot, SessionLauncher, SessionOutcome, SessionPlan,
    SessionRuntime, SubmitOutcome, TickOutcome, spawn_countdown,
};
