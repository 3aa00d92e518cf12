use std::sync::Arc;

use tracing::debug;

use studypact_core::model::UserId;

use crate::api::{LeaderboardAggregate, LeaderboardApi};
use crate::error::ApiError;

/// Ordering axis for ranked aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregateOrder {
    #[default]
    Best,
    Total,
}

impl AggregateOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateOrder::Best => "best",
            AggregateOrder::Total => "total",
        }
    }
}

/// Leaderboard reads. Aggregates are computed and owned by the remote
/// service; this layer only fetches them.
#[derive(Clone)]
pub struct LeaderboardService {
    api: Arc<dyn LeaderboardApi>,
}

impl LeaderboardService {
    #[must_use]
    pub fn new(api: Arc<dyn LeaderboardApi>) -> Self {
        Self { api }
    }

    /// One user's standing. Read-type query: retried once on a transient
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` when the call (and its single retry) fails.
    pub async fn user_aggregate(
        &self,
        user_id: &UserId,
    ) -> Result<LeaderboardAggregate, ApiError> {
        match self.api.user_aggregate(user_id).await {
            Err(e) if e.is_transient() => {
                debug!(user = %user_id, error = %e, "aggregate fetch failed, retrying once");
                self.api.user_aggregate(user_id).await
            }
            other => other,
        }
    }

    /// Ranked aggregates across users.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport or server failures.
    pub async fn top(
        &self,
        limit: u32,
        order: AggregateOrder,
    ) -> Result<Vec<LeaderboardAggregate>, ApiError> {
        self.api.top_aggregates(limit, order.as_str()).await
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use studypact_core::time::fixed_now;

    fn aggregate(user: &str) -> LeaderboardAggregate {
        LeaderboardAggregate {
            user_id: UserId::new(user),
            best_score: 40,
            total_score: 90,
            sessions: 3,
            updated_at: fixed_now(),
        }
    }

    #[derive(Default)]
    struct FlakyApi {
        calls: AtomicU32,
        failures_before_success: Mutex<u32>,
        terminal: Mutex<Option<ApiError>>,
    }

    #[async_trait]
    impl LeaderboardApi for FlakyApi {
        async fn user_aggregate(
            &self,
            user_id: &UserId,
        ) -> Result<LeaderboardAggregate, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.terminal.lock().unwrap().take() {
                return Err(e);
            }
            let mut left = self.failures_before_success.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(ApiError::HttpStatus(reqwest::StatusCode::BAD_GATEWAY));
            }
            Ok(aggregate(user_id.as_str()))
        }

        async fn top_aggregates(
            &self,
            limit: u32,
            _order_by: &str,
        ) -> Result<Vec<LeaderboardAggregate>, ApiError> {
            Ok((0..limit.min(2))
                .map(|i| aggregate(&format!("u{i}")))
                .collect())
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_exactly_once() {
        let api = Arc::new(FlakyApi::default());
        *api.failures_before_success.lock().unwrap() = 1;
        let service = LeaderboardService::new(Arc::clone(&api) as _);

        let standing = service.user_aggregate(&UserId::new("u1")).await.unwrap();
        assert_eq!(standing.best_score, 40);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_transient_failure_gives_up_after_the_retry() {
        let api = Arc::new(FlakyApi::default());
        *api.failures_before_success.lock().unwrap() = 2;
        let service = LeaderboardService::new(Arc::clone(&api) as _);

        assert!(service.user_aggregate(&UserId::new("u1")).await.is_err());
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_failures_are_not_retried() {
        let api = Arc::new(FlakyApi::default());
        *api.terminal.lock().unwrap() = Some(ApiError::Unauthorized);
        let service = LeaderboardService::new(Arc::clone(&api) as _);

        assert!(matches!(
            service.user_aggregate(&UserId::new("u1")).await,
            Err(ApiError::Unauthorized)
        ));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn top_respects_the_requested_order() {
        let api = Arc::new(FlakyApi::default());
        let service = LeaderboardService::new(api as _);
        let rows = service.top(2, AggregateOrder::Total).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
