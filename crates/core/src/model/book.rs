use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BookId, TopicId, UserId};

/// A study topic generated from a book. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub title: String,
}

/// A locally tracked book, created when an upload or ingest call succeeds.
///
/// `topics` is replaced in place when topic generation succeeds. Books are
/// never deleted individually; their lifecycle ends when the owning user's
/// data is cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: BookId,
    pub title: String,
    pub authors: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub topics: Vec<Topic>,
    pub owner_id: UserId,
}

impl Book {
    /// A freshly ingested book with no topics yet.
    ///
    /// The owner stamp is provisional; the scoped store re-stamps it with the
    /// active identity on insert.
    #[must_use]
    pub fn new(
        book_id: BookId,
        title: impl Into<String>,
        authors: Option<String>,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            book_id,
            title: title.into(),
            authors,
            uploaded_at,
            topics: Vec::new(),
            owner_id: UserId::new(""),
        }
    }
}
