use std::sync::Arc;

use storage::ScopedStore;
use studypact_core::Clock;
use studypact_core::model::{Book, BookId, Topic};

use crate::api::{BookIn, LibraryApi, TopicMode};
use crate::error::BookServiceError;

/// Book upload and topic generation, backed by the user-scoped book cache.
#[derive(Clone)]
pub struct BookService {
    clock: Clock,
    api: Arc<dyn LibraryApi>,
    books: Arc<ScopedStore<Book>>,
}

impl BookService {
    #[must_use]
    pub fn new(clock: Clock, api: Arc<dyn LibraryApi>, books: Arc<ScopedStore<Book>>) -> Self {
        Self { clock, api, books }
    }

    /// Ingest a book from pasted text and track it locally.
    ///
    /// # Errors
    ///
    /// Returns `BookServiceError` when the ingest call or the local insert
    /// fails.
    pub async fn ingest_text(
        &self,
        title: impl Into<String>,
        authors: Option<String>,
        raw_text: String,
    ) -> Result<Book, BookServiceError> {
        let title = title.into();
        let out = self
            .api
            .ingest_book(&BookIn {
                title: title.clone(),
                authors: authors.clone(),
                raw_text: Some(raw_text),
            })
            .await?;

        let book = Book::new(out.book_id, title, authors, self.clock.now());
        Ok(self.books.add(book).await?)
    }

    /// Upload a book file and track it locally.
    ///
    /// # Errors
    ///
    /// Returns `BookServiceError` when the upload or the local insert fails.
    pub async fn upload_file(
        &self,
        title: impl Into<String>,
        authors: Option<String>,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Book, BookServiceError> {
        let title = title.into();
        let out = self
            .api
            .upload_book_file(&title, authors.as_deref(), file_name, bytes)
            .await?;

        let book = Book::new(out.book_id, title, authors, self.clock.now());
        Ok(self.books.add(book).await?)
    }

    /// Generate topics for a book and patch them into the cached record.
    ///
    /// # Errors
    ///
    /// Returns `BookServiceError` when the generation call or the local
    /// update fails.
    pub async fn generate_topics(
        &self,
        book_id: &BookId,
        mode: TopicMode,
    ) -> Result<Vec<Topic>, BookServiceError> {
        let out = self.api.generate_topics(book_id, mode).await?;
        self.books
            .update(book_id.as_str(), |book| book.topics = out.topics.clone())
            .await?;
        Ok(out.topics)
    }

    /// The active user's books, newest first.
    #[must_use]
    pub fn books(&self) -> Vec<Book> {
        self.books.view()
    }

    #[must_use]
    pub fn get(&self, book_id: &BookId) -> Option<Book> {
        self.books.get(book_id.as_str())
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use storage::MemoryBlobStore;
    use studypact_core::model::{TopicId, UserId};
    use studypact_core::time::fixed_clock;

    use crate::api::{BookOut, FileUploadOut, GenerateTopicsOut};
    use crate::error::ApiError;

    #[derive(Default)]
    struct FakeLibrary {
        ingested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LibraryApi for FakeLibrary {
        async fn ingest_book(&self, body: &BookIn) -> Result<BookOut, ApiError> {
            self.ingested.lock().unwrap().push(body.title.clone());
            Ok(BookOut {
                book_id: BookId::new("b1"),
            })
        }

        async fn upload_book_file(
            &self,
            _title: &str,
            _authors: Option<&str>,
            _file_name: &str,
            bytes: Vec<u8>,
        ) -> Result<FileUploadOut, ApiError> {
            Ok(FileUploadOut {
                book_id: BookId::new("b2"),
                chars: bytes.len() as u64,
            })
        }

        async fn generate_topics(
            &self,
            _book_id: &BookId,
            _mode: TopicMode,
        ) -> Result<GenerateTopicsOut, ApiError> {
            let topics = vec![Topic {
                id: TopicId::new("t1"),
                title: "Thermodynamics".into(),
            }];
            Ok(GenerateTopicsOut {
                created: 1,
                topics,
            })
        }
    }

    async fn service() -> BookService {
        let books = Arc::new(
            ScopedStore::load("books", Arc::new(MemoryBlobStore::new()) as _)
                .await
                .unwrap(),
        );
        books.set_active(Some(UserId::new("u1")));
        BookService::new(fixed_clock(), Arc::new(FakeLibrary::default()), books)
    }

    #[tokio::test]
    async fn ingest_tracks_the_book_for_the_active_user() {
        let service = service().await;
        let book = service
            .ingest_text("Physics 101", None, "heat is work".into())
            .await
            .unwrap();

        assert_eq!(book.owner_id, UserId::new("u1"));
        assert!(book.topics.is_empty());
        assert_eq!(service.books().len(), 1);
        assert_eq!(service.get(&BookId::new("b1")).unwrap().title, "Physics 101");
    }

    #[tokio::test]
    async fn generated_topics_are_patched_in_place() {
        let service = service().await;
        service
            .ingest_text("Physics 101", None, "heat is work".into())
            .await
            .unwrap();

        let topics = service
            .generate_topics(&BookId::new("b1"), TopicMode::Rag)
            .await
            .unwrap();
        assert_eq!(topics.len(), 1);

        let cached = service.get(&BookId::new("b1")).unwrap();
        assert_eq!(cached.topics, topics);
    }

    #[tokio::test]
    async fn upload_preserves_author_metadata() {
        let service = service().await;
        let book = service
            .upload_file("Chemistry 201", Some("Pauling".into()), "chem.pdf", vec![1, 2])
            .await
            .unwrap();

        assert_eq!(book.book_id, BookId::new("b2"));
        assert_eq!(book.authors.as_deref(), Some("Pauling"));
    }
}
