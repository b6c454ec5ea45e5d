//! Vector store capability.
//!
//! The embedding library and vector database runtime live outside the
//! core; this trait is the seam they plug into. Distances are cosine,
//! in `[0, 2]`.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::RetrievalError;

/// A single vector search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// Document identifier within the store.
    pub id: String,
    /// Document content.
    pub content: String,
    /// Arbitrary metadata stored with the document.
    pub metadata: BTreeMap<String, String>,
    /// Cosine distance from the query, in `[0, 2]`.
    pub distance: f32,
}

impl VectorHit {
    /// Display title: the `title` metadata entry, falling back to the id.
    #[must_use]
    pub fn title(&self) -> &str {
        self.metadata.get("title").map_or(&self.id, String::as_str)
    }
}

/// Capability boundary to an external vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Adds documents to the store.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Vector`] on store failure.
    async fn add_documents(
        &self,
        ids: &[String],
        texts: &[String],
        metadatas: &[BTreeMap<String, String>],
    ) -> Result<(), RetrievalError>;

    /// Searches for the `k` nearest documents to `query`.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Vector`] on store failure.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<VectorHit>, RetrievalError>;
}

/// A vector store that holds nothing. Used when no vector runtime is
/// configured; the retriever then grounds from web evidence alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullVectorStore;

#[async_trait]
impl VectorStore for NullVectorStore {
    async fn add_documents(
        &self,
        _ids: &[String],
        _texts: &[String],
        _metadatas: &[BTreeMap<String, String>],
    ) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<VectorHit>, RetrievalError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_title_prefers_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_string(), "Consensus".to_string());
        let hit = VectorHit {
            id: "doc-1".to_string(),
            content: String::new(),
            metadata,
            distance: 0.3,
        };
        assert_eq!(hit.title(), "Consensus");
    }

    #[test]
    fn test_hit_title_falls_back_to_id() {
        let hit = VectorHit {
            id: "doc-1".to_string(),
            content: String::new(),
            metadata: BTreeMap::new(),
            distance: 0.3,
        };
        assert_eq!(hit.title(), "doc-1");
    }

    #[tokio::test]
    async fn test_null_store_returns_nothing() {
        let store = NullVectorStore;
        let hits = store.search("anything", 5).await;
        assert!(matches!(hits, Ok(h) if h.is_empty()));
    }
}
