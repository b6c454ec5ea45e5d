//! Evidence retrieval for the grounder: web-search and vector-store
//! fanout, per-question evidence assembly, and citation tracking.
//!
//! The web and vector backends are capabilities ([`WebSearch`],
//! [`VectorStore`]); the retriever owns fanout, ranking, deduplication,
//! and truncation, and never fails — sub-query problems become
//! per-question [`RetrievalWarning`]s.

pub mod citation;
pub mod evidence;
pub mod vector;
pub mod web;

pub use citation::{Citation, CitationRegistry};
pub use evidence::{
    EvidenceRetriever, RetrievalWarning, RetrievedEvidence, SourceOrigin, SourceRecord,
};
pub use vector::{NullVectorStore, VectorHit, VectorStore};
pub use web::{DdgSearch, WebHit, WebSearch};
