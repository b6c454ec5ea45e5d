//! Citation registry: run-scoped, URL-deduplicated source records.
//!
//! The grounder registers every web source it retrieves; the judge's
//! artifact sections reference these ids. One registry exists per run
//! and is mutated sequentially by the grounder only.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

/// A registered source, stable for the lifetime of the run.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// Run-unique identifier (`c1`, `c2`, ...).
    pub id: String,
    /// Source title.
    pub title: String,
    /// Source URL, when the source has one.
    pub url: Option<String>,
    /// Date the source was accessed.
    pub accessed_date: NaiveDate,
    /// Authors, when known.
    pub authors: Option<Vec<String>>,
    /// Publication date, when known.
    pub publication_date: Option<String>,
    /// Origin kind (`web`, `vector`).
    pub source_type: String,
}

/// Registry of citations for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CitationRegistry {
    citations: Vec<Citation>,
    #[serde(skip)]
    by_url: HashMap<String, usize>,
}

impl CitationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source and returns its citation id. Re-registering a
    /// URL returns the existing id.
    pub fn register(&mut self, title: &str, url: &str, source_type: &str) -> String {
        if let Some(&index) = self.by_url.get(url) {
            return self.citations[index].id.clone();
        }
        let id = format!("c{}", self.citations.len() + 1);
        self.by_url.insert(url.to_string(), self.citations.len());
        self.citations.push(Citation {
            id: id.clone(),
            title: title.to_string(),
            url: Some(url.to_string()),
            accessed_date: Utc::now().date_naive(),
            authors: None,
            publication_date: None,
            source_type: source_type.to_string(),
        });
        id
    }

    /// Looks up a citation by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Citation> {
        self.citations.iter().find(|c| c.id == id)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All citations in registration order.
    #[must_use]
    pub fn all(&self) -> &[Citation] {
        &self.citations
    }

    /// Number of registered citations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.citations.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}
