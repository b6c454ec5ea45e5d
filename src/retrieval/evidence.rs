//! Per-question evidence assembly.
//!
//! For each research question the retriever fans out one vector and one
//! web sub-query (bounded concurrency), then assembles, deduplicates,
//! ranks, and caps the resulting sources sequentially. Web hits are
//! registered with the run's citation registry. The retriever never
//! fails: sub-query problems become per-question warnings and
//! cancellation returns whatever has been assembled so far.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream;
use serde::Serialize;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CoreConfig;
use crate::error::RetrievalError;
use crate::output::ResearchQuestion;
use crate::retrieval::citation::CitationRegistry;
use crate::retrieval::vector::{VectorHit, VectorStore};
use crate::retrieval::web::{WebHit, WebSearch};

/// Length of the content prefix used for cross-origin deduplication.
const DEDUP_CONTENT_PREFIX: usize = 200;

/// Where a source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    /// Vector store hit.
    Vector,
    /// Web search hit.
    Web,
}

const fn origin_rank(origin: SourceOrigin) -> u8 {
    match origin {
        SourceOrigin::Vector => 0,
        SourceOrigin::Web => 1,
    }
}

/// One evidence source attached to a research question.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRecord {
    /// Origin of the source.
    pub origin: SourceOrigin,
    /// Source title.
    pub title: String,
    /// Source URL (web hits only).
    pub url: Option<String>,
    /// Source content, truncated to the configured cap.
    pub content: String,
    /// Search-engine snippet (web hits only).
    pub snippet: Option<String>,
    /// Citation id assigned at registration (web hits only).
    pub citation_id: Option<String>,
    /// Relevance in `[0, 1]`.
    pub relevance_score: f32,
}

/// A non-fatal retrieval failure, recorded per question.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalWarning {
    /// The question the sub-query belonged to.
    pub question_id: String,
    /// Which sub-query failed.
    pub origin: SourceOrigin,
    /// Failure detail.
    pub message: String,
}

/// The retriever's result: evidence per question, plus warnings.
#[derive(Debug, Default)]
pub struct RetrievedEvidence {
    /// Ranked sources per question id. Every requested question has an
    /// entry, possibly empty.
    pub evidence: BTreeMap<String, Vec<SourceRecord>>,
    /// Sub-query failures.
    pub warnings: Vec<RetrievalWarning>,
}

enum SubQuery {
    Vector(Result<Vec<VectorHit>, RetrievalError>),
    Web(Result<Vec<WebHit>, RetrievalError>),
}

#[derive(Default)]
struct QuestionHits {
    vector: Option<Result<Vec<VectorHit>, RetrievalError>>,
    web: Option<Result<Vec<WebHit>, RetrievalError>>,
}

/// Fans out retrieval queries and assembles per-question evidence.
pub struct EvidenceRetriever {
    web: Arc<dyn WebSearch>,
    vector: Arc<dyn VectorStore>,
    vector_k: usize,
    web_k: usize,
    max_sources: usize,
    content_cap: usize,
    max_concurrency: usize,
}

impl EvidenceRetriever {
    /// Creates a retriever over the given capabilities.
    #[must_use]
    pub fn new(
        web: Arc<dyn WebSearch>,
        vector: Arc<dyn VectorStore>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            web,
            vector,
            vector_k: config.vector_k,
            web_k: config.web_k,
            max_sources: config.max_sources_per_question,
            content_cap: config.evidence_content_cap,
            max_concurrency: config.retrieval_concurrency,
        }
    }

    /// Retrieves evidence for every question.
    ///
    /// Citation registration happens sequentially after the fanout
    /// completes, so the registry sees a deterministic order (question
    /// order, then rank order).
    pub async fn retrieve(
        &self,
        questions: &[ResearchQuestion],
        citations: &mut CitationRegistry,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> RetrievedEvidence {
        let mut raw: BTreeMap<String, QuestionHits> = questions
            .iter()
            .map(|q| (q.id.clone(), QuestionHits::default()))
            .collect();

        let mut tasks: Vec<BoxFuture<'_, (String, SubQuery)>> = Vec::new();
        for question in questions {
            let qid = question.id.clone();
            let text = question.question.clone();
            let vector = Arc::clone(&self.vector);
            let k = self.vector_k;
            tasks.push(Box::pin(async move {
                let result = match timeout_at(deadline, vector.search(&text, k)).await {
                    Ok(result) => result,
                    Err(_) => Err(RetrievalError::Vector {
                        message: "deadline exceeded".to_string(),
                    }),
                };
                (qid, SubQuery::Vector(result))
            }));

            let qid = question.id.clone();
            let text = question.question.clone();
            let web = Arc::clone(&self.web);
            let k = self.web_k;
            tasks.push(Box::pin(async move {
                let result = match timeout_at(deadline, web.search(&text, k)).await {
                    Ok(result) => result,
                    Err(_) => Err(RetrievalError::Web {
                        message: "deadline exceeded".to_string(),
                    }),
                };
                (qid, SubQuery::Web(result))
            }));
        }

        let mut fanout = stream::iter(tasks).buffer_unordered(self.max_concurrency);
        loop {
            tokio::select! {
                next = fanout.next() => {
                    let Some((qid, sub)) = next else { break };
                    if let Some(hits) = raw.get_mut(&qid) {
                        match sub {
                            SubQuery::Vector(result) => hits.vector = Some(result),
                            SubQuery::Web(result) => hits.web = Some(result),
                        }
                    }
                }
                () = cancel.cancelled() => {
                    debug!("retrieval cancelled; assembling partial evidence");
                    break;
                }
            }
        }
        drop(fanout);

        let mut retrieved = RetrievedEvidence::default();
        for question in questions {
            let hits = raw.remove(&question.id).unwrap_or_default();
            let sources = self.assemble(question, hits, citations, &mut retrieved.warnings);
            retrieved.evidence.insert(question.id.clone(), sources);
        }
        retrieved
    }

    fn assemble(
        &self,
        question: &ResearchQuestion,
        hits: QuestionHits,
        citations: &mut CitationRegistry,
        warnings: &mut Vec<RetrievalWarning>,
    ) -> Vec<SourceRecord> {
        let mut sources: Vec<SourceRecord> = Vec::new();

        match hits.vector {
            Some(Ok(vector_hits)) => {
                for hit in vector_hits.into_iter().take(self.vector_k) {
                    sources.push(SourceRecord {
                        origin: SourceOrigin::Vector,
                        title: hit.title().to_string(),
                        url: None,
                        content: cap_chars(&hit.content, self.content_cap),
                        snippet: None,
                        citation_id: None,
                        relevance_score: (1.0 - hit.distance).clamp(0.0, 1.0),
                    });
                }
            }
            Some(Err(error)) => {
                warn!(question = %question.id, %error, "vector sub-query failed");
                warnings.push(RetrievalWarning {
                    question_id: question.id.clone(),
                    origin: SourceOrigin::Vector,
                    message: error.to_string(),
                });
            }
            None => {}
        }

        match hits.web {
            Some(Ok(web_hits)) => {
                for (rank, hit) in web_hits.into_iter().take(self.web_k).enumerate() {
                    let citation_id = citations.register(&hit.title, &hit.url, "web");
                    let body = if hit.content.is_empty() {
                        &hit.snippet
                    } else {
                        &hit.content
                    };
                    let content = cap_chars(body, self.content_cap);
                    sources.push(SourceRecord {
                        origin: SourceOrigin::Web,
                        title: hit.title,
                        url: Some(hit.url),
                        content,
                        snippet: Some(hit.snippet),
                        citation_id: Some(citation_id),
                        relevance_score: rank_weight(rank, self.web_k),
                    });
                }
            }
            Some(Err(error)) => {
                warn!(question = %question.id, %error, "web sub-query failed");
                warnings.push(RetrievalWarning {
                    question_id: question.id.clone(),
                    origin: SourceOrigin::Web,
                    message: error.to_string(),
                });
            }
            None => {}
        }

        let mut sources = dedup(sources);
        sources.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| origin_rank(a.origin).cmp(&origin_rank(b.origin)))
        });
        sources.truncate(self.max_sources);
        sources
    }
}

impl std::fmt::Debug for EvidenceRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceRetriever")
            .field("vector_k", &self.vector_k)
            .field("web_k", &self.web_k)
            .field("max_sources", &self.max_sources)
            .finish_non_exhaustive()
    }
}

/// Position weight for web results: `1 - rank/k`, so the top hit scores
/// 1.0 and relevance decays linearly with rank.
#[allow(clippy::cast_precision_loss)]
fn rank_weight(rank: usize, k: usize) -> f32 {
    if k == 0 {
        return 0.0;
    }
    1.0 - (rank as f32) / (k as f32)
}

fn cap_chars(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}

fn duplicate_of(a: &SourceRecord, b: &SourceRecord) -> bool {
    if a.url.is_some() && a.url == b.url {
        return true;
    }
    a.title == b.title
        && a.content
            .chars()
            .take(DEDUP_CONTENT_PREFIX)
            .eq(b.content.chars().take(DEDUP_CONTENT_PREFIX))
}

/// Collapses duplicates (by URL, and by title + content prefix across
/// origins), keeping the higher-scored record.
fn dedup(sources: Vec<SourceRecord>) -> Vec<SourceRecord> {
    let mut kept: Vec<SourceRecord> = Vec::new();
    for candidate in sources {
        if let Some(existing) = kept.iter_mut().find(|s| duplicate_of(s, &candidate)) {
            if candidate.relevance_score > existing.relevance_score {
                *existing = candidate;
            }
        } else {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Priority, QuestionType};
    use async_trait::async_trait;

    struct StubWeb {
        hits: Vec<WebHit>,
        fail: bool,
    }

    #[async_trait]
    impl WebSearch for StubWeb {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
        ) -> Result<Vec<WebHit>, RetrievalError> {
            if self.fail {
                Err(RetrievalError::Web {
                    message: "unreachable".to_string(),
                })
            } else {
                Ok(self.hits.clone())
            }
        }
    }

    struct StubVector {
        hits: Vec<VectorHit>,
        fail: bool,
    }

    #[async_trait]
    impl VectorStore for StubVector {
        async fn add_documents(
            &self,
            _ids: &[String],
            _texts: &[String],
            _metadatas: &[BTreeMap<String, String>],
        ) -> Result<(), RetrievalError> {
            Ok(())
        }

        async fn search(
            &self,
            _query: &str,
            _k: usize,
        ) -> Result<Vec<VectorHit>, RetrievalError> {
            if self.fail {
                Err(RetrievalError::Vector {
                    message: "store offline".to_string(),
                })
            } else {
                Ok(self.hits.clone())
            }
        }
    }

    fn question(id: &str) -> ResearchQuestion {
        ResearchQuestion {
            id: id.to_string(),
            question: format!("about {id}"),
            question_type: QuestionType::Factual,
            priority: Priority::High,
            estimated_time_minutes: 5,
            dependencies: Vec::new(),
        }
    }

    fn web_hit(url: &str, title: &str, content: &str) -> WebHit {
        WebHit {
            url: url.to_string(),
            title: title.to_string(),
            snippet: content.to_string(),
            content: content.to_string(),
        }
    }

    fn vector_hit(id: &str, title: &str, content: &str, distance: f32) -> VectorHit {
        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_string(), title.to_string());
        VectorHit {
            id: id.to_string(),
            content: content.to_string(),
            metadata,
            distance,
        }
    }

    fn retriever(web: StubWeb, vector: StubVector) -> EvidenceRetriever {
        let config = CoreConfig::builder()
            .build()
            .unwrap_or_else(|_| unreachable!());
        EvidenceRetriever::new(Arc::new(web), Arc::new(vector), &config)
    }

    fn far_deadline() -> Instant {
        Instant::now() + std::time::Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_retrieve_merges_both_origins() {
        let retriever = retriever(
            StubWeb {
                hits: vec![web_hit("https://a.example", "A", "alpha")],
                fail: false,
            },
            StubVector {
                hits: vec![vector_hit("doc-1", "B", "beta", 0.4)],
                fail: false,
            },
        );
        let mut citations = CitationRegistry::new();
        let result = retriever
            .retrieve(
                &[question("rq-1")],
                &mut citations,
                far_deadline(),
                &CancellationToken::new(),
            )
            .await;

        let sources = &result.evidence["rq-1"];
        assert_eq!(sources.len(), 2);
        // Web top hit scores 1.0, vector hit 0.6.
        assert_eq!(sources[0].origin, SourceOrigin::Web);
        assert!((sources[0].relevance_score - 1.0).abs() < f32::EPSILON);
        assert_eq!(sources[0].citation_id.as_deref(), Some("c1"));
        assert_eq!(sources[1].origin, SourceOrigin::Vector);
        assert!((sources[1].relevance_score - 0.6).abs() < 1e-6);
        assert!(result.warnings.is_empty());
        assert_eq!(citations.len(), 1);
    }

    #[tokio::test]
    async fn test_cross_origin_dedup_keeps_higher_score() {
        // Web and vector both surface the same document.
        let retriever = retriever(
            StubWeb {
                hits: vec![web_hit("https://x/y", "Shared Title", "identical content body")],
                fail: false,
            },
            StubVector {
                hits: vec![vector_hit("doc-1", "Shared Title", "identical content body", 0.9)],
                fail: false,
            },
        );
        let mut citations = CitationRegistry::new();
        let result = retriever
            .retrieve(
                &[question("rq-1")],
                &mut citations,
                far_deadline(),
                &CancellationToken::new(),
            )
            .await;

        let sources = &result.evidence["rq-1"];
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].origin, SourceOrigin::Web);
        assert!((sources[0].relevance_score - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_failures_become_warnings_not_errors() {
        let retriever = retriever(
            StubWeb {
                hits: Vec::new(),
                fail: true,
            },
            StubVector {
                hits: Vec::new(),
                fail: true,
            },
        );
        let mut citations = CitationRegistry::new();
        let result = retriever
            .retrieve(
                &[question("rq-1")],
                &mut citations,
                far_deadline(),
                &CancellationToken::new(),
            )
            .await;

        // The question is still present, mapped to an empty list.
        assert!(result.evidence["rq-1"].is_empty());
        assert_eq!(result.warnings.len(), 2);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.origin == SourceOrigin::Web)
        );
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.origin == SourceOrigin::Vector)
        );
    }

    #[tokio::test]
    async fn test_truncates_to_max_sources() {
        let hits = (0..20)
            .map(|i| web_hit(&format!("https://e/{i}"), &format!("T{i}"), &format!("c{i}")))
            .collect();
        let web = StubWeb { hits, fail: false };
        let vector = StubVector {
            hits: Vec::new(),
            fail: false,
        };
        let config = CoreConfig::builder()
            .web_k(20)
            .max_sources_per_question(3)
            .build()
            .unwrap_or_else(|_| unreachable!());
        let retriever = EvidenceRetriever::new(Arc::new(web), Arc::new(vector), &config);
        let mut citations = CitationRegistry::new();
        let result = retriever
            .retrieve(
                &[question("rq-1")],
                &mut citations,
                far_deadline(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.evidence["rq-1"].len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_retrieval_returns_empty_lists() {
        let retriever = retriever(
            StubWeb {
                hits: vec![web_hit("https://a.example", "A", "alpha")],
                fail: false,
            },
            StubVector {
                hits: Vec::new(),
                fail: false,
            },
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut citations = CitationRegistry::new();
        let result = retriever
            .retrieve(&[question("rq-1")], &mut citations, far_deadline(), &cancel)
            .await;
        // Every question keys the map even when nothing completed.
        assert!(result.evidence.contains_key("rq-1"));
    }

    #[test]
    fn test_rank_weight_decays_linearly() {
        assert!((rank_weight(0, 5) - 1.0).abs() < f32::EPSILON);
        assert!((rank_weight(1, 5) - 0.8).abs() < f32::EPSILON);
        assert!((rank_weight(4, 5) - 0.2).abs() < f32::EPSILON);
        assert!((rank_weight(0, 0) - 0.0).abs() < f32::EPSILON);
    }
}
