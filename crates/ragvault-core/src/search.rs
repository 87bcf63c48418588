//! Similarity query engine.
//!
//! Runs entirely through the [`Store`] trait and an [`IvfIndex`]; it never
//! mutates either.
//!
//! # Algorithm
//!
//! 1. Validate the request: `limit > 0` when given, query dimension equal
//!    to the index dimension, finite components.
//! 2. Ask the index for candidates. An untrained index answers
//!    [`Candidates::FullScan`] and every stored document is scanned.
//! 3. Fetch candidates from the store in batches of `fetch_batch`. Each
//!    batch is an await point, so dropping the query future cancels the
//!    scan between batches and frees the partial heap.
//! 4. Drop documents that fail the metadata filter, then score the rest by
//!    cosine similarity.
//! 5. Keep the best `limit` matches in a bounded min-heap (or everything
//!    when no limit is given).
//! 6. Return matches sorted by similarity (desc), then id (asc).

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::embedding::{cosine_similarity, validate_embedding};
use crate::error::{EngineError, Result};
use crate::filter::MetadataFilter;
use crate::ivf::{Candidates, IvfIndex};
use crate::models::{Document, DocumentMatch};
use crate::store::Store;

/// Message returned when `limit` is zero or negative.
pub const NON_POSITIVE_LIMIT: &str = "match_count must be positive";

/// Inputs for a single query.
#[derive(Debug, Clone)]
pub struct QueryRequest<'a> {
    pub embedding: &'a [f32],
    pub filter: &'a MetadataFilter,
    /// Maximum number of matches. `None` returns every match.
    pub limit: Option<i64>,
    /// Lists to probe. `None` uses the index default.
    pub probes: Option<usize>,
}

impl<'a> QueryRequest<'a> {
    pub fn new(embedding: &'a [f32], filter: &'a MetadataFilter) -> Self {
        Self {
            embedding,
            filter,
            limit: None,
            probes: None,
        }
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check the request against an index of dimension `dims`.
    /// Returns the limit as a `usize`.
    pub fn validate(&self, dims: usize) -> Result<Option<usize>> {
        let limit = match self.limit {
            Some(n) if n <= 0 => return Err(EngineError::invalid(NON_POSITIVE_LIMIT)),
            Some(n) => Some(usize::try_from(n).unwrap_or(usize::MAX)),
            None => None,
        };
        if self.probes == Some(0) {
            return Err(EngineError::invalid("probes must be >= 1"));
        }
        validate_embedding(self.embedding, dims)?;
        Ok(limit)
    }
}

/// A scored document ordered by rank: higher similarity first, then lower id.
struct Ranked {
    similarity: f32,
    doc: Document,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.doc.id.cmp(&self.doc.id))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// Keeps the best `limit` entries seen so far.
struct TopK {
    limit: Option<usize>,
    heap: BinaryHeap<Reverse<Ranked>>,
}

impl TopK {
    fn new(limit: Option<usize>) -> Self {
        let capacity = limit.unwrap_or(0).min(1024);
        Self {
            limit,
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    fn offer(&mut self, item: Ranked) {
        match self.limit {
            Some(k) if self.heap.len() >= k => {
                if let Some(Reverse(worst)) = self.heap.peek() {
                    if item > *worst {
                        self.heap.pop();
                        self.heap.push(Reverse(item));
                    }
                }
            }
            _ => self.heap.push(Reverse(item)),
        }
    }

    fn into_sorted(self) -> Vec<DocumentMatch> {
        let mut items: Vec<Ranked> = self.heap.into_iter().map(|Reverse(r)| r).collect();
        items.sort_by(|a, b| b.cmp(a));
        items
            .into_iter()
            .map(|r| DocumentMatch {
                id: r.doc.id,
                content: r.doc.content,
                metadata: r.doc.metadata,
                similarity: r.similarity,
            })
            .collect()
    }
}

/// Run a similarity query.
pub async fn query_documents<S: Store + ?Sized>(
    store: &S,
    index: &IvfIndex,
    req: &QueryRequest<'_>,
    fetch_batch: usize,
) -> Result<Vec<DocumentMatch>> {
    let limit = req.validate(index.dims())?;
    let fetch_batch = fetch_batch.max(1);
    let mut top = TopK::new(limit);
    let mut scanned = 0usize;
    let mut mismatched = 0usize;

    let mut consider = |docs: Vec<Document>, top: &mut TopK| {
        scanned += docs.len();
        for doc in docs {
            // A record of another dimension cannot be compared; it is never a match.
            if doc.embedding.len() != req.embedding.len() {
                mismatched += 1;
                continue;
            }
            if !req.filter.matches(&doc.metadata) {
                continue;
            }
            let similarity = cosine_similarity(req.embedding, &doc.embedding);
            top.offer(Ranked { similarity, doc });
        }
    };

    match index.candidates(req.embedding, req.probes) {
        Candidates::Ids(ids) => {
            for batch in ids.chunks(fetch_batch) {
                let docs = store.get_documents(batch).await?;
                consider(docs, &mut top);
            }
        }
        Candidates::FullScan => {
            let mut after: Option<String> = None;
            loop {
                let page = store.scan_documents(after.as_deref(), fetch_batch).await?;
                let Some(last) = page.last() else { break };
                after = Some(last.id.clone());
                let full = page.len() == fetch_batch;
                consider(page, &mut top);
                if !full {
                    break;
                }
            }
        }
    }

    if mismatched > 0 {
        tracing::warn!(mismatched, "skipped stored documents with a different embedding dimension");
    }
    let results = top.into_sorted();
    tracing::debug!(scanned, returned = results.len(), "query complete");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivf::IvfParams;
    use crate::models::Metadata;
    use crate::store::memory::InMemoryStore;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;

    fn doc(id: &str, embedding: Vec<f32>, metadata: serde_json::Value) -> Document {
        Document {
            id: id.to_string(),
            dataset_id: None,
            content: format!("content of {id}"),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            embedding,
            created_at: 0,
        }
    }

    async fn three_docs() -> (InMemoryStore, IvfIndex) {
        let store = InMemoryStore::new();
        let index = IvfIndex::new(2, IvfParams::default());
        for d in [
            doc("doc1", vec![1.0, 0.0], json!({"type": "faq"})),
            doc("doc2", vec![0.0, 1.0], json!({"type": "faq", "lang": "en"})),
            doc("doc3", vec![-1.0, 0.0], json!({"type": "blog"})),
        ] {
            store.put_document(&d).await.unwrap();
            index.insert(&d.id, &d.embedding);
        }
        (store, index)
    }

    #[tokio::test]
    async fn test_limit_two_orders_by_similarity() {
        let (store, index) = three_docs().await;
        let any = MetadataFilter::any();
        let req = QueryRequest::new(&[1.0, 0.0], &any).limit(2);
        let results = query_documents(&store, &index, &req, 256).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "doc1");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(results[1].id, "doc2");
        assert!(results[1].similarity.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_no_limit_returns_all_sorted() {
        let (store, index) = three_docs().await;
        let any = MetadataFilter::any();
        let req = QueryRequest::new(&[1.0, 0.0], &any);
        let results = query_documents(&store, &index, &req, 1).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["doc1", "doc2", "doc3"]);
        assert!((results[2].similarity + 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_non_positive_limit_rejected() {
        let (store, index) = three_docs().await;
        let any = MetadataFilter::any();
        for limit in [0, -1, i64::MIN] {
            let req = QueryRequest::new(&[1.0, 0.0], &any).limit(limit);
            let err = query_documents(&store, &index, &req, 256).await.unwrap_err();
            assert!(matches!(err, EngineError::InvalidArgument(ref m) if m == NON_POSITIVE_LIMIT));
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let store = InMemoryStore::new();
        let index = IvfIndex::new(1536, IvfParams::default());
        let any = MetadataFilter::any();
        let query = vec![0.1f32; 1537];
        let req = QueryRequest::new(&query, &any);
        let err = query_documents(&store, &index, &req, 256).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch { expected: 1536, actual: 1537 }
        ));
    }

    #[tokio::test]
    async fn test_documents_of_other_dimension_never_match() {
        let (store, index) = three_docs().await;
        store
            .put_document(&doc("drift", vec![1.0, 0.0, 0.0], json!({"type": "faq"})))
            .await
            .unwrap();

        let any = MetadataFilter::any();
        let results = query_documents(&store, &index, &QueryRequest::new(&[1.0, 0.0], &any), 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|m| m.id != "drift"));
    }

    #[tokio::test]
    async fn test_large_magnitude_embeddings_rank_by_direction() {
        let store = InMemoryStore::new();
        let index = IvfIndex::new(2, IvfParams::default());
        for d in [
            doc("big", vec![1e20, 1e20], json!({})),
            doc("unit", vec![1.0, 1.0], json!({})),
            doc("off", vec![1.0, 0.0], json!({})),
        ] {
            store.put_document(&d).await.unwrap();
        }

        let any = MetadataFilter::any();
        let results = query_documents(&store, &index, &QueryRequest::new(&[1e20, 1e20], &any), 8)
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["big", "unit", "off"]);
        for m in &results {
            assert!((-1.0..=1.0).contains(&m.similarity), "{} scored {}", m.id, m.similarity);
        }
        assert!((results[1].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_filter_applies_containment() {
        let (store, index) = three_docs().await;
        let f: Metadata = json!({"type": "faq"}).as_object().cloned().unwrap();
        let faq = MetadataFilter::new(f);
        let req = QueryRequest::new(&[-1.0, 0.0], &faq);
        let ids: Vec<String> = query_documents(&store, &index, &req, 256)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, ["doc2", "doc1"]);

        let f: Metadata = json!({"type": "faq", "lang": "fr"}).as_object().cloned().unwrap();
        let none = MetadataFilter::new(f);
        let req = QueryRequest::new(&[-1.0, 0.0], &none);
        assert!(query_documents(&store, &index, &req, 256).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty() {
        let store = InMemoryStore::new();
        let index = IvfIndex::new(2, IvfParams::default());
        let any = MetadataFilter::any();
        let req = QueryRequest::new(&[1.0, 0.0], &any).limit(5);
        assert!(query_documents(&store, &index, &req, 256).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_break_by_id() {
        let store = InMemoryStore::new();
        let index = IvfIndex::new(2, IvfParams::default());
        for id in ["b", "c", "a"] {
            store.put_document(&doc(id, vec![1.0, 1.0], json!({}))).await.unwrap();
        }
        let any = MetadataFilter::any();
        let req = QueryRequest::new(&[1.0, 1.0], &any).limit(2);
        let ids: Vec<String> = query_documents(&store, &index, &req, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_random_queries_are_ranged_and_sorted() {
        let mut rng = StdRng::seed_from_u64(11);
        let store = InMemoryStore::new();
        let index = IvfIndex::new(8, IvfParams::default());
        for i in 0..200 {
            let v: Vec<f32> = (0..8).map(|_| rng.random_range(-1.0..1.0)).collect();
            store
                .put_document(&doc(&format!("d{i:03}"), v, json!({})))
                .await
                .unwrap();
        }
        let any = MetadataFilter::any();
        for _ in 0..20 {
            let q: Vec<f32> = (0..8).map(|_| rng.random_range(-1.0..1.0)).collect();
            let req = QueryRequest::new(&q, &any).limit(25);
            let results = query_documents(&store, &index, &req, 64).await.unwrap();
            assert_eq!(results.len(), 25);
            for m in &results {
                assert!((-1.0..=1.0).contains(&m.similarity));
            }
            for pair in results.windows(2) {
                assert!(pair[0].similarity >= pair[1].similarity);
            }

            // The bounded heap agrees with a full sort.
            let all = query_documents(&store, &index, &QueryRequest::new(&q, &any), 64)
                .await
                .unwrap();
            let expected: Vec<&str> = all.iter().take(25).map(|m| m.id.as_str()).collect();
            let got: Vec<&str> = results.iter().map(|m| m.id.as_str()).collect();
            assert_eq!(got, expected);
        }
    }
}
