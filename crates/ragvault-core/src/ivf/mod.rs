//! Inverted-file (IVF) index over document embeddings.
//!
//! The embedding space is partitioned into `L` clusters ("lists"), each
//! with a unit-length centroid and a set of member document ids. A query
//! probes the `P` lists whose centroids are most similar to the query
//! vector and only those members become candidates.
//!
//! # Generations
//!
//! The centroid table and its lists form an immutable-shape
//! [`IndexGeneration`] published through an [`ArcSwap`]. Readers grab the
//! current generation without locking; inserts lock only the target
//! list. A rebuild trains a new generation off to the side and publishes it
//! with a single pointer swap, so a query sees either the old or the new
//! index, never a mix.
//!
//! Writes that land while a rebuild is training are recorded in a journal
//! and replayed onto the new generation just before the swap. The journal
//! lock is held across the swap, which is what makes the hand-over exact.
//!
//! # Persistence
//!
//! Centroids and each document's list number are persisted by the store.
//! [`IvfIndex::insert`] reports where a document landed and
//! [`IndexGeneration::members`] lists every placement, so reopening a store
//! rebuilds the lists from ids alone. Only documents without a placement
//! for the persisted generation need their embeddings re-read.
//!
//! # Degraded mode
//!
//! An untrained generation has no lists. [`IvfIndex::candidates`] then
//! returns [`Candidates::FullScan`] and the query engine scans the store,
//! so results never depend on the index having been built.

pub mod kmeans;

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::embedding::validate_embedding;
use crate::error::{EngineError, Result};

/// Index tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfParams {
    /// Fixed list count. `None` picks `ceil(sqrt(N))` at training time.
    pub lists: Option<usize>,
    /// Upper bound for the automatic list count.
    pub max_lists: usize,
    /// Default number of lists probed per query.
    pub probes: usize,
    pub max_iterations: usize,
    /// Training uses at most this many vectors, sampled uniformly.
    pub sample_size: usize,
    pub seed: u64,
    /// An untrained index asks for a rebuild once this many documents exist.
    pub min_train_size: usize,
    /// A trained index asks for a rebuild once the corpus grows past
    /// `trained_size * rebuild_growth_factor`.
    pub rebuild_growth_factor: f64,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            lists: None,
            max_lists: 1024,
            probes: 4,
            max_iterations: 25,
            sample_size: 50_000,
            seed: 42,
            min_train_size: 64,
            rebuild_growth_factor: 2.0,
        }
    }
}

impl IvfParams {
    /// List count to train for a corpus of `n` vectors.
    pub fn lists_for(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let target = self
            .lists
            .unwrap_or_else(|| ((n as f64).sqrt().ceil() as usize).min(self.max_lists));
        target.clamp(1, n)
    }
}

/// Result of candidate generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidates {
    /// The index cannot narrow the search; every stored document is a candidate.
    FullScan,
    /// Members of the probed lists.
    Ids(Vec<String>),
}

/// Outcome of [`IvfIndex::restore`].
#[derive(Debug, Clone, PartialEq)]
pub struct Restored {
    pub stats: IndexStats,
    /// Placements computed for documents that had none persisted.
    pub placed: Vec<(String, usize)>,
}

/// Summary of the current generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub generation: u64,
    pub lists: usize,
    pub indexed: usize,
    /// Corpus size the centroids were trained on.
    pub trained_size: usize,
    pub smallest_list: usize,
    pub largest_list: usize,
}

/// One published version of the index.
#[derive(Debug)]
pub struct IndexGeneration {
    generation: u64,
    centroids: Vec<Vec<f32>>,
    lists: Vec<RwLock<HashSet<String>>>,
    trained_size: usize,
}

impl IndexGeneration {
    fn untrained(generation: u64) -> Self {
        Self {
            generation,
            centroids: Vec::new(),
            lists: Vec::new(),
            trained_size: 0,
        }
    }

    fn with_centroids(generation: u64, centroids: Vec<Vec<f32>>, trained_size: usize) -> Self {
        let lists = centroids.iter().map(|_| RwLock::new(HashSet::new())).collect();
        Self {
            generation,
            centroids,
            lists,
            trained_size,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn assign(&self, id: &str, vector: &[f32]) -> Option<usize> {
        if !self.is_trained() {
            return None;
        }
        let list = kmeans::nearest_centroid(vector, &self.centroids);
        self.lists[list].write().insert(id.to_string());
        Some(list)
    }

    fn remove(&self, id: &str) {
        for list in &self.lists {
            if list.read().contains(id) {
                list.write().remove(id);
                return;
            }
        }
    }

    fn candidates(&self, query: &[f32], probes: usize) -> Candidates {
        if !self.is_trained() {
            return Candidates::FullScan;
        }
        let probes = probes.clamp(1, self.centroids.len());
        let mut ids = Vec::new();
        for list in kmeans::nearest_centroids(query, &self.centroids, probes) {
            ids.extend(self.lists[list].read().iter().cloned());
        }
        Candidates::Ids(ids)
    }

    /// `(document_id, list_no)` for every indexed document.
    pub fn members(&self) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        for (list_no, list) in self.lists.iter().enumerate() {
            out.extend(list.read().iter().map(|id| (id.clone(), list_no)));
        }
        out
    }

    /// List number holding `id`, if any.
    pub fn list_of(&self, id: &str) -> Option<usize> {
        self.lists.iter().position(|l| l.read().contains(id))
    }

    fn stats(&self) -> IndexStats {
        let sizes: Vec<usize> = self.lists.iter().map(|l| l.read().len()).collect();
        IndexStats {
            generation: self.generation,
            lists: sizes.len(),
            indexed: sizes.iter().sum(),
            trained_size: self.trained_size,
            smallest_list: sizes.iter().copied().min().unwrap_or(0),
            largest_list: sizes.iter().copied().max().unwrap_or(0),
        }
    }
}

enum JournalOp {
    Insert(String, Vec<f32>),
    Remove(String),
}

/// The IVF index. Cheap to share behind an `Arc`; all methods take `&self`.
pub struct IvfIndex {
    dims: usize,
    params: IvfParams,
    current: ArcSwap<IndexGeneration>,
    /// `Some` while a rebuild is in flight.
    journal: Mutex<Option<Vec<JournalOp>>>,
}

impl IvfIndex {
    /// An empty, untrained index for vectors of dimension `dims`.
    pub fn new(dims: usize, params: IvfParams) -> Self {
        Self {
            dims,
            params,
            current: ArcSwap::from_pointee(IndexGeneration::untrained(0)),
            journal: Mutex::new(None),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn params(&self) -> &IvfParams {
        &self.params
    }

    /// The currently published generation.
    pub fn snapshot(&self) -> Arc<IndexGeneration> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    pub fn is_trained(&self) -> bool {
        self.current.load().is_trained()
    }

    pub fn stats(&self) -> IndexStats {
        self.current.load().stats()
    }

    /// Whether a rebuild is worthwhile for a corpus of `doc_count` documents.
    pub fn needs_rebuild(&self, doc_count: usize) -> bool {
        let current = self.current.load();
        if !current.is_trained() {
            return doc_count >= self.params.min_train_size.max(1);
        }
        doc_count as f64 > current.trained_size as f64 * self.params.rebuild_growth_factor
    }

    /// Add a document to the list of its nearest centroid. Returns the
    /// `(generation, list_no)` it landed in, or `None` while untrained.
    pub fn insert(&self, id: &str, vector: &[f32]) -> Option<(u64, usize)> {
        let current = {
            let mut journal = self.journal.lock();
            if let Some(ops) = journal.as_mut() {
                ops.push(JournalOp::Insert(id.to_string(), vector.to_vec()));
            }
            self.current.load_full()
        };
        current
            .assign(id, vector)
            .map(|list| (current.generation, list))
    }

    pub fn remove(&self, id: &str) {
        let current = {
            let mut journal = self.journal.lock();
            if let Some(ops) = journal.as_mut() {
                ops.push(JournalOp::Remove(id.to_string()));
            }
            self.current.load_full()
        };
        current.remove(id);
    }

    /// Candidate ids for `query`, probing `probes` lists (default from params).
    pub fn candidates(&self, query: &[f32], probes: Option<usize>) -> Candidates {
        self.current
            .load()
            .candidates(query, probes.unwrap_or(self.params.probes))
    }

    /// Start a rebuild. Fails with [`EngineError::IndexUnavailable`] if one
    /// is already running. Dropping the guard without publishing abandons
    /// the rebuild and leaves the current generation in place.
    pub fn begin_rebuild(&self) -> Result<RebuildGuard<'_>> {
        let mut journal = self.journal.lock();
        if journal.is_some() {
            return Err(EngineError::IndexUnavailable(
                "a rebuild is already in progress".to_string(),
            ));
        }
        *journal = Some(Vec::new());
        Ok(RebuildGuard {
            index: self,
            active: true,
        })
    }

    /// Train a fresh generation from `(id, embedding)` pairs.
    ///
    /// Pure CPU work; nothing is published. An empty input yields an
    /// untrained generation.
    pub fn train(&self, generation: u64, vectors: &[(String, Vec<f32>)]) -> Result<IndexGeneration> {
        for (_, v) in vectors {
            validate_embedding(v, self.dims)?;
        }
        let k = self.params.lists_for(vectors.len());
        if k == 0 {
            return Ok(IndexGeneration::untrained(generation));
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let sample: Vec<&[f32]> = if vectors.len() > self.params.sample_size.max(k) {
            rand::seq::index::sample(&mut rng, vectors.len(), self.params.sample_size.max(k))
                .into_iter()
                .map(|i| vectors[i].1.as_slice())
                .collect()
        } else {
            vectors.iter().map(|(_, v)| v.as_slice()).collect()
        };

        let result = kmeans::kmeans(&sample, k, self.params.max_iterations, &mut rng)?;
        tracing::info!(
            generation,
            lists = k,
            vectors = vectors.len(),
            sampled = sample.len(),
            iterations = result.iterations,
            "trained IVF centroids"
        );

        let next = IndexGeneration::with_centroids(generation, result.centroids, vectors.len());
        for (id, v) in vectors {
            next.assign(id, v);
        }
        Ok(next)
    }

    /// Build a generation around previously persisted centroids.
    ///
    /// `members` are persisted `(document_id, list_no)` placements for this
    /// generation and are trusted as-is. `unplaced` documents are assigned
    /// to their nearest centroid and returned in [`Restored::placed`] so the
    /// caller can persist them.
    pub fn restore(
        &self,
        generation: u64,
        centroids: Vec<Vec<f32>>,
        members: &[(String, usize)],
        unplaced: &[(String, Vec<f32>)],
    ) -> Result<Restored> {
        if let Some(bad) = centroids.iter().find(|c| c.len() != self.dims) {
            return Err(EngineError::IndexUnavailable(format!(
                "persisted centroids have dimension {}, engine expects {}",
                bad.len(),
                self.dims
            )));
        }
        if let Some((id, list)) = members.iter().find(|(_, l)| *l >= centroids.len()) {
            return Err(EngineError::IndexUnavailable(format!(
                "document {id} is placed in list {list}, but generation {generation} has {} lists",
                centroids.len()
            )));
        }

        let trained_size = members.len() + unplaced.len();
        let next = if centroids.is_empty() {
            IndexGeneration::untrained(generation)
        } else {
            IndexGeneration::with_centroids(generation, centroids, trained_size)
        };
        for (id, list) in members {
            next.lists[*list].write().insert(id.clone());
        }
        let placed = unplaced
            .iter()
            .filter_map(|(id, v)| next.assign(id, v).map(|list| (id.clone(), list)))
            .collect();

        let stats = next.stats();
        self.current.store(Arc::new(next));
        Ok(Restored { stats, placed })
    }
}

/// Exclusive handle on an in-flight rebuild.
pub struct RebuildGuard<'a> {
    index: &'a IvfIndex,
    active: bool,
}

impl RebuildGuard<'_> {
    /// Replay journaled writes onto `next` and make it the current generation.
    pub fn publish(mut self, next: IndexGeneration) -> IndexStats {
        let mut journal = self.index.journal.lock();
        let ops = journal.take().unwrap_or_default();
        let replayed = ops.len();
        for op in ops {
            match op {
                JournalOp::Insert(id, v) => {
                    next.assign(&id, &v);
                }
                JournalOp::Remove(id) => next.remove(&id),
            }
        }
        let stats = next.stats();
        self.index.current.store(Arc::new(next));
        self.active = false;
        drop(journal);

        tracing::info!(
            generation = stats.generation,
            lists = stats.lists,
            indexed = stats.indexed,
            replayed,
            "published IVF generation"
        );
        stats
    }
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            *self.index.journal.lock() = None;
            tracing::warn!("IVF rebuild abandoned; keeping current generation");
        }
    }
}
