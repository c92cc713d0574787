// ---------------------------------------------------------------------------
// SharedStore — one corpus, many concurrent callers
// ---------------------------------------------------------------------------
//
// Wraps an ImageStore in `Arc<Mutex<..>>` and encodes the locking
// discipline: structural mutation and persistence serialize through the
// mutex, while model inference always runs outside it. An add interleaves
// as snapshot-under-lock -> embed -> reacquire-and-append, so a slow
// embedding backend never blocks readers. Persistence stays
// last-writer-wins; a mutation triggered by an abandoned search still
// completes and is still persisted.
// ---------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::EngineError;
use crate::model::{EmbeddingModel, ProgressSink};
use crate::query;
use crate::similarity::normalized;
use crate::store::ImageStore;
use crate::types::{Query, QueryResult};

#[derive(Clone)]
pub struct SharedStore {
	inner: Arc<Mutex<ImageStore>>,
}

impl SharedStore {
	pub fn new(store: ImageStore) -> Self {
		Self {
			inner: Arc::new(Mutex::new(store)),
		}
	}

	fn lock(&self) -> MutexGuard<'_, ImageStore> {
		// A poisoned mutex means another caller panicked mid-mutation;
		// the store state itself is still a valid snapshot.
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}

	pub fn has(&self, path: &Path) -> bool {
		self.lock().has(path)
	}

	pub fn get_path_for_id(&self, id: &str) -> Option<PathBuf> {
		self.lock().get_path_for_id(id).map(|p| p.to_path_buf())
	}

	pub fn save(&self) -> Result<(), EngineError> {
		self.lock().save()
	}

	pub fn cleanup_missing(&self, force: bool) -> Result<usize, EngineError> {
		self.lock().cleanup_missing(force)
	}

	/// Add images with model inference outside the lock. The lock is held
	/// to decide which paths are new, released for embedding, and
	/// reacquired to append and persist; paths added concurrently in the
	/// gap are skipped by the append.
	pub fn add_images(
		&self,
		model: &dyn EmbeddingModel,
		paths: &[PathBuf],
		progress: &dyn ProgressSink,
	) -> Result<usize, EngineError> {
		let missing: Vec<PathBuf> = {
			let store = self.lock();
			if store.is_read_only() {
				return Err(EngineError::ReadOnly("store was opened read-only".into()));
			}
			paths
				.iter()
				.filter(|p| !store.has(p))
				.cloned()
				.collect()
		};
		if missing.is_empty() {
			return Ok(0);
		}

		// Inference runs unlocked; queries proceed against the old corpus.
		let path_refs: Vec<&Path> = missing.iter().map(|p| p.as_path()).collect();
		let embeddings = model.embed_images(&path_refs, progress)?;

		let mut store = self.lock();
		let added = store.add_images_precomputed(&missing, &embeddings)?;
		store.save()?;
		Ok(added)
	}

	/// Search with text-term embedding computed outside the lock. Cache
	/// misses are embedded unlocked, then appended and persisted before
	/// the query executes against a consistent snapshot.
	pub fn search_images(
		&self,
		model: &dyn EmbeddingModel,
		query: &Query,
		progress: &dyn ProgressSink,
	) -> Result<Vec<QueryResult>, EngineError> {
		let misses: Vec<String> = {
			let store = self.lock();
			query
				.texts
				.iter()
				.filter(|t| store.text_embedding_cached(t).is_none())
				.cloned()
				.collect()
		};

		let mut computed = Vec::with_capacity(misses.len());
		for text in &misses {
			computed.push(normalized(&model.embed_text(text)?));
		}

		let mut store = self.lock();
		for (text, embedding) in misses.iter().zip(&computed) {
			store.add_text_precomputed(text, embedding)?;
		}
		if !misses.is_empty() {
			store.save()?;
		}
		query::search_images(&mut store, model, query, progress)
	}
}
