// ---------------------------------------------------------------------------
// Shard aggregator
// ---------------------------------------------------------------------------
//
// A corpus split into immutable shard snapshots plus at most one editable
// shard. Terms are resolved once, the resolved (vector-only) query fans
// out to every shard, and the per-shard top results are merged into one
// globally ranked, paginated page. Mutation only ever reaches the
// editable shard.
// ---------------------------------------------------------------------------

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::browse::browse_order;
use crate::error::EngineError;
use crate::model::{EmbeddingModel, ProgressSink};
use crate::query::search_images;
use crate::similarity::normalized;
use crate::store::ImageStore;
use crate::types::{Query, QueryResult, SortOrder};

pub struct ShardedStore {
	/// Immutable snapshot shards (no content hashes, reject mutation).
	shards: Vec<ImageStore>,
	/// The one shard that accepts `add_images`.
	editable: Option<ImageStore>,
}

impl ShardedStore {
	pub fn new(shards: Vec<ImageStore>, editable: Option<ImageStore>) -> Self {
		Self { shards, editable }
	}

	/// Total record count across all shards.
	pub fn len(&self) -> usize {
		self.all_shards().map(|s| s.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.all_shards().all(|s| s.is_empty())
	}

	fn all_shards(&self) -> impl Iterator<Item = &ImageStore> {
		self.shards.iter().chain(self.editable.iter())
	}

	pub fn has(&self, path: &Path) -> bool {
		self.all_shards().any(|s| s.has(path))
	}

	pub fn get_path_for_id(&self, id: &str) -> Option<&Path> {
		self.all_shards().find_map(|s| s.get_path_for_id(id))
	}

	fn embedding_for_id(&self, id: &str) -> Option<&[f32]> {
		self.all_shards().find_map(|s| s.embedding_for_id(id))
	}

	/// Route an add to the editable shard. Without one, the whole sharded
	/// corpus is immutable.
	pub fn add_images(
		&mut self,
		model: &dyn EmbeddingModel,
		paths: &[PathBuf],
		progress: &dyn ProgressSink,
	) -> Result<(Vec<PathBuf>, Vec<Vec<f32>>), EngineError> {
		match self.editable.as_mut() {
			Some(editable) => editable.add_images(model, paths, progress),
			None => Err(EngineError::ReadOnly(
				"sharded store has no editable shard".into(),
			)),
		}
	}

	pub fn save(&self) -> Result<(), EngineError> {
		if let Some(editable) = &self.editable {
			editable.save()?;
		}
		Ok(())
	}

	/// Resolve the query once, fan it out to every shard, and merge the
	/// per-shard rankings into one globally paginated page.
	pub fn search_images(
		&mut self,
		model: &dyn EmbeddingModel,
		query: &Query,
		progress: &dyn ProgressSink,
	) -> Result<Vec<QueryResult>, EngineError> {
		if query.weights.len() != query.term_count() {
			return Err(EngineError::WeightMismatch {
				terms: query.term_count(),
				weights: query.weights.len(),
			});
		}

		let resolved = self.resolve(model, query)?;
		if resolved.vectors.is_empty() {
			return Ok(Vec::new());
		}

		// Every shard answers its own top `offset + limit` by similarity;
		// browsing order is applied once, after the merge.
		let per_shard = Query {
			texts: Vec::new(),
			image_ids: Vec::new(),
			vectors: resolved.vectors,
			weights: resolved.weights,
			offset: 0,
			limit: query.offset.saturating_add(query.limit),
			order: SortOrder::Similarity,
			..query.clone()
		};

		let mut merged = Vec::new();
		let shard_count = self.shards.len() + usize::from(self.editable.is_some());
		let mut searched = 0usize;
		for shard in self.shards.iter_mut().chain(self.editable.as_mut()) {
			merged.extend(search_images(shard, model, &per_shard, progress)?);
			searched += 1;
			progress.report("searching shards", searched as f32 / shard_count.max(1) as f32);
		}

		merged.sort_by(|a, b| {
			b.similarity
				.partial_cmp(&a.similarity)
				.unwrap_or(Ordering::Equal)
		});
		let start = query.offset.min(merged.len());
		let end = query.offset.saturating_add(query.limit).min(merged.len());
		let mut page: Vec<QueryResult> = merged[start..end].to_vec();

		if query.order == SortOrder::SemanticPage {
			let embeddings: Vec<Vec<f32>> = page
				.iter()
				.map(|r| {
					self.embedding_for_id(&r.id)
						.map(|e| e.to_vec())
						.unwrap_or_default()
				})
				.collect();
			let order = browse_order(&embeddings);
			page = order.into_iter().map(|i| page[i].clone()).collect();
		}

		Ok(page)
	}

	fn resolve(
		&mut self,
		model: &dyn EmbeddingModel,
		query: &Query,
	) -> Result<ResolvedQuery, EngineError> {
		let mut vectors = Vec::with_capacity(query.term_count());
		let mut weights = Vec::with_capacity(query.term_count());
		let mut weight_iter = query.weights.iter().copied();

		for text in &query.texts {
			let weight = weight_iter.next().unwrap_or_default();
			// The editable shard carries the text cache; without one the
			// model is asked directly and nothing is cached.
			let vector = match self.editable.as_mut() {
				Some(editable) => editable.get_text_embedding(model, text)?,
				None => normalized(&model.embed_text(text)?),
			};
			vectors.push(vector);
			weights.push(weight);
		}

		for id in &query.image_ids {
			let weight = weight_iter.next().unwrap_or_default();
			match self.embedding_for_id(id) {
				Some(embedding) => {
					vectors.push(embedding.to_vec());
					weights.push(weight);
				}
				None => {
					tracing::debug!(id, "dropping query term for unknown image id");
				}
			}
		}

		for vector in &query.vectors {
			let weight = weight_iter.next().unwrap_or_default();
			vectors.push(normalized(vector));
			weights.push(weight);
		}

		Ok(ResolvedQuery { vectors, weights })
	}
}

struct ResolvedQuery {
	vectors: Vec<Vec<f32>>,
	weights: Vec<f32>,
}
