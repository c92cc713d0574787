// ---------------------------------------------------------------------------
// ImageStore — the embedding corpus
// ---------------------------------------------------------------------------
//
// Owns the indexed image records and the text-embedding cache, all sharing
// one embedding dimensionality fixed at construction. Append-mostly:
// records leave the corpus only through `cleanup_missing` or an explicit
// `remove_by_id`. One store instance exclusively owns its in-memory state
// and its persisted file.
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::hash::content_hash;
use crate::model::{EmbeddingModel, NoProgress, ProgressSink};
use crate::paths::{absolutize, PathPolicy};
use crate::persistence;
use crate::similarity::normalized;
use crate::types::{ImageRecord, TextCacheEntry};

/// Extensions accepted by `add_images_recursively`.
const IMAGE_EXTENSIONS: &[&str] = &[
	"jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff", "heic",
];

/// Fraction of the corpus `cleanup_missing` may remove without `force`.
const CLEANUP_SAFETY_THRESHOLD: f32 = 0.25;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoreConfig {
	/// Persisted store file. `None` keeps the store memory-only.
	pub store_file: Option<PathBuf>,
	/// Tag of the embedding model/configuration producing the vectors.
	pub identifier: String,
	/// Refuse all mutation and skip saving.
	pub read_only: bool,
	/// Load a store written by a different model identifier anyway.
	pub ignore_identifier_mismatch: bool,
	pub path_policy: PathPolicy,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			store_file: None,
			identifier: "default".to_string(),
			read_only: false,
			ignore_identifier_mismatch: false,
			path_policy: PathPolicy::default(),
		}
	}
}

// ---------------------------------------------------------------------------
// ImageStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ImageStore {
	config: StoreConfig,
	dimension: usize,
	images: Vec<ImageRecord>,
	/// Policy key of each record's path -> index into `images`.
	path_index: HashMap<String, usize>,
	text_cache: Vec<TextCacheEntry>,
	/// Case-sensitive text -> index into `text_cache`.
	text_index: HashMap<String, usize>,
}

impl ImageStore {
	/// Create an empty store with a fixed embedding dimensionality.
	pub fn new(config: StoreConfig, dimension: usize) -> Self {
		Self {
			config,
			dimension,
			images: Vec::new(),
			path_index: HashMap::new(),
			text_cache: Vec::new(),
			text_index: HashMap::new(),
		}
	}

	/// Open a store: load the configured file when it exists, otherwise
	/// start empty. Loading upgrades older schema versions in memory and
	/// reports the one-time upgrade work through `progress`.
	pub fn open(
		config: StoreConfig,
		dimension: usize,
		progress: &dyn ProgressSink,
	) -> Result<Self, EngineError> {
		let mut store = Self::new(config, dimension);
		if let Some(file) = store.config.store_file.clone() {
			if file.exists() {
				let loaded = persistence::load_store_file(
					&file,
					&store.config.identifier,
					store.config.ignore_identifier_mismatch,
					progress,
				)?;
				store.install(loaded.images, loaded.texts)?;
				tracing::info!(
					file = %file.display(),
					images = store.images.len(),
					texts = store.text_cache.len(),
					"loaded store"
				);
			}
		}
		Ok(store)
	}

	/// Build a store from prebuilt records, e.g. a bulk-imported snapshot
	/// that will serve as an immutable shard.
	pub fn with_records(
		config: StoreConfig,
		dimension: usize,
		images: Vec<ImageRecord>,
		texts: Vec<TextCacheEntry>,
	) -> Result<Self, EngineError> {
		let mut store = Self::new(config, dimension);
		store.install(images, texts)?;
		Ok(store)
	}

	fn install(
		&mut self,
		images: Vec<ImageRecord>,
		texts: Vec<TextCacheEntry>,
	) -> Result<(), EngineError> {
		for record in &images {
			if record.embedding.len() != self.dimension {
				return Err(EngineError::DimensionMismatch {
					expected: self.dimension,
					found: record.embedding.len(),
				});
			}
		}
		for entry in &texts {
			if entry.embedding.len() != self.dimension {
				return Err(EngineError::DimensionMismatch {
					expected: self.dimension,
					found: entry.embedding.len(),
				});
			}
		}
		self.images = images;
		self.text_cache = texts;
		self.rebuild_indexes();
		Ok(())
	}

	fn rebuild_indexes(&mut self) {
		self.path_index = self
			.images
			.iter()
			.enumerate()
			.map(|(i, r)| (self.config.path_policy.key(&r.path), i))
			.collect();
		self.text_index = self
			.text_cache
			.iter()
			.enumerate()
			.map(|(i, t)| (t.text.clone(), i))
			.collect();
	}

	// -- Accessors ----------------------------------------------------------

	pub fn len(&self) -> usize {
		self.images.len()
	}

	pub fn is_empty(&self) -> bool {
		self.images.is_empty()
	}

	pub fn text_cache_len(&self) -> usize {
		self.text_cache.len()
	}

	pub fn dimension(&self) -> usize {
		self.dimension
	}

	pub fn path_policy(&self) -> PathPolicy {
		self.config.path_policy
	}

	pub fn records(&self) -> &[ImageRecord] {
		&self.images
	}

	/// A store is read-only when configured so, or when it carries records
	/// without any content hashes (legacy and shard snapshots).
	pub fn is_read_only(&self) -> bool {
		self.config.read_only
			|| (!self.images.is_empty()
				&& self.images.iter().all(|r| r.content_hash.is_empty()))
	}

	/// Exact-path membership under the configured path policy.
	pub fn has(&self, path: &Path) -> bool {
		match absolutize(path) {
			Ok(abs) => self
				.path_index
				.contains_key(&self.config.path_policy.key(&abs)),
			Err(_) => false,
		}
	}

	pub fn get_path_for_id(&self, id: &str) -> Option<&Path> {
		self.images
			.iter()
			.find(|r| r.id == id)
			.map(|r| r.path.as_path())
	}

	pub fn get_ids_for_paths(&self, paths: &[PathBuf]) -> Vec<String> {
		paths
			.iter()
			.filter_map(|p| {
				let abs = absolutize(p).ok()?;
				let idx = *self.path_index.get(&self.config.path_policy.key(&abs))?;
				Some(self.images[idx].id.clone())
			})
			.collect()
	}

	pub fn embedding_for_id(&self, id: &str) -> Option<&[f32]> {
		self.images
			.iter()
			.find(|r| r.id == id)
			.map(|r| r.embedding.as_slice())
	}

	pub fn embedding_for_path(&self, path: &Path) -> Option<&[f32]> {
		let abs = absolutize(path).ok()?;
		let idx = *self.path_index.get(&self.config.path_policy.key(&abs))?;
		Some(self.images[idx].embedding.as_slice())
	}

	/// Cached text embedding, if any. Lookup is case-sensitive.
	pub fn text_embedding_cached(&self, text: &str) -> Option<&[f32]> {
		let idx = *self.text_index.get(text)?;
		Some(self.text_cache[idx].embedding.as_slice())
	}

	// -- Mutation -----------------------------------------------------------

	fn ensure_writable(&self) -> Result<(), EngineError> {
		if self.config.read_only {
			return Err(EngineError::ReadOnly("store was opened read-only".into()));
		}
		if self.is_read_only() {
			return Err(EngineError::ReadOnly(
				"store has no content hashes and cannot be extended".into(),
			));
		}
		Ok(())
	}

	fn check_dimension(&self, embedding: &[f32]) -> Result<(), EngineError> {
		if embedding.len() != self.dimension {
			return Err(EngineError::DimensionMismatch {
				expected: self.dimension,
				found: embedding.len(),
			});
		}
		Ok(())
	}

	/// Append images whose embeddings were already computed. Paths already
	/// present are skipped; nothing is persisted. Returns how many records
	/// were appended.
	pub fn add_images_precomputed(
		&mut self,
		paths: &[PathBuf],
		embeddings: &[Vec<f32>],
	) -> Result<usize, EngineError> {
		self.ensure_writable()?;
		let mut added = 0;
		for (path, embedding) in paths.iter().zip(embeddings) {
			self.check_dimension(embedding)?;
			let abs = absolutize(path)?;
			let key = self.config.path_policy.key(&abs);
			if self.path_index.contains_key(&key) {
				continue;
			}
			let record = ImageRecord {
				id: Uuid::new_v4().to_string(),
				path: abs.clone(),
				content_hash: content_hash(&abs)?,
				embedding: normalized(embedding),
			};
			self.path_index.insert(key, self.images.len());
			self.images.push(record);
			added += 1;
		}
		Ok(added)
	}

	/// Embed and append the given images, skipping paths already present,
	/// then persist. Returns the paths actually added along with their
	/// normalized embeddings.
	pub fn add_images(
		&mut self,
		model: &dyn EmbeddingModel,
		paths: &[PathBuf],
		progress: &dyn ProgressSink,
	) -> Result<(Vec<PathBuf>, Vec<Vec<f32>>), EngineError> {
		self.ensure_writable()?;

		let mut missing = Vec::new();
		for path in paths {
			let abs = absolutize(path)?;
			if !self.has(&abs) {
				missing.push(abs);
			}
		}
		if missing.is_empty() {
			return Ok((Vec::new(), Vec::new()));
		}

		let path_refs: Vec<&Path> = missing.iter().map(|p| p.as_path()).collect();
		let embeddings = model.embed_images(&path_refs, progress)?;
		if embeddings.len() != missing.len() {
			return Err(EngineError::ModelUnavailable(format!(
				"model returned {} embeddings for {} images",
				embeddings.len(),
				missing.len()
			)));
		}

		let added = self.add_images_precomputed(&missing, &embeddings)?;
		tracing::info!(added, total = self.images.len(), "added images to store");
		self.save()?;

		let normalized_embeddings = embeddings.iter().map(|e| normalized(e)).collect();
		Ok((missing, normalized_embeddings))
	}

	/// Append a text-cache entry with an already-computed embedding.
	/// Existing keys are left untouched; nothing is persisted.
	pub fn add_text_precomputed(
		&mut self,
		text: &str,
		embedding: &[f32],
	) -> Result<(), EngineError> {
		self.check_dimension(embedding)?;
		if self.text_index.contains_key(text) {
			return Ok(());
		}
		self.text_index.insert(text.to_string(), self.text_cache.len());
		self.text_cache.push(TextCacheEntry {
			text: text.to_string(),
			embedding: normalized(embedding),
		});
		Ok(())
	}

	/// Embed a text, cache it, persist, and return the normalized vector.
	pub fn add_text(
		&mut self,
		model: &dyn EmbeddingModel,
		text: &str,
	) -> Result<Vec<f32>, EngineError> {
		let embedding = model.embed_text(text)?;
		self.add_text_precomputed(text, &embedding)?;
		self.save()?;
		Ok(normalized(&embedding))
	}

	/// Cached text embedding, computing and caching it on a miss.
	pub fn get_text_embedding(
		&mut self,
		model: &dyn EmbeddingModel,
		text: &str,
	) -> Result<Vec<f32>, EngineError> {
		if let Some(cached) = self.text_embedding_cached(text) {
			return Ok(cached.to_vec());
		}
		self.add_text(model, text)
	}

	/// Cached image embedding. On a miss, read-only stores compute on the
	/// fly without caching; writable stores add the image to the corpus.
	pub fn get_image_embedding(
		&mut self,
		model: &dyn EmbeddingModel,
		path: &Path,
	) -> Result<Vec<f32>, EngineError> {
		if let Some(cached) = self.embedding_for_path(path) {
			return Ok(cached.to_vec());
		}
		if self.is_read_only() {
			let embedding = model.embed_image(path)?;
			self.check_dimension(&embedding)?;
			return Ok(normalized(&embedding));
		}
		self.add_images(model, std::slice::from_ref(&path.to_path_buf()), &NoProgress)?;
		self.embedding_for_path(path)
			.map(|e| e.to_vec())
			.ok_or_else(|| {
				EngineError::ModelUnavailable(format!(
					"embedding for {} was not added",
					path.display()
				))
			})
	}

	/// Walk a directory tree and add every readable image file not yet in
	/// the corpus. Non-image extensions and unreadable entries are skipped.
	/// Returns the number of images added.
	pub fn add_images_recursively(
		&mut self,
		model: &dyn EmbeddingModel,
		root: &Path,
		progress: &dyn ProgressSink,
	) -> Result<usize, EngineError> {
		self.ensure_writable()?;

		let mut to_add = Vec::new();
		for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
			if !entry.file_type().is_file() {
				continue;
			}
			let path = entry.path();
			let is_image = path
				.extension()
				.map(|ext| {
					let ext = ext.to_string_lossy().to_lowercase();
					IMAGE_EXTENSIONS.contains(&ext.as_str())
				})
				.unwrap_or(false);
			if !is_image || self.has(path) {
				continue;
			}
			// Unreadable files would fail hashing later; skip them here.
			if std::fs::File::open(path).is_err() {
				tracing::warn!(path = %path.display(), "skipping unreadable file");
				continue;
			}
			to_add.push(absolutize(path)?);
		}

		let (added, _) = self.add_images(model, &to_add, progress)?;
		Ok(added.len())
	}

	/// Drop records whose backing file no longer exists. Refuses when that
	/// would remove more than the safety threshold of the corpus, unless
	/// forced. Persists when anything was removed. Returns the number of
	/// records dropped.
	pub fn cleanup_missing(&mut self, force: bool) -> Result<usize, EngineError> {
		let total = self.images.len();
		let missing = self
			.images
			.iter()
			.filter(|r| !r.path.exists())
			.count();
		if missing == 0 {
			return Ok(0);
		}
		if !force && (missing as f32) > CLEANUP_SAFETY_THRESHOLD * total as f32 {
			return Err(EngineError::CleanupRefused { missing, total });
		}

		self.images.retain(|r| r.path.exists());
		self.rebuild_indexes();
		tracing::info!(removed = missing, remaining = self.images.len(), "cleaned up missing files");
		self.save()?;
		Ok(missing)
	}

	/// Remove one record by id. Persists when the record existed.
	pub fn remove_by_id(&mut self, id: &str) -> Result<bool, EngineError> {
		let before = self.images.len();
		self.images.retain(|r| r.id != id);
		if self.images.len() == before {
			return Ok(false);
		}
		self.rebuild_indexes();
		self.save()?;
		Ok(true)
	}

	/// Persist the store to its configured file. A no-op for memory-only
	/// stores; read-only stores log and skip.
	pub fn save(&self) -> Result<(), EngineError> {
		let Some(file) = &self.config.store_file else {
			return Ok(());
		};
		if self.is_read_only() {
			tracing::warn!("store is read-only, not saving");
			return Ok(());
		}
		persistence::save_store_file(file, &self.config.identifier, &self.images, &self.text_cache)
	}
}
