// Test fixtures: a deterministic in-process embedding model and helpers
// for building small image corpora on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::model::EmbeddingModel;

/// Deterministic stand-in for a real embedding backend. Vectors can be
/// pinned per text or per image file name; everything else gets a stable
/// pseudo-embedding derived from the input bytes.
pub struct StubModel {
	dim: usize,
	text_vectors: HashMap<String, Vec<f32>>,
	image_vectors: HashMap<String, Vec<f32>>,
	fail: bool,
}

impl StubModel {
	pub fn new(dim: usize) -> Self {
		Self {
			dim,
			text_vectors: HashMap::new(),
			image_vectors: HashMap::new(),
			fail: false,
		}
	}

	/// A model whose every call fails, for exercising error paths.
	pub fn failing(dim: usize) -> Self {
		Self {
			fail: true,
			..Self::new(dim)
		}
	}

	pub fn with_text(mut self, text: &str, vector: Vec<f32>) -> Self {
		self.text_vectors.insert(text.to_string(), vector);
		self
	}

	/// Pin the vector returned for any path with this file name.
	pub fn with_image(mut self, file_name: &str, vector: Vec<f32>) -> Self {
		self.image_vectors.insert(file_name.to_string(), vector);
		self
	}

	fn derive(&self, input: &[u8]) -> Vec<f32> {
		let mut v = vec![0.1f32; self.dim];
		for (i, &byte) in input.iter().enumerate() {
			v[i % self.dim] += byte as f32 / 255.0;
		}
		v
	}
}

impl EmbeddingModel for StubModel {
	fn identifier(&self) -> &str {
		"stub-model"
	}

	fn embedding_dim(&self) -> usize {
		self.dim
	}

	fn embed_text(&self, text: &str) -> Result<Vec<f32>, EngineError> {
		if self.fail {
			return Err(EngineError::ModelUnavailable("stub model failure".into()));
		}
		Ok(self
			.text_vectors
			.get(text)
			.cloned()
			.unwrap_or_else(|| self.derive(text.as_bytes())))
	}

	fn embed_image(&self, path: &Path) -> Result<Vec<f32>, EngineError> {
		if self.fail {
			return Err(EngineError::ModelUnavailable("stub model failure".into()));
		}
		let name = path
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_default();
		Ok(self
			.image_vectors
			.get(&name)
			.cloned()
			.unwrap_or_else(|| self.derive(name.as_bytes())))
	}
}

/// Create small files named `names` under `dir` and return their paths.
pub fn temp_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
	names
		.iter()
		.map(|name| {
			let path = dir.join(name);
			std::fs::write(&path, name.as_bytes()).unwrap();
			path
		})
		.collect()
}
