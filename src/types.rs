use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Corpus records
// ---------------------------------------------------------------------------

/// One indexed image: stable id, absolute path, content hash of the file
/// bytes at insert time, and an L2-normalized embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
	pub id: String,
	pub path: PathBuf,
	/// Hex sha256 of the file bytes. Empty when unknown (legacy stores).
	pub content_hash: String,
	pub embedding: Vec<f32>,
}

/// Cached text embedding. The text is a case-sensitive key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCacheEntry {
	pub text: String,
	pub embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Rule for combining per-term weighted similarity rows into one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceMethod {
	Sum,
	Max,
}

impl Default for ReduceMethod {
	fn default() -> Self {
		Self::Sum
	}
}

impl FromStr for ReduceMethod {
	type Err = EngineError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"sum" => Ok(Self::Sum),
			"max" => Ok(Self::Max),
			other => Err(EngineError::UnknownReduction(other.to_string())),
		}
	}
}

/// Result page ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
	/// Descending similarity.
	Similarity,
	/// Descending similarity for rank, then the page is permuted into a
	/// perceptually smooth browsing order.
	SemanticPage,
}

impl Default for SortOrder {
	fn default() -> Self {
		Self::Similarity
	}
}

fn default_limit() -> usize {
	100
}

/// A weighted multi-term similarity query with structural filters and
/// pagination. Terms are texts, then image ids, then raw vectors; `weights`
/// holds one weight per term across all three lists in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
	#[serde(default)]
	pub texts: Vec<String>,
	#[serde(default)]
	pub image_ids: Vec<String>,
	#[serde(default)]
	pub vectors: Vec<Vec<f32>>,
	pub weights: Vec<f32>,

	#[serde(default)]
	pub reduce: ReduceMethod,
	#[serde(default)]
	pub path_include: Option<String>,
	#[serde(default)]
	pub path_exclude: Option<String>,
	#[serde(default)]
	pub id_include: Option<Vec<String>>,
	#[serde(default)]
	pub id_exclude: Option<Vec<String>>,

	#[serde(default)]
	pub offset: usize,
	#[serde(default = "default_limit")]
	pub limit: usize,
	#[serde(default)]
	pub order: SortOrder,
}

impl Query {
	/// A single-text query with weight 1.
	pub fn text(text: impl Into<String>) -> Self {
		Self {
			texts: vec![text.into()],
			weights: vec![1.0],
			..Self::empty()
		}
	}

	/// A multi-text query with explicit weights. Panics if the lengths
	/// differ; builders are the one place where that is a caller bug.
	pub fn texts_weighted(texts: Vec<String>, weights: Vec<f32>) -> Self {
		assert_eq!(
			texts.len(),
			weights.len(),
			"there must be one weight for each text"
		);
		Self {
			texts,
			weights,
			..Self::empty()
		}
	}

	/// A single raw-vector query with weight 1.
	pub fn vector(embedding: Vec<f32>) -> Self {
		Self {
			vectors: vec![embedding],
			weights: vec![1.0],
			..Self::empty()
		}
	}

	/// A query referencing an existing record by id, with weight 1.
	pub fn image_id(id: impl Into<String>) -> Self {
		Self {
			image_ids: vec![id.into()],
			weights: vec![1.0],
			..Self::empty()
		}
	}

	fn empty() -> Self {
		Self {
			texts: Vec::new(),
			image_ids: Vec::new(),
			vectors: Vec::new(),
			weights: Vec::new(),
			reduce: ReduceMethod::default(),
			path_include: None,
			path_exclude: None,
			id_include: None,
			id_exclude: None,
			offset: 0,
			limit: default_limit(),
			order: SortOrder::default(),
		}
	}

	/// Number of terms across all three lists.
	pub fn term_count(&self) -> usize {
		self.texts.len() + self.image_ids.len() + self.vectors.len()
	}
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
	pub id: String,
	pub path: PathBuf,
	pub similarity: f32,
}

/// A query result annotated with labels from a tag provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedResult {
	pub id: String,
	pub path: PathBuf,
	pub similarity: f32,
	pub tags: Vec<String>,
}
