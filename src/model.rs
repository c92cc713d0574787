// ---------------------------------------------------------------------------
// Collaborator interfaces
// ---------------------------------------------------------------------------
//
// The engine never talks to a concrete embedding backend, progress channel,
// or tag database. Each collaborator is a trait; callers inject an
// implementation per store or per operation.
// ---------------------------------------------------------------------------

use std::path::Path;

use crate::error::EngineError;
use crate::types::{QueryResult, TaggedResult};

// ---------------------------------------------------------------------------
// EmbeddingModel
// ---------------------------------------------------------------------------

/// An external embedding backend mapping texts and images into one shared
/// similarity space of fixed dimension.
///
/// Failures surface as `EngineError::ModelUnavailable`; the engine never
/// retries on its own.
pub trait EmbeddingModel {
	/// Stable tag identifying the model/configuration that produced the
	/// vectors. Persisted alongside the corpus; a mismatch at load time is
	/// fatal unless explicitly overridden.
	fn identifier(&self) -> &str;

	/// Dimensionality of every vector this model produces.
	fn embedding_dim(&self) -> usize;

	fn embed_text(&self, text: &str) -> Result<Vec<f32>, EngineError>;

	fn embed_image(&self, path: &Path) -> Result<Vec<f32>, EngineError>;

	/// Batched image embedding. The default implementation embeds one path
	/// at a time and reports per-item progress; backends with real batch
	/// inference should override it.
	fn embed_images(
		&self,
		paths: &[&Path],
		progress: &dyn ProgressSink,
	) -> Result<Vec<Vec<f32>>, EngineError> {
		let mut out = Vec::with_capacity(paths.len());
		for (i, path) in paths.iter().enumerate() {
			out.push(self.embed_image(path)?);
			progress.report("embedding images", (i + 1) as f32 / paths.len() as f32);
		}
		Ok(out)
	}
}

// ---------------------------------------------------------------------------
// ProgressSink
// ---------------------------------------------------------------------------

/// Advisory progress channel: `(label, fraction in 0..=1)`. Delivery is
/// best-effort with no ordering guarantee; implementations must not block
/// the operation reporting through them.
pub trait ProgressSink {
	fn report(&self, label: &str, fraction: f32);
}

/// A sink that discards all reports.
pub struct NoProgress;

impl ProgressSink for NoProgress {
	fn report(&self, _label: &str, _fraction: f32) {}
}

impl<F> ProgressSink for F
where
	F: Fn(&str, f32),
{
	fn report(&self, label: &str, fraction: f32) {
		self(label, fraction)
	}
}

// ---------------------------------------------------------------------------
// TagProvider
// ---------------------------------------------------------------------------

/// Maps file paths to string labels, e.g. a platform metadata database.
pub trait TagProvider {
	fn tags_for(&self, path: &Path) -> Vec<String>;
}

/// Annotate a result page with tags from the provider.
pub fn annotate_tags(results: &[QueryResult], tags: &dyn TagProvider) -> Vec<TaggedResult> {
	results
		.iter()
		.map(|r| TaggedResult {
			id: r.id.clone(),
			path: r.path.clone(),
			similarity: r.similarity,
			tags: tags.tags_for(&r.path),
		})
		.collect()
}

/// Keep only results carrying `tag`.
pub fn filter_by_tag(results: Vec<QueryResult>, tags: &dyn TagProvider, tag: &str) -> Vec<QueryResult> {
	results
		.into_iter()
		.filter(|r| tags.tags_for(&r.path).iter().any(|t| t == tag))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	struct SuffixTags;

	impl TagProvider for SuffixTags {
		fn tags_for(&self, path: &Path) -> Vec<String> {
			if path.to_string_lossy().contains("cat") {
				vec!["animal".into(), "cat".into()]
			} else {
				Vec::new()
			}
		}
	}

	fn result(path: &str) -> QueryResult {
		QueryResult {
			id: path.to_string(),
			path: PathBuf::from(path),
			similarity: 0.5,
		}
	}

	#[test]
	fn annotate_attaches_provider_tags() {
		let results = vec![result("/pics/cat1.jpg"), result("/pics/tree.jpg")];
		let tagged = annotate_tags(&results, &SuffixTags);
		assert_eq!(tagged[0].tags, vec!["animal", "cat"]);
		assert!(tagged[1].tags.is_empty());
	}

	#[test]
	fn filter_by_tag_keeps_matches_only() {
		let results = vec![result("/pics/cat1.jpg"), result("/pics/tree.jpg")];
		let kept = filter_by_tag(results, &SuffixTags, "cat");
		assert_eq!(kept.len(), 1);
		assert_eq!(kept[0].path, PathBuf::from("/pics/cat1.jpg"));
	}

	#[test]
	fn closures_are_progress_sinks() {
		use std::cell::Cell;
		let calls = Cell::new(0usize);
		let sink = |_: &str, _: f32| calls.set(calls.get() + 1);
		sink.report("step", 0.5);
		sink.report("step", 1.0);
		assert_eq!(calls.get(), 2);
	}
}
