// ---------------------------------------------------------------------------
// Query planner & similarity engine
// ---------------------------------------------------------------------------
//
// Resolves query terms into normalized vectors, selects the candidate
// subset of the corpus, computes weighted cosine similarity per candidate,
// reduces across terms, sorts, paginates, and optionally permutes the page
// into browsing order.
// ---------------------------------------------------------------------------

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::browse::browse_order;
use crate::error::EngineError;
use crate::model::{EmbeddingModel, ProgressSink};
use crate::similarity::{dot, normalized};
use crate::store::ImageStore;
use crate::types::{Query, QueryResult, ReduceMethod, SortOrder};

/// Execute a weighted multi-term similarity query against a store.
///
/// Takes `&mut ImageStore` because resolving an uncached text term computes
/// and caches its embedding. Returns one page of results; an empty term
/// list yields an empty page, never an error.
pub fn search_images(
	store: &mut ImageStore,
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

	progress.report("resolving query embeddings", 0.0);
	let terms = resolve_terms(store, model, query)?;
	if terms.is_empty() {
		tracing::debug!("query resolved to zero terms, returning no results");
		return Ok(Vec::new());
	}

	let candidates = select_candidates(store, query);

	progress.report("computing similarities", 0.25);
	let mut scored = score_candidates(store, &terms, &candidates, query.reduce);

	// Stable sort: equal scores keep corpus order.
	scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

	let start = query.offset.min(scored.len());
	let end = query.offset.saturating_add(query.limit).min(scored.len());
	let mut page: Vec<(usize, f32)> = scored[start..end].to_vec();

	if query.order == SortOrder::SemanticPage {
		let page_embeddings: Vec<Vec<f32>> = page
			.iter()
			.map(|&(idx, _)| store.records()[idx].embedding.clone())
			.collect();
		let order = browse_order(&page_embeddings);
		page = order.into_iter().map(|i| page[i]).collect();
	}

	progress.report("finished", 1.0);

	Ok(page
		.into_iter()
		.map(|(idx, similarity)| {
			let record = &store.records()[idx];
			QueryResult {
				id: record.id.clone(),
				path: record.path.clone(),
				similarity,
			}
		})
		.collect())
}

/// A resolved query term: normalized vector plus its paired weight.
struct ResolvedTerm {
	vector: Vec<f32>,
	weight: f32,
}

/// Resolve texts, image ids, and raw vectors into `(vector, weight)` pairs,
/// in that order. Image-id terms whose id no longer resolves are dropped
/// together with their paired weight.
fn resolve_terms(
	store: &mut ImageStore,
	model: &dyn EmbeddingModel,
	query: &Query,
) -> Result<Vec<ResolvedTerm>, EngineError> {
	let mut terms = Vec::with_capacity(query.term_count());
	let mut weight_iter = query.weights.iter().copied();

	for text in &query.texts {
		let weight = weight_iter.next().unwrap_or_default();
		terms.push(ResolvedTerm {
			vector: store.get_text_embedding(model, text)?,
			weight,
		});
	}

	for id in &query.image_ids {
		let weight = weight_iter.next().unwrap_or_default();
		match store.embedding_for_id(id) {
			Some(embedding) => terms.push(ResolvedTerm {
				vector: embedding.to_vec(),
				weight,
			}),
			None => {
				tracing::debug!(id, "dropping query term for unknown image id");
			}
		}
	}

	for vector in &query.vectors {
		let weight = weight_iter.next().unwrap_or_default();
		if vector.len() != store.dimension() {
			return Err(EngineError::DimensionMismatch {
				expected: store.dimension(),
				found: vector.len(),
			});
		}
		terms.push(ResolvedTerm {
			vector: normalized(vector),
			weight,
		});
	}

	Ok(terms)
}

/// Corpus indices surviving the structural filters, in corpus order. With
/// no filters, the full index range is used without copying record data.
fn select_candidates(store: &ImageStore, query: &Query) -> Vec<usize> {
	let no_filters = query.path_include.is_none()
		&& query.path_exclude.is_none()
		&& query.id_include.is_none()
		&& query.id_exclude.is_none();
	if no_filters {
		return (0..store.len()).collect();
	}

	let policy = store.path_policy();
	let include_ids: Option<HashSet<&str>> = query
		.id_include
		.as_ref()
		.map(|ids| ids.iter().map(|s| s.as_str()).collect());
	let exclude_ids: Option<HashSet<&str>> = query
		.id_exclude
		.as_ref()
		.map(|ids| ids.iter().map(|s| s.as_str()).collect());

	store
		.records()
		.iter()
		.enumerate()
		.filter(|(_, record)| {
			if let Some(fragment) = &query.path_include {
				if !policy.path_contains(&record.path, fragment) {
					return false;
				}
			}
			if let Some(fragment) = &query.path_exclude {
				if policy.path_contains(&record.path, fragment) {
					return false;
				}
			}
			if let Some(ids) = &include_ids {
				if !ids.contains(record.id.as_str()) {
					return false;
				}
			}
			if let Some(ids) = &exclude_ids {
				if ids.contains(record.id.as_str()) {
					return false;
				}
			}
			true
		})
		.map(|(i, _)| i)
		.collect()
}

/// Weighted similarity per candidate, reduced across terms.
fn score_candidates(
	store: &ImageStore,
	terms: &[ResolvedTerm],
	candidates: &[usize],
	reduce: ReduceMethod,
) -> Vec<(usize, f32)> {
	candidates
		.iter()
		.map(|&idx| {
			let embedding = &store.records()[idx].embedding;
			let score = match reduce {
				ReduceMethod::Sum => terms
					.iter()
					.map(|t| dot(&t.vector, embedding) * t.weight)
					.sum(),
				ReduceMethod::Max => terms
					.iter()
					.map(|t| dot(&t.vector, embedding) * t.weight)
					.fold(f32::NEG_INFINITY, f32::max),
			};
			(idx, score)
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::NoProgress;
	use crate::store::StoreConfig;
	use crate::testutil::{temp_images, StubModel};
	use std::path::Path;

	/// Corpus of 3 unit vectors with known similarities to the "query"
	/// direction [1, 0, 0]: a=0.9..., b=0.1..., c=0.5...
	fn fixture(dir: &Path) -> (ImageStore, StubModel) {
		let model = StubModel::new(3)
			.with_text("query", vec![1.0, 0.0, 0.0])
			.with_image("a.jpg", vec![0.9, (1.0f32 - 0.81).sqrt(), 0.0])
			.with_image("b.jpg", vec![0.1, (1.0f32 - 0.01).sqrt(), 0.0])
			.with_image("c.jpg", vec![0.5, (1.0f32 - 0.25).sqrt(), 0.0]);
		let paths = temp_images(dir, &["a.jpg", "b.jpg", "c.jpg"]);
		let mut store = ImageStore::new(
			StoreConfig {
				identifier: "stub-model".into(),
				..StoreConfig::default()
			},
			3,
		);
		store.add_images(&model, &paths, &NoProgress).unwrap();
		(store, model)
	}

	fn names(results: &[QueryResult]) -> Vec<String> {
		results
			.iter()
			.map(|r| r.path.file_name().unwrap().to_string_lossy().into_owned())
			.collect()
	}

	#[test]
	fn results_sorted_by_descending_similarity() {
		let dir = tempfile::tempdir().unwrap();
		let (mut store, model) = fixture(dir.path());

		let results =
			search_images(&mut store, &model, &Query::text("query"), &NoProgress).unwrap();
		assert_eq!(names(&results), vec!["a.jpg", "c.jpg", "b.jpg"]);
		assert!(results[0].similarity > results[1].similarity);
		assert!(results[1].similarity > results[2].similarity);
		assert!((results[0].similarity - 0.9).abs() < 1e-3);
	}

	#[test]
	fn empty_query_returns_no_results() {
		let dir = tempfile::tempdir().unwrap();
		let (mut store, model) = fixture(dir.path());

		let query = Query {
			texts: vec![],
			weights: vec![],
			..Query::text("q")
		};
		let results = search_images(&mut store, &model, &query, &NoProgress).unwrap();
		assert!(results.is_empty());
	}

	#[test]
	fn weight_mismatch_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let (mut store, model) = fixture(dir.path());

		let query = Query {
			weights: vec![1.0, 2.0],
			..Query::text("query")
		};
		let err = search_images(&mut store, &model, &query, &NoProgress).unwrap_err();
		assert_eq!(err.code(), "QUERY_WEIGHT_MISMATCH");
	}

	#[test]
	fn unknown_image_id_term_is_dropped_with_its_weight() {
		let dir = tempfile::tempdir().unwrap();
		let (mut store, model) = fixture(dir.path());

		// One resolvable text term and one unresolvable image-id term.
		let mut query = Query::text("query");
		query.image_ids = vec!["gone".into()];
		query.weights = vec![1.0, 100.0];

		let results = search_images(&mut store, &model, &query, &NoProgress).unwrap();
		// The 100x weight vanished with its term: scores match the plain
		// single-text query.
		let plain =
			search_images(&mut store, &model, &Query::text("query"), &NoProgress).unwrap();
		assert_eq!(names(&results), names(&plain));
		for (a, b) in results.iter().zip(plain.iter()) {
			assert_eq!(a.similarity.to_bits(), b.similarity.to_bits());
		}
	}

	#[test]
	fn sum_reduce_combines_weighted_rows_exactly() {
		let dir = tempfile::tempdir().unwrap();
		let model = StubModel::new(3)
			.with_text("first", vec![1.0, 0.0, 0.0])
			.with_text("second", vec![0.0, 1.0, 0.0]);
		let paths = temp_images(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);
		let mut store = ImageStore::new(StoreConfig::default(), 3);
		store.add_images(&model, &paths, &NoProgress).unwrap();

		let single = |store: &mut ImageStore, text: &str| {
			let mut q = Query::text(text);
			q.limit = 10;
			search_images(store, &model, &q, &NoProgress).unwrap()
		};
		let first = single(&mut store, "first");
		let second = single(&mut store, "second");

		let mut combined = Query::texts_weighted(
			vec!["first".into(), "second".into()],
			vec![0.5, 0.5],
		);
		combined.limit = 10;
		let combined = search_images(&mut store, &model, &combined, &NoProgress).unwrap();

		for result in &combined {
			let s1 = first.iter().find(|r| r.id == result.id).unwrap().similarity;
			let s2 = second.iter().find(|r| r.id == result.id).unwrap().similarity;
			let expected = s1 * 0.5 + s2 * 0.5;
			assert_eq!(result.similarity.to_bits(), expected.to_bits());
		}
	}

	#[test]
	fn max_reduce_takes_elementwise_maximum() {
		let dir = tempfile::tempdir().unwrap();
		let model = StubModel::new(3)
			.with_text("x", vec![1.0, 0.0, 0.0])
			.with_text("y", vec![0.0, 1.0, 0.0])
			.with_image("a.jpg", vec![1.0, 0.0, 0.0])
			.with_image("b.jpg", vec![0.0, 1.0, 0.0]);
		let paths = temp_images(dir.path(), &["a.jpg", "b.jpg"]);
		let mut store = ImageStore::new(StoreConfig::default(), 3);
		store.add_images(&model, &paths, &NoProgress).unwrap();

		let mut query =
			Query::texts_weighted(vec!["x".into(), "y".into()], vec![1.0, 1.0]);
		query.reduce = ReduceMethod::Max;
		let results = search_images(&mut store, &model, &query, &NoProgress).unwrap();

		// Each image matches one term perfectly; max picks that term.
		for r in &results {
			assert!((r.similarity - 1.0).abs() < 1e-5);
		}
	}

	#[test]
	fn pagination_slices_the_full_ranking() {
		let dir = tempfile::tempdir().unwrap();
		let model = StubModel::new(2).with_text("q", vec![1.0, 0.0]);
		let model = (0..5).fold(model, |m, i| {
			let x = 0.9 - 0.1 * i as f32;
			m.with_image(&format!("p{}.jpg", i), vec![x, (1.0 - x * x).sqrt()])
		});
		let names_vec: Vec<String> = (0..5).map(|i| format!("p{}.jpg", i)).collect();
		let name_refs: Vec<&str> = names_vec.iter().map(|s| s.as_str()).collect();
		let paths = temp_images(dir.path(), &name_refs);
		let mut store = ImageStore::new(StoreConfig::default(), 2);
		store.add_images(&model, &paths, &NoProgress).unwrap();

		let mut full = Query::text("q");
		full.limit = 100;
		let full = search_images(&mut store, &model, &full, &NoProgress).unwrap();
		assert_eq!(full.len(), 5);

		let mut page = Query::text("q");
		page.offset = 2;
		page.limit = 2;
		let page = search_images(&mut store, &model, &page, &NoProgress).unwrap();
		assert_eq!(names(&page), names(&full[2..4]));

		// Out-of-range pagination yields a short or empty page, no error.
		let mut tail = Query::text("q");
		tail.offset = 4;
		tail.limit = 10;
		let tail = search_images(&mut store, &model, &tail, &NoProgress).unwrap();
		assert_eq!(tail.len(), 1);

		let mut beyond = Query::text("q");
		beyond.offset = 99;
		beyond.limit = 10;
		let beyond = search_images(&mut store, &model, &beyond, &NoProgress).unwrap();
		assert!(beyond.is_empty());

		// Extreme offset/limit values must not wrap around.
		let mut extreme = Query::text("q");
		extreme.offset = usize::MAX;
		extreme.limit = 1;
		let extreme = search_images(&mut store, &model, &extreme, &NoProgress).unwrap();
		assert!(extreme.is_empty());
	}

	#[test]
	fn path_filters_intersect_and_subtract() {
		let dir = tempfile::tempdir().unwrap();
		let model = StubModel::new(2);
		std::fs::create_dir_all(dir.path().join("a")).unwrap();
		std::fs::create_dir_all(dir.path().join("b")).unwrap();
		let paths = vec![
			dir.path().join("a/foo1.jpg"),
			dir.path().join("a/foobar.jpg"),
			dir.path().join("b/other.jpg"),
		];
		for p in &paths {
			std::fs::write(p, b"x").unwrap();
		}
		let mut store = ImageStore::new(StoreConfig::default(), 2);
		store.add_images(&model, &paths, &NoProgress).unwrap();

		let mut query = Query::text("q");
		query.path_include = Some("foo".into());
		query.path_exclude = Some("bar".into());
		let results = search_images(&mut store, &model, &query, &NoProgress).unwrap();
		assert_eq!(names(&results), vec!["foo1.jpg"]);
	}

	#[test]
	fn id_filters_ignore_unknown_ids() {
		let dir = tempfile::tempdir().unwrap();
		let (mut store, model) = fixture(dir.path());
		let keep = store.records()[1].id.clone();

		let mut query = Query::text("query");
		query.id_include = Some(vec![keep.clone(), "no-such-id".into()]);
		let results = search_images(&mut store, &model, &query, &NoProgress).unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].id, keep);

		let mut query = Query::text("query");
		query.id_exclude = Some(vec![keep.clone(), "also-unknown".into()]);
		let results = search_images(&mut store, &model, &query, &NoProgress).unwrap();
		assert_eq!(results.len(), 2);
		assert!(results.iter().all(|r| r.id != keep));
	}

	#[test]
	fn image_id_term_searches_by_example() {
		let dir = tempfile::tempdir().unwrap();
		let (mut store, model) = fixture(dir.path());
		let a_id = store.records()[0].id.clone();

		let results =
			search_images(&mut store, &model, &Query::image_id(a_id.clone()), &NoProgress)
				.unwrap();
		// The example image itself ranks first with similarity ~1.
		assert_eq!(results[0].id, a_id);
		assert!((results[0].similarity - 1.0).abs() < 1e-5);
	}

	#[test]
	fn raw_vector_term_with_wrong_dimension_errors() {
		let dir = tempfile::tempdir().unwrap();
		let (mut store, model) = fixture(dir.path());

		let query = Query::vector(vec![1.0, 0.0]);
		let err = search_images(&mut store, &model, &query, &NoProgress).unwrap_err();
		assert_eq!(err.code(), "EMBEDDING_DIMENSION");
	}

	#[test]
	fn semantic_page_order_is_a_permutation_of_the_page() {
		let dir = tempfile::tempdir().unwrap();
		let (mut store, model) = fixture(dir.path());

		let mut by_similarity = Query::text("query");
		by_similarity.limit = 10;
		let ranked =
			search_images(&mut store, &model, &by_similarity, &NoProgress).unwrap();

		let mut browsing = Query::text("query");
		browsing.limit = 10;
		browsing.order = SortOrder::SemanticPage;
		let browsed = search_images(&mut store, &model, &browsing, &NoProgress).unwrap();

		// Same members, same similarity per id; only display order differs.
		assert_eq!(browsed.len(), ranked.len());
		for r in &ranked {
			let b = browsed.iter().find(|b| b.id == r.id).unwrap();
			assert_eq!(b.similarity.to_bits(), r.similarity.to_bits());
		}
		// Browsing order starts from the top-ranked result.
		assert_eq!(browsed[0].id, ranked[0].id);
	}

	#[test]
	fn failing_model_surfaces_model_unavailable() {
		let dir = tempfile::tempdir().unwrap();
		let (mut store, _) = fixture(dir.path());
		let failing = StubModel::failing(3);

		let err = search_images(&mut store, &failing, &Query::text("new text"), &NoProgress)
			.unwrap_err();
		assert_eq!(err.code(), "MODEL_UNAVAILABLE");
	}

	#[test]
	fn progress_milestones_are_reported() {
		use std::sync::Mutex;
		let dir = tempfile::tempdir().unwrap();
		let (mut store, model) = fixture(dir.path());

		let reports: Mutex<Vec<(String, f32)>> = Mutex::new(Vec::new());
		let sink = |label: &str, fraction: f32| {
			reports.lock().unwrap().push((label.to_string(), fraction));
		};
		search_images(&mut store, &model, &Query::text("query"), &sink).unwrap();

		let reports = reports.into_inner().unwrap();
		let labels: Vec<&str> = reports.iter().map(|(l, _)| l.as_str()).collect();
		assert!(labels.contains(&"resolving query embeddings"));
		assert!(labels.contains(&"computing similarities"));
		assert!(labels.contains(&"finished"));
	}
}
