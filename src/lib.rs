// ---------------------------------------------------------------------------
// imageseek-engine
// ---------------------------------------------------------------------------
//
// Local, content-addressable image search over dense vector embeddings.
// Images map to fixed-size vectors through an injected `EmbeddingModel`;
// callers search by text, by reference image id, or by raw vector, with
// per-term weights, structural filters, and pagination. The engine owns
// the embedding corpus, its versioned persistence, weighted similarity
// ranking, a browsing-order heuristic for result pages, and a shard
// aggregator for corpora split across immutable snapshots.
// ---------------------------------------------------------------------------

pub mod browse;
pub mod error;
pub mod hash;
pub mod model;
pub mod paths;
pub mod persistence;
pub mod query;
pub mod shard;
pub mod shared;
pub mod similarity;
pub mod store;
pub mod types;

// Shared test fixtures, also used by the integration tests. Not part of
// the public API surface.
#[doc(hidden)]
pub mod testutil;

pub use browse::browse_order;
pub use error::EngineError;
pub use model::{annotate_tags, filter_by_tag, EmbeddingModel, NoProgress, ProgressSink, TagProvider};
pub use paths::PathPolicy;
pub use query::search_images;
pub use shard::ShardedStore;
pub use shared::SharedStore;
pub use store::{ImageStore, StoreConfig};
pub use types::{
	ImageRecord, Query, QueryResult, ReduceMethod, SortOrder, TaggedResult, TextCacheEntry,
};
