// ---------------------------------------------------------------------------
// Versioned store persistence
// ---------------------------------------------------------------------------
//
// One gzipped JSON file per store. Embedding matrices are stored as one
// base64 string per row, each encoding f32 little-endian bytes.
//
// Schema history (a loader must accept every version back to 1):
//   v1  flat `embeddings` / `paths` / `ids`, lower-cased paths, no text cache
//   v2  split image_* / text_* fields, paths still lower-cased
//   v3  added `identifier` (embedding-model tag, checked at load)
//   v4  added `image_hashes` (content hashes)
//   v5  paths stored verbatim (no case recovery needed)
//
// Each version has its own record type and an explicit upgrade function to
// the next version; the write side always emits the current version.
// ---------------------------------------------------------------------------

use std::io::Read;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::hash::content_hash;
use crate::model::ProgressSink;
use crate::paths::recover_natural_case;
use crate::types::{ImageRecord, TextCacheEntry};

pub const CURRENT_VERSION: u32 = 5;

// ---------------------------------------------------------------------------
// Embedding row codec
// ---------------------------------------------------------------------------

/// Encode an f32 slice as base64 of little-endian bytes.
pub fn encode_embedding(embedding: &[f32]) -> String {
	let bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
	STANDARD.encode(&bytes)
}

/// Decode a base64 f32-LE row back to `Vec<f32>`.
pub fn decode_embedding(encoded: &str) -> Result<Vec<f32>, EngineError> {
	let bytes = STANDARD
		.decode(encoded)
		.map_err(|e| EngineError::Corruption(format!("invalid base64 embedding: {}", e)))?;
	if bytes.len() % 4 != 0 {
		return Err(EngineError::Corruption(
			"embedding byte length not a multiple of 4".into(),
		));
	}
	let mut out = Vec::with_capacity(bytes.len() / 4);
	for chunk in bytes.chunks_exact(4) {
		out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
	}
	Ok(out)
}

fn decode_matrix(rows: &[String], what: &str) -> Result<Vec<Vec<f32>>, EngineError> {
	let mut decoded = Vec::with_capacity(rows.len());
	for row in rows {
		decoded.push(decode_embedding(row)?);
	}
	if let Some(first) = decoded.first() {
		let dim = first.len();
		if decoded.iter().any(|r| r.len() != dim) {
			return Err(EngineError::Corruption(format!(
				"{} rows have inconsistent dimensions",
				what
			)));
		}
	}
	Ok(decoded)
}

// ---------------------------------------------------------------------------
// Gzip container
// ---------------------------------------------------------------------------

fn compress(data: &[u8]) -> Result<Vec<u8>, EngineError> {
	let mut encoder = GzEncoder::new(data, Compression::new(6));
	let mut out = Vec::new();
	encoder.read_to_end(&mut out)?;
	Ok(out)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, EngineError> {
	let mut decoder = GzDecoder::new(data);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out)?;
	Ok(out)
}

fn is_gzipped(data: &[u8]) -> bool {
	data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

// ---------------------------------------------------------------------------
// Per-version record types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct StoreFileV1 {
	version: u32,
	embeddings: Vec<String>,
	paths: Vec<String>,
	#[serde(default)]
	ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFileV2 {
	version: u32,
	image_embeddings: Vec<String>,
	image_ids: Vec<String>,
	image_paths: Vec<String>,
	text_embeddings: Vec<String>,
	texts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFileV3 {
	version: u32,
	identifier: String,
	image_embeddings: Vec<String>,
	image_ids: Vec<String>,
	image_paths: Vec<String>,
	text_embeddings: Vec<String>,
	texts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFileV4 {
	version: u32,
	identifier: String,
	image_embeddings: Vec<String>,
	image_ids: Vec<String>,
	image_paths: Vec<String>,
	image_hashes: Vec<String>,
	text_embeddings: Vec<String>,
	texts: Vec<String>,
}

/// Current on-disk schema. v5 differs from v4 only in that paths are
/// stored verbatim instead of lower-cased.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFileV5 {
	version: u32,
	identifier: String,
	image_embeddings: Vec<String>,
	image_ids: Vec<String>,
	image_paths: Vec<String>,
	image_hashes: Vec<String>,
	text_embeddings: Vec<String>,
	texts: Vec<String>,
}

// ---------------------------------------------------------------------------
// Upgrade chain
// ---------------------------------------------------------------------------

struct UpgradeContext<'a> {
	identifier: &'a str,
	progress: &'a dyn ProgressSink,
}

fn upgrade_v1_to_v2(v1: StoreFileV1) -> StoreFileV2 {
	tracing::info!(images = v1.paths.len(), "upgrading store schema v1 -> v2");
	StoreFileV2 {
		version: 2,
		image_embeddings: v1.embeddings,
		// May be absent or shorter than `paths`; regenerated after load.
		image_ids: v1.ids.unwrap_or_default(),
		image_paths: v1.paths,
		text_embeddings: Vec::new(),
		texts: Vec::new(),
	}
}

fn upgrade_v2_to_v3(v2: StoreFileV2, ctx: &UpgradeContext) -> StoreFileV3 {
	// Pre-identifier files carry no model tag; stamp the configured one.
	StoreFileV3 {
		version: 3,
		identifier: ctx.identifier.to_string(),
		image_embeddings: v2.image_embeddings,
		image_ids: v2.image_ids,
		image_paths: v2.image_paths,
		text_embeddings: v2.text_embeddings,
		texts: v2.texts,
	}
}

fn upgrade_v3_to_v4(v3: StoreFileV3, ctx: &UpgradeContext) -> StoreFileV4 {
	let total = v3.image_paths.len();
	tracing::info!(images = total, "computing missing content hashes for legacy store");
	let mut image_hashes = Vec::with_capacity(total);
	for (i, path) in v3.image_paths.iter().enumerate() {
		// Files that vanished since the store was written get an empty
		// hash; cleanup_missing can drop them later.
		let hash = content_hash(Path::new(path)).unwrap_or_default();
		image_hashes.push(hash);
		ctx.progress
			.report("computing content hashes", (i + 1) as f32 / total.max(1) as f32);
	}
	StoreFileV4 {
		version: 4,
		identifier: v3.identifier,
		image_embeddings: v3.image_embeddings,
		image_ids: v3.image_ids,
		image_paths: v3.image_paths,
		image_hashes,
		text_embeddings: v3.text_embeddings,
		texts: v3.texts,
	}
}

fn upgrade_v4_to_v5(v4: StoreFileV4, ctx: &UpgradeContext) -> StoreFileV5 {
	let total = v4.image_paths.len();
	let mut image_paths = Vec::with_capacity(total);
	for (i, path) in v4.image_paths.iter().enumerate() {
		image_paths.push(
			recover_natural_case(Path::new(path))
				.to_string_lossy()
				.into_owned(),
		);
		ctx.progress
			.report("recovering path case", (i + 1) as f32 / total.max(1) as f32);
	}
	StoreFileV5 {
		version: 5,
		identifier: v4.identifier,
		image_embeddings: v4.image_embeddings,
		image_ids: v4.image_ids,
		image_paths,
		image_hashes: v4.image_hashes,
		text_embeddings: v4.text_embeddings,
		texts: v4.texts,
	}
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Fully upgraded in-memory contents of a store file.
#[derive(Debug)]
pub struct LoadedStore {
	pub identifier: String,
	pub images: Vec<ImageRecord>,
	pub texts: Vec<TextCacheEntry>,
}

fn parse<T: for<'de> Deserialize<'de>>(json: &str) -> Result<T, EngineError> {
	serde_json::from_str(json).map_err(|e| EngineError::Corruption(format!("invalid store file: {}", e)))
}

/// Load a store file, upgrading any supported prior schema version in
/// memory. `expected_identifier` must match the persisted model tag for
/// v3+ files unless `ignore_identifier_mismatch` is set.
pub fn load_store_file(
	file: &Path,
	expected_identifier: &str,
	ignore_identifier_mismatch: bool,
	progress: &dyn ProgressSink,
) -> Result<LoadedStore, EngineError> {
	let raw = std::fs::read(file)?;
	let json_bytes = if is_gzipped(&raw) { decompress(&raw)? } else { raw };
	let json = std::str::from_utf8(&json_bytes)
		.map_err(|e| EngineError::Corruption(format!("store file is not UTF-8: {}", e)))?;

	let head: serde_json::Value = parse(json)?;
	let version = head
		.get("version")
		.and_then(|v| v.as_u64())
		.ok_or_else(|| EngineError::Corruption("store file has no version field".into()))?
		as u32;

	let ctx = UpgradeContext {
		identifier: expected_identifier,
		progress,
	};

	let v5: StoreFileV5 = match version {
		1 => {
			let v1: StoreFileV1 = parse(json)?;
			upgrade_v4_to_v5(
				upgrade_v3_to_v4(upgrade_v2_to_v3(upgrade_v1_to_v2(v1), &ctx), &ctx),
				&ctx,
			)
		}
		2 => {
			let v2: StoreFileV2 = parse(json)?;
			upgrade_v4_to_v5(upgrade_v3_to_v4(upgrade_v2_to_v3(v2, &ctx), &ctx), &ctx)
		}
		3 => {
			let v3: StoreFileV3 = parse(json)?;
			check_identifier(&v3.identifier, expected_identifier, ignore_identifier_mismatch)?;
			upgrade_v4_to_v5(upgrade_v3_to_v4(v3, &ctx), &ctx)
		}
		4 => {
			let v4: StoreFileV4 = parse(json)?;
			check_identifier(&v4.identifier, expected_identifier, ignore_identifier_mismatch)?;
			upgrade_v4_to_v5(v4, &ctx)
		}
		5 => {
			let v5: StoreFileV5 = parse(json)?;
			check_identifier(&v5.identifier, expected_identifier, ignore_identifier_mismatch)?;
			v5
		}
		other => return Err(EngineError::UnsupportedVersion(other)),
	};

	finish_load(v5)
}

fn check_identifier(found: &str, expected: &str, ignore: bool) -> Result<(), EngineError> {
	if found != expected {
		if ignore {
			tracing::warn!(
				expected,
				found,
				"store identifier mismatch ignored; similarity ranking may be meaningless"
			);
			return Ok(());
		}
		return Err(EngineError::IdentifierMismatch {
			expected: expected.to_string(),
			found: found.to_string(),
		});
	}
	Ok(())
}

fn finish_load(v5: StoreFileV5) -> Result<LoadedStore, EngineError> {
	let image_embeddings = decode_matrix(&v5.image_embeddings, "image embedding")?;
	let text_embeddings = decode_matrix(&v5.text_embeddings, "text embedding")?;

	let count = v5.image_paths.len();
	let image_ids = if v5.image_ids.len() == count {
		v5.image_ids
	} else {
		// Legacy files without usable ids get fresh ones.
		tracing::info!(images = count, "generating new image ids");
		(0..count).map(|_| Uuid::new_v4().to_string()).collect()
	};

	if image_embeddings.len() != count || v5.image_hashes.len() != count {
		return Err(EngineError::Corruption(format!(
			"length mismatch: {} paths, {} embeddings, {} hashes",
			count,
			image_embeddings.len(),
			v5.image_hashes.len()
		)));
	}
	if text_embeddings.len() != v5.texts.len() {
		return Err(EngineError::Corruption(format!(
			"length mismatch: {} texts, {} text embeddings",
			v5.texts.len(),
			text_embeddings.len()
		)));
	}

	let images = image_ids
		.into_iter()
		.zip(v5.image_paths)
		.zip(v5.image_hashes)
		.zip(image_embeddings)
		.map(|(((id, path), content_hash), embedding)| ImageRecord {
			id,
			path: PathBuf::from(path),
			content_hash,
			embedding,
		})
		.collect();

	let texts = v5
		.texts
		.into_iter()
		.zip(text_embeddings)
		.map(|(text, embedding)| TextCacheEntry { text, embedding })
		.collect();

	Ok(LoadedStore {
		identifier: v5.identifier,
		images,
		texts,
	})
}

/// Write the current-version store file (gzipped JSON).
pub fn save_store_file(
	file: &Path,
	identifier: &str,
	images: &[ImageRecord],
	texts: &[TextCacheEntry],
) -> Result<(), EngineError> {
	let contents = StoreFileV5 {
		version: CURRENT_VERSION,
		identifier: identifier.to_string(),
		image_embeddings: images.iter().map(|r| encode_embedding(&r.embedding)).collect(),
		image_ids: images.iter().map(|r| r.id.clone()).collect(),
		image_paths: images
			.iter()
			.map(|r| r.path.to_string_lossy().into_owned())
			.collect(),
		image_hashes: images.iter().map(|r| r.content_hash.clone()).collect(),
		text_embeddings: texts.iter().map(|t| encode_embedding(&t.embedding)).collect(),
		texts: texts.iter().map(|t| t.text.clone()).collect(),
	};

	let json = serde_json::to_string(&contents)
		.map_err(|e| EngineError::Serialization(format!("failed to serialize store: {}", e)))?;
	let compressed = compress(json.as_bytes())?;

	if let Some(parent) = file.parent() {
		if !parent.as_os_str().is_empty() {
			std::fs::create_dir_all(parent)?;
		}
	}
	std::fs::write(file, compressed)?;
	tracing::info!(
		file = %file.display(),
		images = images.len(),
		texts = texts.len(),
		"saved store"
	);
	Ok(())
}
