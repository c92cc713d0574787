use std::fmt::Write as _;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex sha256 of a file's bytes. Used to detect stale or duplicate paths
/// and to tell read-only legacy stores apart from mutable ones.
pub fn content_hash(path: &Path) -> std::io::Result<String> {
	let bytes = std::fs::read(path)?;
	Ok(hash_bytes(&bytes))
}

/// Hex sha256 of an in-memory byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
	let digest = Sha256::digest(bytes);
	let mut out = String::with_capacity(digest.len() * 2);
	for byte in digest {
		let _ = write!(out, "{:02x}", byte);
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn known_digest() {
		// sha256("abc")
		assert_eq!(
			hash_bytes(b"abc"),
			"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
		);
	}

	#[test]
	fn file_hash_matches_bytes_hash() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(b"image bytes").unwrap();
		file.flush().unwrap();
		assert_eq!(content_hash(file.path()).unwrap(), hash_bytes(b"image bytes"));
	}

	#[test]
	fn missing_file_is_io_error() {
		assert!(content_hash(Path::new("/nonexistent/image.jpg")).is_err());
	}
}
