// ---------------------------------------------------------------------------
// Path normalization policy
// ---------------------------------------------------------------------------
//
// Whether two paths name the same file depends on the filesystem. The
// policy is configured per store instead of hardcoding the platform:
// case-insensitive stores index and filter on folded path strings while
// keeping the natural-cased path for display and file access.
// ---------------------------------------------------------------------------

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPolicy {
	CaseSensitive,
	CaseInsensitive,
}

impl Default for PathPolicy {
	fn default() -> Self {
		Self::CaseSensitive
	}
}

impl PathPolicy {
	/// Index key for a path under this policy.
	pub fn key(&self, path: &Path) -> String {
		let s = path.to_string_lossy();
		match self {
			Self::CaseSensitive => s.into_owned(),
			Self::CaseInsensitive => s.to_lowercase(),
		}
	}

	/// Substring filter match under this policy.
	pub fn path_contains(&self, path: &Path, fragment: &str) -> bool {
		let s = path.to_string_lossy();
		match self {
			Self::CaseSensitive => s.contains(fragment),
			Self::CaseInsensitive => s.to_lowercase().contains(&fragment.to_lowercase()),
		}
	}
}

/// Make a path absolute without resolving symlinks or requiring the file
/// to exist.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
	std::path::absolute(path)
}

/// Recover the natural casing of a possibly lower-cased path by walking the
/// directory tree and matching component names case-insensitively. Returns
/// the input unchanged when a component cannot be matched (file moved or
/// deleted). Only used when upgrading legacy stores that folded paths to
/// lower case.
pub fn recover_natural_case(path: &Path) -> PathBuf {
	let mut components = path.components();
	let mut rebuilt = match components.next() {
		Some(root @ std::path::Component::RootDir) => PathBuf::from(root.as_os_str()),
		Some(other) => {
			// Relative or prefixed path: start from the first component as-is.
			PathBuf::from(other.as_os_str())
		}
		None => return path.to_path_buf(),
	};

	for component in components {
		let wanted = component.as_os_str().to_string_lossy().to_lowercase();
		let matched = std::fs::read_dir(&rebuilt).ok().and_then(|entries| {
			entries
				.filter_map(|e| e.ok())
				.map(|e| e.file_name())
				.find(|name| name.to_string_lossy().to_lowercase() == wanted)
		});
		match matched {
			Some(name) => rebuilt.push(name),
			None => {
				tracing::warn!(path = %path.display(), "could not recover natural case");
				return path.to_path_buf();
			}
		}
	}
	rebuilt
}
