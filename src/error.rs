use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Store is read-only: {0}")]
	ReadOnly(String),
	#[error("Embedding model unavailable: {0}")]
	ModelUnavailable(String),
	#[error("Unsupported store version: {0}")]
	UnsupportedVersion(u32),
	#[error("Store identifier mismatch: expected '{expected}', loaded '{found}'")]
	IdentifierMismatch { expected: String, found: String },
	#[error("Unknown reduction method: {0}")]
	UnknownReduction(String),
	#[error("Cleanup refused: {missing} of {total} files are missing (more than 25%), pass force to proceed")]
	CleanupRefused { missing: usize, total: usize },
	#[error("There must be one weight per query term: {terms} terms, {weights} weights")]
	WeightMismatch { terms: usize, weights: usize },
	#[error("Embedding dimension mismatch: expected {expected}, got {found}")]
	DimensionMismatch { expected: usize, found: usize },
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Storage corruption: {0}")]
	Corruption(String),
	#[error("Serialization error: {0}")]
	Serialization(String),
}

impl EngineError {
	pub fn code(&self) -> &str {
		match self {
			Self::ReadOnly(_) => "STORE_READ_ONLY",
			Self::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
			Self::UnsupportedVersion(_) => "STORE_VERSION",
			Self::IdentifierMismatch { .. } => "STORE_IDENTIFIER_MISMATCH",
			Self::UnknownReduction(_) => "QUERY_UNKNOWN_REDUCTION",
			Self::CleanupRefused { .. } => "CLEANUP_REFUSED",
			Self::WeightMismatch { .. } => "QUERY_WEIGHT_MISMATCH",
			Self::DimensionMismatch { .. } => "EMBEDDING_DIMENSION",
			Self::Io(_) => "STORE_IO",
			Self::Corruption(_) => "STORE_CORRUPT",
			Self::Serialization(_) => "STORE_SERIALIZATION",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn codes_are_stable() {
		assert_eq!(EngineError::ReadOnly("x".into()).code(), "STORE_READ_ONLY");
		assert_eq!(EngineError::UnsupportedVersion(7).code(), "STORE_VERSION");
		assert_eq!(
			EngineError::CleanupRefused { missing: 4, total: 10 }.code(),
			"CLEANUP_REFUSED"
		);
	}

	#[test]
	fn messages_carry_context() {
		let err = EngineError::IdentifierMismatch {
			expected: "clip-b32".into(),
			found: "clip-l14".into(),
		};
		let msg = err.to_string();
		assert!(msg.contains("clip-b32"));
		assert!(msg.contains("clip-l14"));
	}
}
