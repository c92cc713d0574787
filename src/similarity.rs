/// Dot product of two f32 vectors. Returns 0.0 on dimension mismatch
/// or empty input. For unit-normalized inputs this is cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}
	let mut sum = 0.0f32;
	for i in 0..a.len() {
		sum += a[i] * b[i];
	}
	sum
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
	let mut sum = 0.0f32;
	for &x in v {
		sum += x * x;
	}
	sum.sqrt()
}

/// L2-normalize a vector in place. Zero-magnitude vectors are left untouched.
pub fn normalize_in_place(v: &mut [f32]) {
	let norm = l2_norm(v);
	if norm == 0.0 || !norm.is_finite() {
		return;
	}
	for x in v.iter_mut() {
		*x /= norm;
	}
}

/// Return an L2-normalized copy of a vector.
pub fn normalized(v: &[f32]) -> Vec<f32> {
	let mut out = v.to_vec();
	normalize_in_place(&mut out);
	out
}

/// Cosine distance between two unit-normalized vectors: `1 - dot`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
	1.0 - dot(a, b)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dot_identical_unit_vectors() {
		let v = vec![0.6f32, 0.8];
		assert!((dot(&v, &v) - 1.0).abs() < 1e-6);
	}

	#[test]
	fn dot_orthogonal() {
		assert_eq!(dot(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
	}

	#[test]
	fn dot_mismatched_lengths_is_zero() {
		assert_eq!(dot(&[1.0], &[1.0, 2.0]), 0.0);
	}

	#[test]
	fn dot_empty_is_zero() {
		assert_eq!(dot(&[], &[]), 0.0);
	}

	#[test]
	fn norm_345() {
		assert!((l2_norm(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
	}

	#[test]
	fn normalize_makes_unit_length() {
		let mut v = vec![3.0f32, 4.0];
		normalize_in_place(&mut v);
		assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
		assert!((v[0] - 0.6).abs() < 1e-6);
		assert!((v[1] - 0.8).abs() < 1e-6);
	}

	#[test]
	fn normalize_zero_vector_untouched() {
		let mut v = vec![0.0f32, 0.0];
		normalize_in_place(&mut v);
		assert_eq!(v, vec![0.0, 0.0]);
	}

	#[test]
	fn distance_of_identical_is_zero() {
		let v = normalized(&[1.0, 2.0, 3.0]);
		assert!(cosine_distance(&v, &v).abs() < 1e-6);
	}

	#[test]
	fn distance_of_opposite_is_two() {
		let a = vec![1.0f32, 0.0];
		let b = vec![-1.0f32, 0.0];
		assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
	}
}
