// ---------------------------------------------------------------------------
// Browsing-order constructor
// ---------------------------------------------------------------------------
//
// Orders a single result page so that visually similar images sit next to
// each other. Greedy path-cover over pairwise cosine distance: consume the
// globally cheapest edge whose endpoints are still open, merging paths and
// rejecting cycles, then concatenate the open paths. Node 0 is held at
// degree one so the produced order always starts there.
//
// O(n^2 log n) — intended for page-sized inputs, never whole corpora.
// ---------------------------------------------------------------------------

use std::cmp::Ordering;

use crate::similarity::cosine_distance;

/// Compute a visiting order for `vectors` (unit-normalized, one per page
/// item). The result is a permutation of `0..vectors.len()`.
pub fn browse_order(vectors: &[Vec<f32>]) -> Vec<usize> {
	let n = vectors.len();
	if n <= 1 {
		return (0..n).collect();
	}

	// All pairwise edges, ascending by distance with (i, j) tie-break.
	let mut edges = Vec::with_capacity(n * (n - 1) / 2);
	for i in 0..n {
		for j in (i + 1)..n {
			edges.push((cosine_distance(&vectors[i], &vectors[j]), i, j));
		}
	}
	edges.sort_by(|a, b| {
		a.0.partial_cmp(&b.0)
			.unwrap_or(Ordering::Equal)
			.then(a.1.cmp(&b.1))
			.then(a.2.cmp(&b.2))
	});

	let mut degree = vec![0u8; n];
	let mut neighbors: Vec<Vec<usize>> = vec![Vec::with_capacity(2); n];
	let mut dsu = DisjointSet::new(n);

	// Node 0 keeps degree <= 1 so it remains an endpoint of its path.
	let cap = |node: usize| if node == 0 { 1u8 } else { 2u8 };

	for &(_, i, j) in &edges {
		if degree[i] >= cap(i) || degree[j] >= cap(j) {
			continue;
		}
		if dsu.find(i) == dsu.find(j) {
			// Would close a cycle.
			continue;
		}
		neighbors[i].push(j);
		neighbors[j].push(i);
		degree[i] += 1;
		degree[j] += 1;
		dsu.union(i, j);
	}

	// Concatenate paths. Iterating nodes in index order puts the path
	// containing node 0 first and orders the rest by smallest member;
	// every unvisited node with degree < 2 is an endpoint (isolated nodes
	// are single-element paths).
	let mut order = Vec::with_capacity(n);
	let mut visited = vec![false; n];
	for start in 0..n {
		if visited[start] || degree[start] == 2 {
			continue;
		}
		let mut prev: Option<usize> = None;
		let mut cur = start;
		loop {
			visited[cur] = true;
			order.push(cur);
			let next = neighbors[cur].iter().copied().find(|&x| Some(x) != prev);
			match next {
				Some(next) => {
					prev = Some(cur);
					cur = next;
				}
				None => break,
			}
		}
	}

	debug_assert_eq!(order.len(), n);
	order
}

// ---------------------------------------------------------------------------
// Disjoint set (path-compressed union-find)
// ---------------------------------------------------------------------------

struct DisjointSet {
	parent: Vec<usize>,
}

impl DisjointSet {
	fn new(n: usize) -> Self {
		Self {
			parent: (0..n).collect(),
		}
	}

	fn find(&mut self, x: usize) -> usize {
		if self.parent[x] != x {
			let root = self.find(self.parent[x]);
			self.parent[x] = root;
		}
		self.parent[x]
	}

	fn union(&mut self, a: usize, b: usize) {
		let ra = self.find(a);
		let rb = self.find(b);
		if ra != rb {
			self.parent[rb] = ra;
		}
	}
}
