//! Vantage-point tree over a [`Snapshot`].
//!
//! Each node picks a vantage candidate and splits the rest at the median
//! distance `mu`: the inner subtree holds points with `d(v, p) <= mu`, the
//! outer one points with `d(v, p) >= mu`. Construction is deterministic (the
//! vantage is the lowest snapshot position in the slice), so a given snapshot
//! always yields the same tree.
//!
//! The search returns exactly what a full scan would: the candidate that
//! minimizes `(distance, snapshot position)` among those within the bound.
//! Pruning uses the triangle inequality on unrounded `f64` distances, with a
//! small relative slack so that rounding the reported `f32` distance can never
//! discard a tied or closer candidate. Candidates themselves are ranked by the
//! same rounded `f32` distance the linear scan uses.

use crate::store::Snapshot;
use crate::types::euclidean_distance_f64;

/// Relative slack applied to every pruning bound.
const PRUNE_SLACK: f64 = 1e-4;

#[derive(Debug)]
struct Node {
    position: usize,
    radius: f64,
    inner: Option<usize>,
    outer: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct VpTree {
    nodes: Vec<Node>,
    root: Option<usize>,
}

/// Nearest candidate found so far: snapshot position and distance.
pub(crate) type Nearest = (usize, f32);

impl VpTree {
    pub(crate) fn build(snapshot: &Snapshot) -> Self {
        let mut tree = Self {
            nodes: Vec::with_capacity(snapshot.len()),
            root: None,
        };
        let positions: Vec<usize> = (0..snapshot.len()).collect();
        tree.root = tree.build_node(snapshot, &positions);
        tree
    }

    fn build_node(&mut self, snapshot: &Snapshot, positions: &[usize]) -> Option<usize> {
        let (&vantage, rest) = positions.split_first()?;
        let v = snapshot.values_at(vantage);

        let mut by_distance: Vec<(f64, usize)> = rest
            .iter()
            .map(|&p| (euclidean_distance_f64(v, snapshot.values_at(p)), p))
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mid = by_distance.len() / 2;
        let radius = by_distance.get(mid).map_or(0.0, |&(d, _)| d);

        // Keep each half in ascending snapshot order so child vantages are
        // chosen the same way as the root's.
        let mut inner: Vec<usize> = by_distance[..mid].iter().map(|&(_, p)| p).collect();
        let mut outer: Vec<usize> = by_distance[mid..].iter().map(|&(_, p)| p).collect();
        inner.sort_unstable();
        outer.sort_unstable();

        let id = self.nodes.len();
        self.nodes.push(Node {
            position: vantage,
            radius,
            inner: None,
            outer: None,
        });
        let inner = self.build_node(snapshot, &inner);
        let outer = self.build_node(snapshot, &outer);
        self.nodes[id].inner = inner;
        self.nodes[id].outer = outer;
        Some(id)
    }

    /// Best candidate with distance `<= bound`, ties broken by position.
    pub(crate) fn nearest(&self, snapshot: &Snapshot, query: &[f32], bound: f32) -> Option<Nearest> {
        let mut best = None;
        if let Some(root) = self.root {
            self.search(root, snapshot, query, bound, &mut best);
        }
        best
    }

    fn search(
        &self,
        id: usize,
        snapshot: &Snapshot,
        query: &[f32],
        bound: f32,
        best: &mut Option<Nearest>,
    ) {
        let node = &self.nodes[id];
        let d = euclidean_distance_f64(query, snapshot.values_at(node.position));
        consider(best, node.position, d as f32, bound);

        let limit = |best: Option<Nearest>| {
            let b = f64::from(best.map_or(bound, |(_, bd)| bd));
            b + (b + d + node.radius) * PRUNE_SLACK
        };

        // Lower bounds on d(query, p) for points in each subtree. Both are
        // finite, so the comparisons below never see NaN.
        let inner_lower = d - node.radius;
        let outer_lower = node.radius - d;

        let (first, first_lower, second, second_lower) = if d <= node.radius {
            (node.inner, inner_lower, node.outer, outer_lower)
        } else {
            (node.outer, outer_lower, node.inner, inner_lower)
        };

        if let Some(child) = first {
            if first_lower <= limit(*best) {
                self.search(child, snapshot, query, bound, best);
            }
        }
        if let Some(child) = second {
            if second_lower <= limit(*best) {
                self.search(child, snapshot, query, bound, best);
            }
        }
    }
}

fn consider(best: &mut Option<Nearest>, position: usize, distance: f32, bound: f32) {
    if distance > bound {
        return;
    }
    let better = match *best {
        None => true,
        Some((bp, bd)) => distance < bd || (distance == bd && position < bp),
    };
    if better {
        *best = Some((position, distance));
    }
}
