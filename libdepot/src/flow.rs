//! Minimum-cost assignment of points to groups under per-group size bounds.
//!
//! This is a min-cost flow from points to groups, solved by successive
//! shortest paths. Each augmentation brings one unassigned point in, possibly
//! pushing a chain of already assigned points from group to group, so the
//! residual graph only needs the groups as nodes: the edge `a -> b` is the
//! cheapest move of a member of `a` into `b`. Groups below `min_size` are
//! preferred as path ends over every other group, which is the same as giving
//! their first `min_size` slots an arbitrarily large reward.
//!
//! Edge costs are kept across augmentations: every group pair has a heap of
//! move candidates, and every group a list of points by entry cost. Only the
//! points an augmentation moves are pushed again, and candidates whose point
//! has since left the group are dropped when they reach the top.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use ndarray::prelude::*;

use crate::error::{Error, Result};

const EPS: f64 = 1e-12;

#[derive(Clone, Copy)]
enum Pred {
    /// Path starts here with an unassigned point.
    Source(usize),
    /// Point `point` moves from group `from` into this group.
    Move { from: usize, point: usize },
}

/// Moving `point` out of its group changes the total cost by `delta`.
#[derive(Clone, Copy, PartialEq)]
struct Candidate {
    delta: f64,
    point: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.delta
            .total_cmp(&other.delta)
            .then(self.point.cmp(&other.point))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cheapest moves between every ordered pair of groups, and cheapest entries
/// of unassigned points into every group.
struct Moves {
    k: usize,
    /// Min-heap per `(from, to)` pair, at `from * k + to`.
    heaps: Vec<BinaryHeap<Reverse<Candidate>>>,
    /// Points by ascending entry cost, per group.
    entries: Vec<Vec<usize>>,
    /// First position of `entries[c]` that may still be unassigned.
    cursor: Vec<usize>,
}

impl Moves {
    fn new(costs: &ArrayView2<f64>) -> Self {
        let (n, k) = costs.dim();
        let entries = (0..k)
            .map(|c| {
                let mut order: Vec<usize> = (0..n).collect();
                order.sort_by(|&a, &b| costs[[a, c]].total_cmp(&costs[[b, c]]).then(a.cmp(&b)));
                order
            })
            .collect();
        Self {
            k,
            heaps: (0..k * k).map(|_| BinaryHeap::new()).collect(),
            entries,
            cursor: vec![0; k],
        }
    }

    /// Records that `point` now belongs to `group`.
    fn enter(&mut self, costs: &ArrayView2<f64>, point: usize, group: usize) {
        let row = costs.row(point);
        for to in (0..self.k).filter(|&to| to != group) {
            self.heaps[group * self.k + to].push(Reverse(Candidate {
                delta: row[to] - row[group],
                point,
            }));
        }
    }

    fn best_move(&mut self, from: usize, to: usize, assignment: &[Option<usize>]) -> Option<Candidate> {
        let heap = &mut self.heaps[from * self.k + to];
        while let Some(&Reverse(top)) = heap.peek() {
            if assignment[top.point] == Some(from) {
                return Some(top);
            }
            heap.pop();
        }
        None
    }

    fn best_entry(&mut self, group: usize, assignment: &[Option<usize>]) -> Option<usize> {
        let order = &self.entries[group];
        let cursor = &mut self.cursor[group];
        while *cursor < order.len() && assignment[order[*cursor]].is_some() {
            *cursor += 1;
        }
        order.get(*cursor).copied()
    }
}

/// Assigns each row of `costs` (points × groups) to a group so that every
/// group ends up with between `min_size` and `max_size` points and the total
/// cost is minimal.
pub fn min_cost_assignment(
    costs: &ArrayView2<f64>,
    min_size: usize,
    max_size: usize,
) -> Result<Array1<usize>> {
    let (n, k) = costs.dim();
    if k == 0 || min_size > max_size || min_size * k > n || max_size * k < n {
        return Err(Error::InfeasibleCapacity {
            min_size,
            drivers: k,
            points: n,
        });
    }

    let mut assignment: Vec<Option<usize>> = vec![None; n];
    let mut sizes = vec![0usize; k];
    let mut dist = vec![f64::INFINITY; k];
    let mut pred = vec![Pred::Source(0); k];
    let mut best_move = Array2::<(f64, usize)>::from_elem((k, k), (f64::INFINITY, 0));
    let mut moves = Moves::new(costs);

    for _ in 0..n {
        for c in 0..k {
            match moves.best_entry(c, &assignment) {
                Some(p) => {
                    dist[c] = costs[[p, c]];
                    pred[c] = Pred::Source(p);
                }
                None => dist[c] = f64::INFINITY,
            }
            for b in 0..k {
                best_move[[c, b]] = match moves.best_move(c, b, &assignment) {
                    Some(m) if b != c => (m.delta, m.point),
                    _ => (f64::INFINITY, 0),
                };
            }
        }

        // Bellman-Ford over the groups; there are no negative cycles while
        // the current flow is optimal, so k rounds suffice. Only groups
        // whose distance dropped in the last round are relaxed from.
        let mut dirty: Vec<bool> = dist.iter().map(|d| d.is_finite()).collect();
        for _ in 0..k {
            let mut next = vec![false; k];
            for a in (0..k).filter(|&a| dirty[a]) {
                for b in 0..k {
                    let (delta, point) = best_move[[a, b]];
                    if dist[a] + delta < dist[b] - EPS {
                        dist[b] = dist[a] + delta;
                        pred[b] = Pred::Move { from: a, point };
                        next[b] = true;
                    }
                }
            }
            if !next.contains(&true) {
                break;
            }
            dirty = next;
        }

        let target = (0..k)
            .filter(|&c| sizes[c] < max_size && dist[c].is_finite())
            .min_by(|&a, &b| {
                (sizes[a] >= min_size)
                    .cmp(&(sizes[b] >= min_size))
                    .then(dist[a].total_cmp(&dist[b]))
            })
            .ok_or_else(|| Error::InfeasibleCapacity {
                min_size,
                drivers: k,
                points: n,
            })?;

        for (point, group) in augment(target, &pred, &mut assignment, k, costs)? {
            moves.enter(costs, point, group);
        }
        sizes[target] += 1;
    }

    assignment
        .into_iter()
        .map(|a| a.ok_or_else(|| Error::validation("point left unassigned")))
        .collect::<Result<Vec<usize>>>()
        .map(Array1::from_vec)
}

/// Walks the predecessor chain back from `target`, applying every move.
/// Returns the `(point, group)` moves that were applied.
fn augment(
    target: usize,
    pred: &[Pred],
    assignment: &mut [Option<usize>],
    k: usize,
    costs: &ArrayView2<f64>,
) -> Result<Vec<(usize, usize)>> {
    let mut chain = Vec::new();
    let mut group = target;
    loop {
        match pred[group] {
            Pred::Source(point) => {
                chain.push((point, group));
                break;
            }
            Pred::Move { from, point } => {
                chain.push((point, group));
                group = from;
            }
        }
        if chain.len() > k {
            // A rounding-induced cycle; fall back to the cheapest direct entry.
            log::debug!("discarding cyclic augmenting path into group {target}");
            let point = (0..assignment.len())
                .filter(|&p| assignment[p].is_none())
                .min_by(|&a, &b| costs[[a, target]].total_cmp(&costs[[b, target]]))
                .ok_or_else(|| Error::validation("no unassigned point left"))?;
            assignment[point] = Some(target);
            return Ok(vec![(point, target)]);
        }
    }
    for &(point, group) in &chain {
        assignment[point] = Some(group);
    }
    Ok(chain)
}

#[cfg(test)]
mod test {
    use ndarray::array;

    use super::min_cost_assignment;
    use crate::error::Error;

    fn total(costs: &ndarray::Array2<f64>, assignment: &ndarray::Array1<usize>) -> f64 {
        assignment
            .iter()
            .enumerate()
            .map(|(p, &c)| costs[[p, c]])
            .sum()
    }

    /// Exhaustive search over all assignments, for small instances.
    fn brute_force(costs: &ndarray::Array2<f64>, min: usize, max: usize) -> f64 {
        let (n, k) = costs.dim();
        let mut best = f64::INFINITY;
        for code in 0..k.pow(n as u32) {
            let mut sizes = vec![0; k];
            let mut c = code;
            let mut cost = 0.0;
            for p in 0..n {
                let g = c % k;
                c /= k;
                sizes[g] += 1;
                cost += costs[[p, g]];
            }
            if sizes.iter().all(|&s| s >= min && s <= max) {
                best = best.min(cost);
            }
        }
        best
    }

    #[test]
    fn test_unconstrained_picks_nearest() {
        let costs = array![[1.0, 5.0], [4.0, 2.0], [0.5, 9.0]];
        let a = min_cost_assignment(&costs.view(), 0, 3).unwrap();
        assert_eq!(a.to_vec(), vec![0, 1, 0]);
    }

    #[test]
    fn test_max_size_forces_chain() {
        // everyone prefers group 0 but it only holds one point
        let costs = array![[0.0, 10.0, 20.0], [1.0, 2.0, 30.0], [2.0, 3.0, 4.0]];
        let a = min_cost_assignment(&costs.view(), 0, 1).unwrap();
        assert_eq!(total(&costs, &a), brute_force(&costs, 0, 1));
        assert_eq!(a.to_vec(), vec![0, 1, 2]);
    }

    #[test]
    fn test_min_size_is_honoured() {
        let costs = array![[0.0, 9.0], [0.1, 9.0], [0.2, 9.0], [0.3, 9.0]];
        let a = min_cost_assignment(&costs.view(), 2, 4).unwrap();
        assert_eq!(a.iter().filter(|&&g| g == 1).count(), 2);
        assert_eq!(total(&costs, &a), brute_force(&costs, 2, 4));
    }

    #[test]
    fn test_matches_brute_force() {
        // deterministic pseudo-random costs
        let mut state = 7u64;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as f64 / (1u64 << 31) as f64
        };
        for (n, k, min, max) in [(6, 2, 2, 4), (7, 3, 1, 3), (6, 3, 2, 2), (5, 2, 0, 3)] {
            let costs = ndarray::Array2::from_shape_fn((n, k), |_| next());
            let a = min_cost_assignment(&costs.view(), min, max).unwrap();
            let expected = brute_force(&costs, min, max);
            assert!((total(&costs, &a) - expected).abs() < 1e-9, "{n} {k} {min} {max}");
        }
    }

    #[test]
    fn test_large_instance_has_no_improving_exchange() {
        let data = crate::test::make_blobs(2, 30, 6, 1.0, 10.0, 3);
        let centers = crate::test::make_blobs(2, 1, 8, 0.0, 10.0, 11);
        let costs = ndarray::Array2::from_shape_fn((data.nrows(), centers.nrows()), |(p, c)| {
            (&data.row(p) - &centers.row(c)).mapv(|x| x * x).sum()
        });
        let (min, max) = (18, 26);
        let a = min_cost_assignment(&costs.view(), min, max).unwrap();

        let mut sizes = vec![0; centers.nrows()];
        a.iter().for_each(|&g| sizes[g] += 1);
        assert!(sizes.iter().all(|&s| (min..=max).contains(&s)), "{sizes:?}");

        // an optimal assignment admits no cheaper swap or single move
        for p in 0..a.len() {
            for q in 0..a.len() {
                let swap = costs[[p, a[q]]] + costs[[q, a[p]]] - costs[[p, a[p]]] - costs[[q, a[q]]];
                assert!(swap > -1e-9, "swapping {p} and {q} saves {swap}");
            }
            for g in 0..centers.nrows() {
                if g != a[p] && sizes[g] < max && sizes[a[p]] > min {
                    assert!(costs[[p, g]] - costs[[p, a[p]]] > -1e-9, "moving {p} to {g}");
                }
            }
        }
    }

    #[test]
    fn test_infeasible_bounds() {
        let costs = array![[0.0, 1.0], [1.0, 0.0], [0.5, 0.5]];
        assert!(matches!(
            min_cost_assignment(&costs.view(), 2, 3),
            Err(Error::InfeasibleCapacity { .. })
        ));
        assert!(matches!(
            min_cost_assignment(&costs.view(), 0, 1),
            Err(Error::InfeasibleCapacity { .. })
        ));
    }
}
