//! Ordering an unordered point cloud into board scan order.
//!
//! The outline of a planar grid stays a quadrilateral under perspective, so
//! four of the salient hull vertices of the detected points correspond to
//! the four extreme vertices of the ideal layout. Each choice of four image
//! vertices and each of the eight ways to pair them seeds a homography; the
//! seed is grown by nearest-neighbour assignment and refit on all points.
//! Hypotheses that assign every layout point to a distinct candidate within
//! tolerance are valid; among valid ones the ordering that starts closest to
//! the image origin and runs rightwards wins.

use camera_calib_core::{estimate_homography, Homography};
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Point2;

/// Assignment must land within this fraction of the local grid step.
const ASSIGN_TOLERANCE: f64 = 0.3;
/// Image hull vertices kept as seed candidates; detection noise turns
/// near-collinear edge points into extra hull vertices.
const SEED_VERTICES: usize = 8;
const REFIT_ROUNDS: usize = 3;

fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Indices of the convex hull (counter-clockwise in a y-up frame),
/// collinear points excluded.
pub(crate) fn convex_hull(points: &[Point2<f64>]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..points.len()).collect();
    idx.sort_by(|&a, &b| {
        points[a]
            .x
            .total_cmp(&points[b].x)
            .then(points[a].y.total_cmp(&points[b].y))
    });
    if idx.len() < 3 {
        return idx;
    }

    let mut hull: Vec<usize> = Vec::with_capacity(2 * idx.len());
    for pass in 0..2 {
        let start = hull.len();
        let iter: Box<dyn Iterator<Item = &usize>> = if pass == 0 {
            Box::new(idx.iter())
        } else {
            Box::new(idx.iter().rev())
        };
        for &i in iter {
            while hull.len() >= start + 2
                && cross(
                    points[hull[hull.len() - 2]],
                    points[hull[hull.len() - 1]],
                    points[i],
                ) <= 1e-9
            {
                hull.pop();
            }
            hull.push(i);
        }
        hull.pop();
    }
    hull
}

fn line_distance(p: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    let len = (b - a).norm();
    if len < 1e-12 {
        return (p - a).norm();
    }
    cross(a, b, p).abs() / len
}

/// Hull reduced to at most `keep` of its most salient vertices, in hull
/// order. Salience is the distance of a vertex to the line through its
/// two neighbours.
pub(crate) fn outline_vertices(points: &[Point2<f64>], keep: usize) -> Option<Vec<usize>> {
    let mut hull = convex_hull(points);
    if hull.len() < 4 {
        return None;
    }
    while hull.len() > keep.max(4) {
        let n = hull.len();
        let (weakest, _) = (0..n)
            .map(|i| {
                let prev = points[hull[(i + n - 1) % n]];
                let next = points[hull[(i + 1) % n]];
                (i, line_distance(points[hull[i]], prev, next))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        hull.remove(weakest);
    }
    Some(hull)
}

pub(crate) fn outline_corners(points: &[Point2<f64>]) -> Option<[usize; 4]> {
    let hull = outline_vertices(points, 4)?;
    Some([hull[0], hull[1], hull[2], hull[3]])
}

/// Every 4-subset of `0..n`, increasing, so cyclic hull order is kept.
fn quads(n: usize) -> impl Iterator<Item = [usize; 4]> {
    (0..n).flat_map(move |a| {
        (a + 1..n).flat_map(move |b| {
            (b + 1..n).flat_map(move |c| (c + 1..n).map(move |d| [a, b, c, d]))
        })
    })
}

fn min_pairwise_distance(points: &[Point2<f64>]) -> f64 {
    let mut best = f64::INFINITY;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            best = best.min((a - b).norm());
        }
    }
    best
}

struct Hypothesis {
    ordered: Vec<Point2<f64>>,
    rms: f64,
}

struct Assigner<'a> {
    candidates: &'a [Point2<f64>],
    tree: KdTree<f64, 2>,
    ideal: &'a [Point2<f64>],
    ideal_step: f64,
}

impl<'a> Assigner<'a> {
    fn new(candidates: &'a [Point2<f64>], ideal: &'a [Point2<f64>]) -> Self {
        let coords: Vec<[f64; 2]> = candidates.iter().map(|p| [p.x, p.y]).collect();
        let tree: KdTree<f64, 2> = (&coords).into();
        Self {
            candidates,
            tree,
            ideal,
            ideal_step: min_pairwise_distance(ideal),
        }
    }

    fn local_step(&self, h: &Homography, q: Point2<f64>) -> f64 {
        let p = h.apply(q);
        let dx = h.apply(Point2::new(q.x + self.ideal_step, q.y));
        let dy = h.apply(Point2::new(q.x, q.y + self.ideal_step));
        (dx - p).norm().min((dy - p).norm())
    }

    /// One nearest-neighbour pass; `None` if any layout point is unmatched
    /// or two layout points claim the same candidate.
    fn assign(&self, h: &Homography) -> Option<(Vec<usize>, f64)> {
        let mut used = vec![false; self.candidates.len()];
        let mut order = Vec::with_capacity(self.ideal.len());
        let mut sq_sum = 0.0;
        for &q in self.ideal {
            let p = h.apply(q);
            if !(p.x.is_finite() && p.y.is_finite()) {
                return None;
            }
            let nn = self.tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y]);
            let idx = nn.item as usize;
            let tol = ASSIGN_TOLERANCE * self.local_step(h, q);
            if idx >= used.len() || used[idx] || nn.distance > tol * tol {
                return None;
            }
            used[idx] = true;
            sq_sum += nn.distance;
            order.push(idx);
        }
        Some((order, (sq_sum / self.ideal.len() as f64).sqrt()))
    }

    fn grow(&self, seed: Homography) -> Option<Hypothesis> {
        let mut h = seed;
        let mut result = None;
        for _ in 0..REFIT_ROUNDS {
            let (order, rms) = self.assign(&h)?;
            let matched: Vec<Point2<f64>> = order.iter().map(|&i| self.candidates[i]).collect();
            h = estimate_homography(self.ideal, &matched)?;
            result = Some(Hypothesis {
                ordered: matched,
                rms,
            });
        }
        result
    }
}

/// Order `candidates` to match `ideal` (layout coordinates in scan order).
///
/// Requires exactly one candidate per layout point.
pub fn assemble_grid(
    candidates: &[Point2<f64>],
    ideal: &[Point2<f64>],
) -> Option<Vec<Point2<f64>>> {
    if candidates.len() != ideal.len() || ideal.len() < 4 {
        return None;
    }
    let img_hull = outline_vertices(candidates, SEED_VERTICES)?;
    let ideal_corners = outline_corners(ideal)?;
    let src: Vec<Point2<f64>> = ideal_corners.iter().map(|&i| ideal[i]).collect();
    let assigner = Assigner::new(candidates, ideal);

    let mut valid = Vec::new();
    for quad in quads(img_hull.len()) {
        for rot in 0..4 {
            for reversed in [false, true] {
                let dst: Vec<Point2<f64>> = (0..4)
                    .map(|k| {
                        let j = if reversed { (rot + 4 - k) % 4 } else { (rot + k) % 4 };
                        candidates[img_hull[quad[j]]]
                    })
                    .collect();
                let Some(seed) = estimate_homography(&src, &dst) else {
                    continue;
                };
                if let Some(hyp) = assigner.grow(seed) {
                    valid.push(hyp);
                }
            }
        }
    }

    pick_canonical(valid)
}

fn pick_canonical(valid: Vec<Hypothesis>) -> Option<Vec<Point2<f64>>> {
    let first = valid.first()?;
    let step = (first.ordered[1] - first.ordered[0]).norm();
    let origin_score = |h: &Hypothesis| h.ordered[0].x + h.ordered[0].y;
    let best_origin = valid
        .iter()
        .map(origin_score)
        .fold(f64::INFINITY, f64::min);

    valid
        .into_iter()
        .filter(|h| origin_score(h) <= best_origin + 0.25 * step)
        .max_by(|a, b| {
            let ra = a.ordered[1].x - a.ordered[0].x;
            let rb = b.ordered[1].x - b.ordered[0].x;
            ra.total_cmp(&rb).then(b.rms.total_cmp(&a.rms))
        })
        .map(|h| h.ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_calib_core::{generate_pattern_points, BoardSize, GridPattern};
    use nalgebra::Matrix3;

    fn layout(pattern: GridPattern, rows: usize, cols: usize) -> Vec<Point2<f64>> {
        generate_pattern_points(pattern, BoardSize { rows, cols }, 1.0)
            .iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect()
    }

    fn perspective() -> Homography {
        Homography::new(Matrix3::new(
            30.0, 4.0, 100.0, //
            -3.0, 28.0, 80.0, //
            0.0004, 0.0009, 1.0,
        ))
    }

    /// Deterministic shuffle so the input order carries no information.
    fn shuffled(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        let mut out: Vec<Point2<f64>> = points.to_vec();
        let n = out.len();
        for i in 0..n {
            out.swap(i, (i * 7 + 3) % n);
        }
        out
    }

    #[test]
    fn hull_of_grid_reduces_to_four_corners() {
        let ideal = layout(GridPattern::Chessboard, 4, 6);
        let corners = outline_corners(&ideal).expect("corners");
        let mut pts: Vec<(i64, i64)> = corners
            .iter()
            .map(|&i| (ideal[i].x as i64, ideal[i].y as i64))
            .collect();
        pts.sort();
        assert_eq!(pts, vec![(0, 0), (0, 3), (5, 0), (5, 3)]);
    }

    #[test]
    fn recovers_scan_order_under_perspective() {
        let ideal = layout(GridPattern::Chessboard, 4, 6);
        let h = perspective();
        let truth: Vec<Point2<f64>> = ideal.iter().map(|&q| h.apply(q)).collect();
        let ordered = assemble_grid(&shuffled(&truth), &ideal).expect("grid");
        for (a, b) in ordered.iter().zip(&truth) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn recovers_asymmetric_layout() {
        let ideal = layout(GridPattern::AsymmetricCircleGrid, 5, 3);
        let h = perspective();
        let truth: Vec<Point2<f64>> = ideal.iter().map(|&q| h.apply(q)).collect();
        let ordered = assemble_grid(&shuffled(&truth), &ideal).expect("grid");
        // scan order up to the layout's own symmetry: a single homography
        // still maps the layout onto the ordering
        let fit = estimate_homography(&ideal, &ordered).expect("fit");
        for (q, p) in ideal.iter().zip(&ordered) {
            assert!((fit.apply(*q) - p).norm() < 1e-6);
        }
        assert!((ordered[0] - truth[0]).norm() < 1e-9);
    }

    #[test]
    fn rejects_wrong_point_count_or_scattered_points() {
        let ideal = layout(GridPattern::Chessboard, 3, 3);
        let h = perspective();
        let truth: Vec<Point2<f64>> = ideal.iter().map(|&q| h.apply(q)).collect();
        assert!(assemble_grid(&truth[..8], &ideal).is_none());

        let mut broken = truth.clone();
        broken[4] = Point2::new(broken[4].x + 9.0, broken[4].y - 11.0);
        assert!(assemble_grid(&broken, &ideal).is_none());
    }
}
