//! Board-local 3D coordinates of pattern features.

use crate::settings::{BoardSize, GridPattern};
use nalgebra::Point3;
use std::ops::Deref;
use std::sync::Arc;

/// Shared, immutable reference template.
///
/// Generated once per session and cloned cheaply into every observation.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferencePoints(Arc<[Point3<f64>]>);

impl ReferencePoints {
    pub fn as_slice(&self) -> &[Point3<f64>] {
        &self.0
    }

    /// `true` when both handles share the same allocation.
    pub fn same_template(&self, other: &ReferencePoints) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for ReferencePoints {
    type Target = [Point3<f64>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Point3<f64>>> for ReferencePoints {
    fn from(points: Vec<Point3<f64>>) -> Self {
        Self(points.into())
    }
}

/// Row-major grid: for row `i`, column `j`, emit `(j·spacing, i·spacing, 0)`.
pub fn generate(board: BoardSize, spacing: f64) -> ReferencePoints {
    let mut points = Vec::with_capacity(board.point_count());
    for i in 0..board.rows {
        for j in 0..board.cols {
            points.push(Point3::new(j as f64 * spacing, i as f64 * spacing, 0.0));
        }
    }
    points.into()
}

/// Reference layout for a specific pattern.
///
/// Asymmetric circle grids stagger every odd row by one spacing, so each
/// row holds `cols` circles at `(2j + i mod 2)·spacing`.
pub fn generate_for_pattern(
    pattern: GridPattern,
    board: BoardSize,
    spacing: f64,
) -> ReferencePoints {
    match pattern {
        GridPattern::Chessboard | GridPattern::SymmetricCircleGrid => generate(board, spacing),
        GridPattern::AsymmetricCircleGrid => {
            let mut points = Vec::with_capacity(board.point_count());
            for i in 0..board.rows {
                for j in 0..board.cols {
                    let x = (2 * j + i % 2) as f64 * spacing;
                    points.push(Point3::new(x, i as f64 * spacing, 0.0));
                }
            }
            points.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_order_is_row_major() {
        let s = 0.0265;
        for (rows, cols) in [(1, 1), (4, 6), (6, 4), (7, 3)] {
            let board = BoardSize { rows, cols };
            let pts = generate(board, s);
            assert_eq!(pts.len(), rows * cols);
            assert_eq!(pts[0], Point3::origin());
            for i in 0..rows {
                for j in 0..cols {
                    let p = pts[i * cols + j];
                    assert_eq!(p, Point3::new(j as f64 * s, i as f64 * s, 0.0));
                }
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let board = BoardSize { rows: 5, cols: 8 };
        assert_eq!(generate(board, 0.02), generate(board, 0.02));
    }

    #[test]
    fn asymmetric_rows_are_staggered() {
        let board = BoardSize { rows: 3, cols: 2 };
        let pts = generate_for_pattern(GridPattern::AsymmetricCircleGrid, board, 1.0);
        let xy: Vec<(f64, f64)> = pts.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(
            xy,
            vec![
                (0.0, 0.0),
                (2.0, 0.0),
                (1.0, 1.0),
                (3.0, 1.0),
                (0.0, 2.0),
                (2.0, 2.0)
            ]
        );
    }

    #[test]
    fn clones_share_the_template() {
        let pts = generate(BoardSize { rows: 2, cols: 2 }, 1.0);
        let copy = pts.clone();
        assert!(pts.same_template(&copy));
    }
}
