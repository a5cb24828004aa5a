use crate::blob::{detect_blobs, Blob, BlobDetectorParams};
use crate::grid::assemble_grid;
use camera_calib_core::{
    generate_pattern_points, BoardSize, GrayImageView, GridPattern, PatternDetector,
};
use log::debug;
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Arrangement of circle centres on the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircleLayout {
    Symmetric,
    /// Odd rows shifted by half a column pitch.
    Asymmetric,
}

impl CircleLayout {
    fn pattern(self) -> GridPattern {
        match self {
            CircleLayout::Symmetric => GridPattern::SymmetricCircleGrid,
            CircleLayout::Asymmetric => GridPattern::AsymmetricCircleGrid,
        }
    }
}

/// Circle-grid detector: blob extraction followed by grid assembly.
#[derive(Clone, Debug)]
pub struct CircleGridDetector {
    pub params: BlobDetectorParams,
    pub layout: CircleLayout,
}

impl CircleGridDetector {
    pub fn new(params: BlobDetectorParams, layout: CircleLayout) -> Self {
        Self { params, layout }
    }
}

/// Keeps the `n` blobs whose area is closest to the median area.
fn keep_typical(mut blobs: Vec<Blob>, n: usize) -> Vec<Blob> {
    if blobs.len() <= n {
        return blobs;
    }
    let mut areas: Vec<f64> = blobs.iter().map(|b| b.area).collect();
    areas.sort_by(f64::total_cmp);
    let median = areas[areas.len() / 2];
    blobs.sort_by(|a, b| (a.area - median).abs().total_cmp(&(b.area - median).abs()));
    blobs.truncate(n);
    blobs
}

impl PatternDetector for CircleGridDetector {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, image), fields(board = %board))
    )]
    fn detect(&self, image: &GrayImageView<'_>, board: BoardSize) -> Option<Vec<Point2<f64>>> {
        let n = board.point_count();
        if board.rows < 2 || board.cols < 2 {
            return None;
        }
        let blobs = detect_blobs(image, &self.params);
        if blobs.len() < n {
            debug!("found {} blobs, need {}", blobs.len(), n);
            return None;
        }

        let centers: Vec<Point2<f64>> = keep_typical(blobs, n).iter().map(|b| b.center).collect();
        let ideal: Vec<Point2<f64>> = generate_pattern_points(self.layout.pattern(), board, 1.0)
            .iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect();
        assemble_grid(&centers, &ideal)
    }
}
