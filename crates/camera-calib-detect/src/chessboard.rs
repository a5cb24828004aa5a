use crate::grid::assemble_grid;
use camera_calib_core::{
    generate_pattern_points, BoardSize, GrayImageView, GridPattern, PatternDetector,
};
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Parameters handed to the `chess-corners` ChESS detector.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// Responses below this fraction of the strongest one are dropped.
    pub threshold_rel: f32,

    /// Half side of the non-maximum suppression window.
    pub nms_radius: u32,

    /// Minimum number of positive response pixels around a peak.
    pub min_cluster_size: u32,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
            min_cluster_size: 2,
        }
    }
}

impl ChessboardParams {
    pub fn chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.params.threshold_rel = self.threshold_rel;
        cfg.params.nms_radius = self.nms_radius;
        cfg.params.min_cluster_size = self.min_cluster_size;
        cfg
    }
}

/// X-junction candidate with sub-pixel position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CornerCandidate {
    pub position: Point2<f64>,
    pub strength: f64,
}

fn adapt_chess_corner(c: &CornerDescriptor) -> CornerCandidate {
    CornerCandidate {
        position: Point2::new(c.x as f64, c.y as f64),
        strength: c.response as f64,
    }
}

/// Chessboard inner-corner detector: ChESS corners from `chess-corners`,
/// then ordering by grid assembly.
#[derive(Clone, Debug, Default)]
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// All X-junction candidates, strongest first.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, image),
            fields(width = image.width, height = image.height)
        )
    )]
    pub fn candidates(&self, image: &GrayImageView<'_>) -> Vec<CornerCandidate> {
        let (Ok(w), Ok(h)) = (u32::try_from(image.width), u32::try_from(image.height)) else {
            return Vec::new();
        };
        let Some(img) = ::image::GrayImage::from_raw(w, h, image.data.to_vec()) else {
            return Vec::new();
        };
        let cfg = self.params.chess_config();
        let mut out: Vec<CornerCandidate> = find_chess_corners_image(&img, &cfg)
            .iter()
            .map(adapt_chess_corner)
            .collect();
        out.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        out
    }
}

impl PatternDetector for ChessboardDetector {
    fn detect(&self, image: &GrayImageView<'_>, board: BoardSize) -> Option<Vec<Point2<f64>>> {
        if board.rows < 2 || board.cols < 2 {
            return None;
        }
        let n = board.point_count();
        let candidates = self.candidates(image);
        debug!(
            "found {} chessboard corner candidates, need {}",
            candidates.len(),
            n
        );
        if candidates.len() < n {
            return None;
        }

        let points: Vec<Point2<f64>> = candidates.iter().take(n).map(|c| c.position).collect();
        let ideal: Vec<Point2<f64>> = generate_pattern_points(GridPattern::Chessboard, board, 1.0)
            .iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect();
        let ordered = assemble_grid(&points, &ideal);
        if ordered.is_none() {
            debug!("chessboard candidates do not form a {board} grid");
        }
        ordered
    }
}
