//! Corner refinement by local ChESS re-detection.
//!
//! Each corner is re-detected inside a patch centred on its current
//! position with the saddle-point refiner of `chess-corners-core`; the
//! patch follows the estimate until it moves less than the termination
//! epsilon. `RefineParams::zero_zone` has no effect here, the saddle fit
//! uses the whole patch.

use camera_calib_core::{GrayImageView, RefineParams, SubpixelRefiner};
use chess_corners_core::{
    detect::detect_corners_from_response_with_refiner,
    imageview::ImageView,
    response::{chess_response_u8_patch, Roi},
    ChessParams, Refiner, RefinerKind, SaddlePointConfig,
};
use nalgebra::Point2;

/// Extra patch margin around the search window for the ChESS ring and NMS.
const PATCH_MARGIN: usize = 3;

/// Refines chessboard corners in place.
#[derive(Clone, Debug)]
pub struct CornerRefiner {
    pub chess_params: ChessParams,
}

impl Default for CornerRefiner {
    fn default() -> Self {
        Self {
            chess_params: ChessParams {
                threshold_rel: 0.05,
                nms_radius: 2,
                min_cluster_size: 1,
                refiner: RefinerKind::SaddlePoint(SaddlePointConfig::default()),
                ..ChessParams::default()
            },
        }
    }
}

impl CornerRefiner {
    /// Strongest corner within `radius` of `seed`, if any.
    fn redetect(
        &self,
        image: &GrayImageView<'_>,
        seed: Point2<f64>,
        radius: usize,
    ) -> Option<Point2<f64>> {
        let half = (radius + PATCH_MARGIN) as i64;
        let (sx, sy) = (seed.x.round() as i64, seed.y.round() as i64);
        let x0 = (sx - half).max(0) as usize;
        let y0 = (sy - half).max(0) as usize;
        let x1 = (sx + half + 1).clamp(0, image.width as i64) as usize;
        let y1 = (sy + half + 1).clamp(0, image.height as i64) as usize;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let patch = chess_response_u8_patch(
            image.data,
            image.width,
            image.height,
            &self.chess_params,
            Roi { x0, y0, x1, y1 },
        );
        if patch.w == 0 || patch.h == 0 {
            return None;
        }
        let view = ImageView::with_origin(
            image.width,
            image.height,
            image.data,
            [x0 as i32, y0 as i32],
        )?;

        let mut refiner = Refiner::from_kind(self.chess_params.refiner.clone());
        let max_dist2 = (radius * radius) as f64;
        detect_corners_from_response_with_refiner(
            &patch,
            &self.chess_params,
            Some(view),
            &mut refiner,
        )
        .into_iter()
        .map(|c| {
            let p = Point2::new(c.xy[0] as f64 + x0 as f64, c.xy[1] as f64 + y0 as f64);
            (c.strength, p)
        })
        .filter(|(_, p)| (p - seed).norm_squared() <= max_dist2)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, p)| p)
    }

    pub(crate) fn refine_point(
        &self,
        image: &GrayImageView<'_>,
        start: Point2<f64>,
        params: &RefineParams,
    ) -> Point2<f64> {
        let radius = params.search_window.max(1);
        let mut current = start;
        for _ in 0..params.criteria.max_iterations.max(1) {
            let Some(next) = self.redetect(image, current, radius) else {
                break;
            };
            let moved = (next - current).norm();
            current = next;
            if moved <= params.criteria.epsilon {
                break;
            }
        }

        let offset = current - start;
        if offset.x.abs() > radius as f64 || offset.y.abs() > radius as f64 {
            return start;
        }
        current
    }
}

impl SubpixelRefiner for CornerRefiner {
    fn refine(&self, image: &GrayImageView<'_>, points: &mut [Point2<f64>], params: &RefineParams) {
        for p in points.iter_mut() {
            *p = self.refine_point(image, *p, params);
        }
    }
}
