use crate::image::ImageSize;
use crate::reference::ReferencePoints;
use nalgebra::Point2;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("observation has {image} image points for {reference} reference points")]
pub struct PointCountMismatch {
    pub reference: usize,
    pub image: usize,
}

/// One accepted view: board points paired index-by-index with their pixel
/// locations in detection order.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    reference_points: ReferencePoints,
    image_points: Vec<Point2<f64>>,
}

impl Observation {
    pub fn new(
        reference_points: ReferencePoints,
        image_points: Vec<Point2<f64>>,
    ) -> Result<Self, PointCountMismatch> {
        if reference_points.len() != image_points.len() {
            return Err(PointCountMismatch {
                reference: reference_points.len(),
                image: image_points.len(),
            });
        }
        Ok(Self {
            reference_points,
            image_points,
        })
    }

    pub fn reference_points(&self) -> &ReferencePoints {
        &self.reference_points
    }

    pub fn image_points(&self) -> &[Point2<f64>] {
        &self.image_points
    }

    pub fn into_image_points(self) -> Vec<Point2<f64>> {
        self.image_points
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}

/// Everything a finalized session hands to the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationSet {
    pub reference: ReferencePoints,
    pub image_size: ImageSize,
    pub observations: Vec<Observation>,
}

impl ObservationSet {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
