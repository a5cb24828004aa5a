//! Capture-session state machine.
//!
//! ```text
//! AwaitingFrame ──frame──▶ PatternEvaluated{found}
//!        ▲                    │ accept (found only)
//!        │                    ▼
//!        └──────frame──── ObservationAccepted
//!
//! any ──finalize (count ≥ required)──▶ Finalizing ──finish──▶ ObservationSet
//! any ──abort──▶ Done
//! ```
//!
//! User actions that are not allowed in the current state are refused with
//! a [`UserRefusal`]; refusals never change the accumulated observations.

use crate::image::{GrayImage, ImageSize};
use crate::observation::{Observation, ObservationSet};
use crate::reference::{generate_for_pattern, ReferencePoints};
use crate::settings::{CalibrationSettings, GridPattern};
use crate::traits::{PatternDetector, RefineParams, SubpixelRefiner};
use log::{debug, info, warn};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    AwaitingFrame,
    PatternEvaluated { found: bool },
    ObservationAccepted,
    Finalizing,
    Done,
}

/// Non-fatal refusal of a user action; the session continues.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UserRefusal {
    #[error("unable to accept image: pattern was not found")]
    PatternNotFound,
    #[error("current image has already been accepted")]
    CandidateAlreadyAccepted,
    #[error("insufficient number of calibration images: {accepted} accepted, {required} required")]
    InsufficientObservations { accepted: usize, required: usize },
    #[error("session is finished")]
    SessionClosed,
    #[error("session has not been finalized")]
    NotFinalized,
}

struct Candidate {
    frame: GrayImage,
    points: Vec<Point2<f64>>,
}

pub struct ObservationCollector<'s, D, R> {
    settings: &'s CalibrationSettings,
    detector: D,
    refiner: R,
    refine_params: RefineParams,
    reference: ReferencePoints,
    state: CaptureState,
    candidate: Option<Candidate>,
    observations: Vec<Observation>,
    image_size: Option<ImageSize>,
}

impl<'s, D, R> ObservationCollector<'s, D, R>
where
    D: PatternDetector,
    R: SubpixelRefiner,
{
    pub fn new(settings: &'s CalibrationSettings, detector: D, refiner: R) -> Self {
        let reference = generate_for_pattern(
            settings.pattern(),
            settings.board_size(),
            settings.point_spacing(),
        );
        Self {
            settings,
            detector,
            refiner,
            refine_params: RefineParams::default(),
            reference,
            state: CaptureState::AwaitingFrame,
            candidate: None,
            observations: Vec::new(),
            image_size: None,
        }
    }

    pub fn with_refine_params(mut self, params: RefineParams) -> Self {
        self.refine_params = params;
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn settings(&self) -> &CalibrationSettings {
        self.settings
    }

    pub fn reference(&self) -> &ReferencePoints {
        &self.reference
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn required_observation_count(&self) -> usize {
        self.settings.required_observation_count()
    }

    /// Frame size shared by every accepted observation, once known.
    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    /// Detected points of the current candidate, for display.
    pub fn candidate_points(&self) -> Option<&[Point2<f64>]> {
        self.candidate.as_ref().map(|c| c.points.as_slice())
    }

    fn is_closed(&self) -> bool {
        matches!(self.state, CaptureState::Finalizing | CaptureState::Done)
    }

    /// Run the detector on a new frame. Returns whether the frame is a
    /// candidate for acceptance.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, frame),
            fields(width = frame.width, height = frame.height)
        )
    )]
    pub fn evaluate_frame(&mut self, frame: GrayImage) -> Result<bool, UserRefusal> {
        if self.is_closed() {
            return Err(UserRefusal::SessionClosed);
        }
        self.candidate = None;

        if let Some(size) = self.image_size {
            if frame.size() != size {
                warn!(
                    "frame size {} differs from session frame size {}, ignoring frame",
                    frame.size(),
                    size
                );
                self.state = CaptureState::PatternEvaluated { found: false };
                return Ok(false);
            }
        }

        let board = self.settings.board_size();
        let detected = self.detector.detect(&frame.view(), board);
        let found = match detected {
            Some(points) if points.len() == board.point_count() => {
                self.candidate = Some(Candidate { frame, points });
                true
            }
            Some(points) => {
                warn!(
                    "detector returned {} points for a {} board, treating as not found",
                    points.len(),
                    board
                );
                false
            }
            None => false,
        };
        debug!("frame evaluated: pattern found={found}");
        self.state = CaptureState::PatternEvaluated { found };
        Ok(found)
    }

    /// Accept the current candidate as an observation. Returns the new
    /// observation count.
    pub fn accept(&mut self) -> Result<usize, UserRefusal> {
        match self.state {
            CaptureState::PatternEvaluated { found: true } => {}
            CaptureState::ObservationAccepted => return Err(UserRefusal::CandidateAlreadyAccepted),
            CaptureState::Finalizing | CaptureState::Done => return Err(UserRefusal::SessionClosed),
            CaptureState::AwaitingFrame | CaptureState::PatternEvaluated { found: false } => {
                info!("unable to accept image: pattern was not found");
                return Err(UserRefusal::PatternNotFound);
            }
        }
        let Some(Candidate { frame, mut points }) = self.candidate.take() else {
            return Err(UserRefusal::PatternNotFound);
        };

        // Circle centres are already blob centroids.
        if self.settings.pattern() == GridPattern::Chessboard {
            self.refiner
                .refine(&frame.view(), &mut points, &self.refine_params);
        }

        let observation = Observation::new(self.reference.clone(), points)
            .map_err(|_| UserRefusal::PatternNotFound)?;
        self.image_size.get_or_insert(frame.size());
        self.observations.push(observation);
        self.state = CaptureState::ObservationAccepted;

        let count = self.observations.len();
        info!("calibration image accepted [calibration image number: {count}]");
        Ok(count)
    }

    /// Close the session for solving, provided enough observations exist.
    pub fn finalize(&mut self) -> Result<(), UserRefusal> {
        match self.state {
            CaptureState::Done => Err(UserRefusal::SessionClosed),
            CaptureState::Finalizing => Ok(()),
            _ => {
                let accepted = self.observations.len();
                let required = self.settings.required_observation_count();
                if accepted < required {
                    info!("insufficient number of calibration images: {accepted}/{required}");
                    return Err(UserRefusal::InsufficientObservations { accepted, required });
                }
                self.candidate = None;
                self.state = CaptureState::Finalizing;
                info!("session finalized with {accepted} observations");
                Ok(())
            }
        }
    }

    /// End the session without solving. Valid in every state.
    pub fn abort(&mut self) {
        self.candidate = None;
        self.state = CaptureState::Done;
        info!(
            "session aborted with {} accepted observations",
            self.observations.len()
        );
    }

    /// Hand the accumulated observations over, in acceptance order.
    pub fn finish(self) -> Result<ObservationSet, UserRefusal> {
        match self.state {
            CaptureState::Finalizing => Ok(ObservationSet {
                reference: self.reference,
                image_size: self.image_size.unwrap_or(ImageSize::UNSPECIFIED),
                observations: self.observations,
            }),
            CaptureState::Done => Err(UserRefusal::SessionClosed),
            _ => Err(UserRefusal::NotFinalized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::GrayImageView;
    use crate::settings::{BoardSize, SettingsFile};
    use std::cell::Cell;

    /// Finds the board whenever the first pixel is non-zero; the value
    /// shifts the reported points so frames can be told apart.
    struct FirstPixelDetector;

    impl PatternDetector for FirstPixelDetector {
        fn detect(&self, image: &GrayImageView<'_>, board: BoardSize) -> Option<Vec<Point2<f64>>> {
            let tag = image.data[0];
            (tag != 0).then(|| {
                (0..board.point_count())
                    .map(|i| Point2::new(i as f64 + tag as f64, tag as f64))
                    .collect()
            })
        }
    }

    #[derive(Default)]
    struct CountingRefiner {
        calls: Cell<usize>,
    }

    impl SubpixelRefiner for CountingRefiner {
        fn refine(&self, _: &GrayImageView<'_>, points: &mut [Point2<f64>], _: &RefineParams) {
            self.calls.set(self.calls.get() + 1);
            for p in points {
                p.y += 0.5;
            }
        }
    }

    fn settings(pattern: &str, required: i64) -> CalibrationSettings {
        CalibrationSettings::validate(&SettingsFile {
            calibration_grid_pattern: pattern.to_string(),
            calibration_board_size: [2, 3],
            distance_between_points: 0.5,
            image_source_type: "stream".into(),
            image_source_path: "frames/%02d.png".into(),
            camera_parameters_file_path: "camera.txt".into(),
            circle_detector_settings_path: Some("blobs.json".into()),
            required_images_count: Some(required),
        })
        .expect("valid settings")
    }

    fn frame(tag: u8) -> GrayImage {
        GrayImage::filled(8, 6, tag)
    }

    #[test]
    fn never_accepts_without_a_found_pattern() {
        let s = settings("chessboard", 1);
        let mut c = ObservationCollector::new(&s, FirstPixelDetector, CountingRefiner::default());

        assert_eq!(c.accept(), Err(UserRefusal::PatternNotFound));
        assert!(!c.evaluate_frame(frame(0)).expect("open"));
        assert_eq!(c.state(), CaptureState::PatternEvaluated { found: false });
        assert_eq!(c.accept(), Err(UserRefusal::PatternNotFound));
        assert_eq!(c.observation_count(), 0);

        // a found frame followed by a missed one drops the stale candidate
        assert!(c.evaluate_frame(frame(3)).expect("open"));
        assert!(!c.evaluate_frame(frame(0)).expect("open"));
        assert_eq!(c.accept(), Err(UserRefusal::PatternNotFound));
        assert_eq!(c.observation_count(), 0);
    }

    #[test]
    fn one_observation_per_candidate() {
        let s = settings("chessboard", 1);
        let mut c = ObservationCollector::new(&s, FirstPixelDetector, CountingRefiner::default());
        assert!(c.evaluate_frame(frame(1)).expect("open"));
        assert_eq!(c.accept(), Ok(1));
        assert_eq!(c.state(), CaptureState::ObservationAccepted);
        assert_eq!(c.accept(), Err(UserRefusal::CandidateAlreadyAccepted));
        assert_eq!(c.observation_count(), 1);
        assert_eq!(c.image_size(), Some(ImageSize::new(8, 6)));
    }

    #[test]
    fn finalize_is_gated_by_required_count() {
        let s = settings("chessboard", 3);
        let mut c = ObservationCollector::new(&s, FirstPixelDetector, CountingRefiner::default());
        for n in 1..=3u8 {
            assert_eq!(
                c.finalize(),
                Err(UserRefusal::InsufficientObservations {
                    accepted: n as usize - 1,
                    required: 3
                })
            );
            assert!(c.evaluate_frame(frame(n)).expect("open"));
            c.accept().expect("accept");
        }
        assert_eq!(c.finalize(), Ok(()));
        assert_eq!(c.state(), CaptureState::Finalizing);
        assert_eq!(c.evaluate_frame(frame(9)), Err(UserRefusal::SessionClosed));
        assert_eq!(c.accept(), Err(UserRefusal::SessionClosed));

        let set = c.finish().expect("finalized");
        assert_eq!(set.len(), 3);
        assert_eq!(set.image_size, ImageSize::new(8, 6));
    }

    #[test]
    fn observations_keep_acceptance_order() {
        let s = settings("chessboard", 2);
        let mut c = ObservationCollector::new(&s, FirstPixelDetector, CountingRefiner::default());
        for tag in [7u8, 2, 5] {
            c.evaluate_frame(frame(tag)).expect("open");
            c.accept().expect("accept");
        }
        c.finalize().expect("finalize");
        let set = c.finish().expect("set");
        let firsts: Vec<f64> = set
            .observations
            .iter()
            .map(|o| o.image_points()[0].x)
            .collect();
        assert_eq!(firsts, vec![7.0, 2.0, 5.0]);
        assert!(set
            .observations
            .iter()
            .all(|o| o.reference_points().same_template(&set.reference)));
    }

    #[test]
    fn refinement_only_applies_to_chessboards() {
        let refiner = CountingRefiner::default();
        let s = settings("chessboard", 1);
        let mut c = ObservationCollector::new(&s, FirstPixelDetector, &refiner);
        c.evaluate_frame(frame(1)).expect("open");
        c.accept().expect("accept");
        assert_eq!(refiner.calls.get(), 1);
        assert_eq!(c.observations()[0].image_points()[0], Point2::new(1.0, 1.5));

        let refiner = CountingRefiner::default();
        let s = settings("symmetric_circle_grid", 1);
        let mut c = ObservationCollector::new(&s, FirstPixelDetector, &refiner);
        c.evaluate_frame(frame(1)).expect("open");
        c.accept().expect("accept");
        assert_eq!(refiner.calls.get(), 0);
    }

    #[test]
    fn abort_closes_the_session_from_any_state() {
        let s = settings("chessboard", 1);
        let mut c = ObservationCollector::new(&s, FirstPixelDetector, CountingRefiner::default());
        c.evaluate_frame(frame(1)).expect("open");
        c.accept().expect("accept");
        c.abort();
        assert_eq!(c.state(), CaptureState::Done);
        assert_eq!(c.finalize(), Err(UserRefusal::SessionClosed));
        assert_eq!(c.finish().unwrap_err(), UserRefusal::SessionClosed);
    }

    #[test]
    fn finish_requires_finalize() {
        let s = settings("chessboard", 1);
        let c = ObservationCollector::new(&s, FirstPixelDetector, CountingRefiner::default());
        assert_eq!(c.finish().unwrap_err(), UserRefusal::NotFinalized);
    }

    #[test]
    fn frames_of_another_size_are_not_candidates() {
        let s = settings("chessboard", 1);
        let mut c = ObservationCollector::new(&s, FirstPixelDetector, CountingRefiner::default());
        c.evaluate_frame(frame(1)).expect("open");
        c.accept().expect("accept");
        assert!(!c
            .evaluate_frame(GrayImage::filled(16, 6, 4))
            .expect("open"));
        assert_eq!(c.accept(), Err(UserRefusal::PatternNotFound));
    }

    #[test]
    fn asymmetric_reference_follows_pattern() {
        let s = settings("asymmetric_circle_grid", 1);
        let c = ObservationCollector::new(&s, FirstPixelDetector, CountingRefiner::default());
        assert_eq!(c.reference()[4].x, 1.5);
    }
}
