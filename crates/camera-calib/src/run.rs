//! Calibration sessions end to end: frames in, parameter file out.

use crate::source::{open_stream, DirectorySource, SourceError};
use crate::wizard::WizardError;
use camera_calib_core::{
    run_batch, run_interactive, store, CalibrationEngine, CalibrationError, CalibrationSettings,
    CalibrationSolver, CameraParameters, FrameSource, KeyInput, ObservationCollector,
    ObservationSet, PatternDetector, SessionError, SessionEvent, SessionOutcome, SettingsError,
    SettingsIoError, StoreError, SubpixelRefiner, UserRefusal,
};
use camera_calib_detect::{CornerRefiner, DetectorConfigError, GridDetector};
use camera_calib_solver::PlanarSolver;
use log::info;
use std::fmt;
use std::io::{self, Write};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    SettingsIo(#[from] SettingsIoError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Refused(#[from] UserRefusal),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    DetectorConfig(#[from] DetectorConfigError),
    #[error(transparent)]
    Wizard(#[from] WizardError),
    #[error("insufficient number of calibration images: {found} available, {required} required")]
    InsufficientImages { found: usize, required: usize },
    #[error("console output failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Calibrated(CameraParameters),
    Aborted,
}

/// Line-oriented progress output. Raw terminal mode needs explicit
/// carriage returns; the first write error is kept and reported at the end.
struct Console<'w, W> {
    out: &'w mut W,
    eol: &'static str,
    error: Option<io::Error>,
}

impl<'w, W: Write> Console<'w, W> {
    fn new(out: &'w mut W, raw_terminal: bool) -> Self {
        Self {
            out,
            eol: if raw_terminal { "\r\n" } else { "\n" },
            error: None,
        }
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if self.error.is_some() {
            return;
        }
        let res = self
            .out
            .write_fmt(args)
            .and_then(|_| self.out.write_all(self.eol.as_bytes()))
            .and_then(|_| self.out.flush());
        if let Err(e) = res {
            self.error = Some(e);
        }
    }

    fn finish(self) -> io::Result<()> {
        self.error.map_or(Ok(()), Err)
    }
}

/// Reports capture events the way the interactive loop presents them.
struct CaptureReport {
    last_found: Option<bool>,
}

impl CaptureReport {
    fn event<W: Write>(&mut self, console: &mut Console<'_, W>, event: &SessionEvent) {
        match event {
            SessionEvent::FrameEvaluated { found, .. } => {
                if self.last_found != Some(*found) {
                    if *found {
                        console.line(format_args!(" - Pattern found."));
                    } else if self.last_found.is_some() {
                        console.line(format_args!(" - Pattern lost."));
                    }
                    self.last_found = Some(*found);
                }
            }
            SessionEvent::Accepted { count } => console.line(format_args!(
                " - Calibration image has been accepted [calibration image number: {count}]."
            )),
            SessionEvent::Refused(UserRefusal::PatternNotFound) => {
                console.line(format_args!(" - Unable to accept image - pattern was not found."))
            }
            SessionEvent::Refused(UserRefusal::InsufficientObservations { required, .. }) => {
                console.line(format_args!(
                    " - Insufficient number of calibration images. Required number: {required}."
                ))
            }
            SessionEvent::Refused(other) => console.line(format_args!(" - {other}.")),
            SessionEvent::Excluded { .. } => {}
            SessionEvent::Finalized { count } => console.line(format_args!(
                " - Image capture finished with {count} calibration images."
            )),
            SessionEvent::Aborted => console.line(format_args!(" - Calibration has been aborted.")),
        }
    }
}

/// Collaborators of a calibration session.
#[derive(Clone, Debug)]
pub struct Pipeline<D, R, S> {
    pub detector: D,
    pub refiner: R,
    pub solver: S,
}

impl Pipeline<GridDetector, CornerRefiner, PlanarSolver> {
    /// The detector chosen by the settings' pattern, the corner refiner and
    /// the planar solver with default options.
    pub fn for_settings(settings: &CalibrationSettings) -> Result<Self, DetectorConfigError> {
        Ok(Self {
            detector: GridDetector::for_settings(settings)?,
            refiner: CornerRefiner::default(),
            solver: PlanarSolver::default(),
        })
    }
}

impl<D, R, S> Pipeline<D, R, S>
where
    D: PatternDetector,
    R: SubpixelRefiner,
    S: CalibrationSolver,
{
    pub fn new(detector: D, refiner: R, solver: S) -> Self {
        Self {
            detector,
            refiner,
            solver,
        }
    }

    fn collector<'s>(
        &self,
        settings: &'s CalibrationSettings,
    ) -> ObservationCollector<'s, &D, &R> {
        ObservationCollector::new(settings, &self.detector, &self.refiner)
    }

    /// Calibrate from every image of the settings' directory.
    ///
    /// Fails before decoding anything when the directory holds fewer image
    /// files than the required observation count, and after the scan when
    /// too few of them show the pattern.
    pub fn run_directory<W: Write>(
        &self,
        settings: &CalibrationSettings,
        out: &mut W,
    ) -> Result<CameraParameters, RunError> {
        let required = settings.required_observation_count();
        let mut frames = DirectorySource::open(settings.image_source_locator())?;
        if frames.len() < required {
            return Err(RunError::InsufficientImages {
                found: frames.len(),
                required,
            });
        }

        let mut collector = self.collector(settings);
        let mut excluded = 0usize;
        let res = run_batch(&mut collector, &mut frames, |e| {
            if matches!(e, SessionEvent::Excluded { .. }) {
                excluded += 1;
            }
        });
        match res {
            Ok(_) => {}
            Err(SessionError::InsufficientObservations { accepted, required }) => {
                return Err(RunError::InsufficientImages {
                    found: accepted,
                    required,
                })
            }
            Err(e) => return Err(e.into()),
        }
        if excluded > 0 {
            info!("{excluded} images excluded, pattern not found");
        }

        let set = collector.finish()?;
        self.solve_and_save(settings, set, out)
    }

    /// Interactive capture from the settings' stream locator.
    pub fn run_stream<K, W>(
        &self,
        settings: &CalibrationSettings,
        keys: &mut K,
        out: &mut W,
    ) -> Result<RunOutcome, RunError>
    where
        K: KeyInput + ?Sized,
        W: Write,
    {
        let mut frames = open_stream(settings.image_source_locator())?;
        self.run_frames(settings, &mut frames, keys, out)
    }

    /// Interactive capture from any frame source. Progress lines end with
    /// `\r\n` since the terminal is in raw mode while keys are read.
    pub fn run_frames<F, K, W>(
        &self,
        settings: &CalibrationSettings,
        frames: &mut F,
        keys: &mut K,
        out: &mut W,
    ) -> Result<RunOutcome, RunError>
    where
        F: FrameSource + ?Sized,
        K: KeyInput + ?Sized,
        W: Write,
    {
        let mut collector = self.collector(settings);
        let mut console = Console::new(out, true);
        console.line(format_args!(
            " - Space: accept image, Enter: calibrate ({} images required), Esc: quit.",
            settings.required_observation_count()
        ));
        let mut report = CaptureReport { last_found: None };
        let outcome =
            run_interactive(&mut collector, frames, keys, |e| report.event(&mut console, e))?;

        let result = match outcome {
            SessionOutcome::Finalized => {
                let set = collector.finish()?;
                self.solve_and_report(settings, set, &mut console)
                    .map(RunOutcome::Calibrated)
            }
            SessionOutcome::Aborted => Ok(RunOutcome::Aborted),
        };
        console.finish()?;
        result
    }

    /// Solve a finalized session and write the parameter file named in the
    /// settings.
    pub fn solve_and_save<W: Write>(
        &self,
        settings: &CalibrationSettings,
        set: ObservationSet,
        out: &mut W,
    ) -> Result<CameraParameters, RunError> {
        let mut console = Console::new(out, false);
        let params = self.solve_and_report(settings, set, &mut console)?;
        console.finish()?;
        Ok(params)
    }

    fn solve_and_report<W: Write>(
        &self,
        settings: &CalibrationSettings,
        set: ObservationSet,
        console: &mut Console<'_, W>,
    ) -> Result<CameraParameters, RunError> {
        console.line(format_args!(" - Camera calibration has started."));
        let params = CalibrationEngine::new(&self.solver).solve_set(set)?;
        console.line(format_args!(" - Camera calibration has been completed."));
        if let Some(rms) = params.rms_error() {
            console.line(format_args!(" - RMS reprojection error: {rms:.4} px."));
        }

        let path = settings.output_parameters_path();
        store::save(&params, path)?;
        console.line(format_args!(
            " - Calibration parameters saved to: {}",
            path.display()
        ));
        Ok(params)
    }
}
