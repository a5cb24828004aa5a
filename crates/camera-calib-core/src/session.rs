//! Frame-at-a-time capture loops.
//!
//! Interactive mode acquires a frame, evaluates it, then blocks on a
//! bounded key read that doubles as frame pacing. Directory mode accepts
//! every frame with a detected pattern and silently skips the rest.
//! Acquisition failures end the session; refusals do not.

use crate::collector::{ObservationCollector, UserRefusal};
use crate::image::GrayImage;
use crate::traits::{PatternDetector, SubpixelRefiner};
use log::{debug, info};
use std::time::Duration;

pub const FRAMES_PER_SECOND: u64 = 25;

/// Key-read timeout per frame.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(1000 / FRAMES_PER_SECOND);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Accept the current candidate.
    Space,
    /// Finalize and solve.
    Enter,
    /// Abort without solving.
    Escape,
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("unable to decode frame {frame}: {source}")]
    Decode {
        frame: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("unable to read frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces frames in acquisition order; `Ok(None)` marks the end.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, FrameError>;
}

/// Edge-triggered key input: one `Some(key)` per press.
pub trait KeyInput {
    /// Wait up to `timeout` for a key press.
    fn wait_key(&mut self, timeout: Duration) -> std::io::Result<Option<Key>>;
}

impl<T: FrameSource + ?Sized> FrameSource for &mut T {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, FrameError> {
        (**self).next_frame()
    }
}

impl<T: KeyInput + ?Sized> KeyInput for &mut T {
    fn wait_key(&mut self, timeout: Duration) -> std::io::Result<Option<Key>> {
        (**self).wait_key(timeout)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    FrameEvaluated { index: usize, found: bool },
    Accepted { count: usize },
    /// Directory mode: frame without a detectable pattern.
    Excluded { index: usize },
    Refused(UserRefusal),
    Finalized { count: usize },
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    Finalized,
    Aborted,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("unable to read image from source: {0}")]
    Frame(#[from] FrameError),
    #[error("unable to read image from source: end of stream")]
    EndOfStream,
    #[error("key input failed: {0}")]
    Keys(#[source] std::io::Error),
    #[error("insufficient number of calibration images: {accepted} available, {required} required")]
    InsufficientObservations { accepted: usize, required: usize },
    #[error(transparent)]
    Refused(#[from] UserRefusal),
}

/// Drive an interactive session until the user finalizes or aborts.
pub fn run_interactive<D, R, F, K, E>(
    collector: &mut ObservationCollector<'_, D, R>,
    frames: &mut F,
    keys: &mut K,
    mut on_event: E,
) -> Result<SessionOutcome, SessionError>
where
    D: PatternDetector,
    R: SubpixelRefiner,
    F: FrameSource + ?Sized,
    K: KeyInput + ?Sized,
    E: FnMut(&SessionEvent),
{
    let mut index = 0usize;
    loop {
        let frame = frames.next_frame()?.ok_or(SessionError::EndOfStream)?;
        let found = collector.evaluate_frame(frame)?;
        on_event(&SessionEvent::FrameEvaluated { index, found });
        index += 1;

        match keys.wait_key(FRAME_INTERVAL).map_err(SessionError::Keys)? {
            Some(Key::Space) => match collector.accept() {
                Ok(count) => on_event(&SessionEvent::Accepted { count }),
                Err(refusal) => on_event(&SessionEvent::Refused(refusal)),
            },
            Some(Key::Enter) => match collector.finalize() {
                Ok(()) => {
                    on_event(&SessionEvent::Finalized {
                        count: collector.observation_count(),
                    });
                    return Ok(SessionOutcome::Finalized);
                }
                Err(refusal) => on_event(&SessionEvent::Refused(refusal)),
            },
            Some(Key::Escape) => {
                collector.abort();
                on_event(&SessionEvent::Aborted);
                return Ok(SessionOutcome::Aborted);
            }
            None => {}
        }
    }
}

/// Consume every frame of a finite source, accepting each detected pattern,
/// then finalize. Too few detections is fatal here.
pub fn run_batch<D, R, F, E>(
    collector: &mut ObservationCollector<'_, D, R>,
    frames: &mut F,
    mut on_event: E,
) -> Result<SessionOutcome, SessionError>
where
    D: PatternDetector,
    R: SubpixelRefiner,
    F: FrameSource + ?Sized,
    E: FnMut(&SessionEvent),
{
    let mut index = 0usize;
    while let Some(frame) = frames.next_frame()? {
        if collector.evaluate_frame(frame)? {
            let count = collector.accept()?;
            on_event(&SessionEvent::Accepted { count });
        } else {
            debug!("frame {index}: pattern not found, excluded");
            on_event(&SessionEvent::Excluded { index });
        }
        index += 1;
    }
    info!(
        "directory scan complete: {} of {} images usable",
        collector.observation_count(),
        index
    );

    match collector.finalize() {
        Ok(()) => {
            on_event(&SessionEvent::Finalized {
                count: collector.observation_count(),
            });
            Ok(SessionOutcome::Finalized)
        }
        Err(UserRefusal::InsufficientObservations { accepted, required }) => {
            Err(SessionError::InsufficientObservations { accepted, required })
        }
        Err(other) => Err(other.into()),
    }
}
