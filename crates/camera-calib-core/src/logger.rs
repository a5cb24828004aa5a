//! Minimal stderr logger.
//!
//! Records are printed as `[elapsed LEVEL target] message`. The target is
//! shortened to its last path segment so capture-session output stays
//! readable (`collector`, `engine`, `store`, ...). Install once at startup
//! with [`init_with_level`] or [`init_with_verbosity`].

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

struct SessionLogger {
    level: LevelFilter,
    started: Instant,
}

fn short_target(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:7.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            short_target(record.target()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

/// Install the logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| SessionLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Map a repeated `-v` count onto a level filter: 0 = info, 1 = debug,
/// anything above = trace.
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the logger at the level selected by [`level_for_verbosity`].
pub fn init_with_verbosity(verbosity: u8) -> Result<(), log::SetLoggerError> {
    init_with_level(level_for_verbosity(verbosity))
}

/// `RUST_LOG`-style default directive for a `-v` count.
#[cfg(feature = "tracing")]
fn default_directive(verbosity: u8) -> &'static str {
    match level_for_verbosity(verbosity) {
        LevelFilter::Trace => "trace",
        LevelFilter::Debug => "debug",
        _ => "info",
    }
}

/// Install a `tracing` subscriber. `RUST_LOG` wins over `verbosity`.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_shortened_to_last_segment() {
        assert_eq!(short_target("camera_calib_core::collector"), "collector");
        assert_eq!(short_target("main"), "main");
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for_verbosity(0), LevelFilter::Info);
        assert_eq!(level_for_verbosity(1), LevelFilter::Debug);
        assert_eq!(level_for_verbosity(4), LevelFilter::Trace);
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn verbosity_sets_the_tracing_filter() {
        assert_eq!(default_directive(0), "info");
        assert_eq!(default_directive(1), "debug");
        assert_eq!(default_directive(2), "trace");
    }
}
