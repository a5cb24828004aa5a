//! Interactive creation of a settings file.

use camera_calib_core::{
    CalibrationSettings, GridPattern, ImageSourceKind, SettingsError, SettingsFile, SettingsIoError,
};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
pub enum WizardError {
    #[error("input ended before {0} was entered")]
    UnexpectedEof(&'static str),
    #[error("invalid {field}: \"{value}\"")]
    InvalidValue { field: &'static str, value: String },
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    SettingsIo(#[from] SettingsIoError),
    #[error("console I/O failed: {0}")]
    Io(#[from] io::Error),
}

struct Prompter<'a, R, W> {
    input: &'a mut R,
    out: &'a mut W,
}

impl<R: BufRead, W: Write> Prompter<'_, R, W> {
    fn line(&mut self, label: &str, field: &'static str) -> Result<String, WizardError> {
        write!(self.out, " {label}: ")?;
        self.out.flush()?;
        let mut buf = String::new();
        if self.input.read_line(&mut buf)? == 0 {
            return Err(WizardError::UnexpectedEof(field));
        }
        Ok(buf.trim().to_string())
    }

    fn value<T: FromStr>(&mut self, label: &str, field: &'static str) -> Result<T, WizardError> {
        let raw = self.line(label, field)?;
        raw.parse()
            .map_err(|_| WizardError::InvalidValue { field, value: raw })
    }
}

fn pattern_from_index(index: i64) -> Option<GridPattern> {
    usize::try_from(index)
        .ok()
        .and_then(|i| GridPattern::ALL.get(i).copied())
}

/// Ask for every settings field, validate the answers and write them to
/// `path` as pretty JSON.
///
/// The circle detector settings path is only asked for circle patterns.
pub fn create_settings_file<R: BufRead, W: Write>(
    path: &Path,
    input: &mut R,
    out: &mut W,
) -> Result<SettingsFile, WizardError> {
    writeln!(out, " - Enter following fields ->")?;
    let mut p = Prompter { input, out };

    let camera_parameters_file_path =
        p.line("Calibration parameters file path", "camera_parameters_file_path")?;
    let source_type = p.line("Image source type (directory / stream)", "image_source_type")?;
    let source_type: ImageSourceKind = source_type.parse()?;
    let image_source_path = p.line("Image source path", "image_source_path")?;
    let required_images_count: i64 =
        p.value("Required calibration images count", "required_images_count")?;

    let board_type: i64 = p.value(
        "Calibration board type (CHESSBOARD: 0, SYMMETRIC_CIRCLE_GRID: 1, ASYMMETRIC_CIRCLE_GRID: 2)",
        "calibration_grid_pattern",
    )?;
    let pattern = pattern_from_index(board_type).ok_or(WizardError::InvalidValue {
        field: "calibration_grid_pattern",
        value: board_type.to_string(),
    })?;
    let rows: i64 = p.value(
        "Calibration board height (points per column)",
        "calibration_board_size",
    )?;
    let cols: i64 = p.value(
        "Calibration board width (points per row)",
        "calibration_board_size",
    )?;
    let distance_between_points: f64 =
        p.value("Distance between points", "distance_between_points")?;

    let circle_detector_settings_path = if pattern.is_circle_grid() {
        Some(p.line("Circle detector settings path", "circle_detector_settings_path")?)
    } else {
        None
    };

    let file = SettingsFile {
        calibration_grid_pattern: pattern.as_str().to_string(),
        calibration_board_size: [rows, cols],
        distance_between_points,
        image_source_type: source_type.as_str().to_string(),
        image_source_path,
        camera_parameters_file_path,
        circle_detector_settings_path,
        required_images_count: Some(required_images_count),
    };
    CalibrationSettings::validate(&file)?;
    file.write_json(path)?;
    log::info!("settings written to {}", path.display());
    Ok(file)
}

/// ` - Start camera calibration? 1 (yes) / 0 (no): `
pub fn confirm_start<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
) -> Result<bool, WizardError> {
    write!(out, " - Start camera calibration? 1 (yes) / 0 (no): ")?;
    out.flush()?;
    let mut buf = String::new();
    if input.read_line(&mut buf)? == 0 {
        return Ok(false);
    }
    match buf.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" => Ok(true),
        "0" | "n" | "no" | "" => Ok(false),
        other => Err(WizardError::InvalidValue {
            field: "answer",
            value: other.to_string(),
        }),
    }
}
