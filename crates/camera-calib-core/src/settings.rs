//! Calibration session settings.
//!
//! [`SettingsFile`] is the raw JSON layout as written by hand or by the
//! settings wizard. [`CalibrationSettings::validate`] turns it into the
//! immutable value every other component borrows. Validation never
//! substitutes defaults for bad values; each rejection carries its own
//! [`SettingsError`] variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Minimum number of accepted observations when neither the CLI nor the
/// settings file overrides it.
pub const DEFAULT_REQUIRED_OBSERVATIONS: usize = 15;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("unsupported calibration grid pattern \"{0}\" (expected chessboard, symmetric_circle_grid or asymmetric_circle_grid)")]
    UnsupportedPattern(String),
    #[error("unsupported image source type \"{0}\" (expected directory or stream)")]
    UnsupportedSourceKind(String),
    #[error(
        "calibration board size must be positive with at most {max} points, got {rows}x{cols}",
        max = MAX_BOARD_POINTS
    )]
    InvalidBoardSize { rows: i64, cols: i64 },
    #[error("distance between points must be a positive finite number, got {0}")]
    InvalidSpacing(f64),
    #[error("required number of calibration images must be > 0, got {0}")]
    InvalidRequiredCount(i64),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("circle detector settings path is required for the {0} pattern")]
    MissingCircleDetectorSettings(GridPattern),
}

#[derive(thiserror::Error, Debug)]
pub enum SettingsIoError {
    #[error("unable to open settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Calibration target layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridPattern {
    Chessboard,
    SymmetricCircleGrid,
    AsymmetricCircleGrid,
}

impl GridPattern {
    pub const ALL: [GridPattern; 3] = [
        GridPattern::Chessboard,
        GridPattern::SymmetricCircleGrid,
        GridPattern::AsymmetricCircleGrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GridPattern::Chessboard => "chessboard",
            GridPattern::SymmetricCircleGrid => "symmetric_circle_grid",
            GridPattern::AsymmetricCircleGrid => "asymmetric_circle_grid",
        }
    }

    pub fn is_circle_grid(&self) -> bool {
        !matches!(self, GridPattern::Chessboard)
    }
}

impl fmt::Display for GridPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GridPattern {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GridPattern::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| SettingsError::UnsupportedPattern(s.to_string()))
    }
}

/// Upper bound on `rows × cols` for a configured board.
pub const MAX_BOARD_POINTS: usize = 1 << 16;

/// Count of interior feature points: `rows` lines of `cols` points each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardSize {
    pub rows: usize,
    pub cols: usize,
}

impl BoardSize {
    pub fn new(rows: i64, cols: i64) -> Result<Self, SettingsError> {
        let invalid = || SettingsError::InvalidBoardSize { rows, cols };
        let r = usize::try_from(rows).ok().filter(|&r| r > 0).ok_or_else(invalid)?;
        let c = usize::try_from(cols).ok().filter(|&c| c > 0).ok_or_else(invalid)?;
        match r.checked_mul(c) {
            Some(n) if n <= MAX_BOARD_POINTS => Ok(Self { rows: r, cols: c }),
            _ => Err(invalid()),
        }
    }

    pub fn point_count(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }
}

impl fmt::Display for BoardSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSourceKind {
    Stream,
    Directory,
}

impl ImageSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSourceKind::Stream => "stream",
            ImageSourceKind::Directory => "directory",
        }
    }
}

impl fmt::Display for ImageSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSourceKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(ImageSourceKind::Stream),
            "directory" => Ok(ImageSourceKind::Directory),
            other => Err(SettingsError::UnsupportedSourceKind(other.to_string())),
        }
    }
}

/// Settings file as stored on disk.
///
/// Geometry fields are signed so that negative values reach validation and
/// are reported as such instead of failing deserialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    pub calibration_grid_pattern: String,
    /// `[height, width]`, i.e. rows then points per row.
    pub calibration_board_size: [i64; 2],
    pub distance_between_points: f64,
    pub image_source_type: String,
    pub image_source_path: String,
    pub camera_parameters_file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circle_detector_settings_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_images_count: Option<i64>,
}

impl SettingsFile {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SettingsIoError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SettingsIoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| SettingsIoError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), SettingsIoError> {
        let path = path.as_ref();
        let io_err = |source| SettingsIoError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| {
            SettingsIoError::Json {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.write_all(b"\n").map_err(io_err)?;
        writer.flush().map_err(io_err)
    }
}

/// Validated, immutable session configuration.
///
/// Components receive it by reference; there is no process-wide copy.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSettings {
    pattern: GridPattern,
    board_size: BoardSize,
    point_spacing: f64,
    source_kind: ImageSourceKind,
    source_locator: String,
    output_parameters_path: PathBuf,
    required_observation_count: usize,
    circle_detector_settings_path: Option<PathBuf>,
}

fn required_count(value: i64) -> Result<usize, SettingsError> {
    if value <= 0 {
        return Err(SettingsError::InvalidRequiredCount(value));
    }
    Ok(value as usize)
}

fn non_empty(value: &str, field: &'static str) -> Result<(), SettingsError> {
    if value.trim().is_empty() {
        return Err(SettingsError::EmptyField(field));
    }
    Ok(())
}

impl CalibrationSettings {
    pub fn validate(raw: &SettingsFile) -> Result<Self, SettingsError> {
        let pattern: GridPattern = raw.calibration_grid_pattern.parse()?;
        let [rows, cols] = raw.calibration_board_size;
        let board_size = BoardSize::new(rows, cols)?;

        let spacing = raw.distance_between_points;
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(SettingsError::InvalidSpacing(spacing));
        }

        let source_kind: ImageSourceKind = raw.image_source_type.parse()?;
        non_empty(&raw.image_source_path, "image_source_path")?;
        non_empty(
            &raw.camera_parameters_file_path,
            "camera_parameters_file_path",
        )?;

        let required_observation_count = match raw.required_images_count {
            Some(n) => required_count(n)?,
            None => DEFAULT_REQUIRED_OBSERVATIONS,
        };

        // Only circle grids consult the blob detector settings.
        let circle_detector_settings_path = if pattern.is_circle_grid() {
            match raw.circle_detector_settings_path.as_deref().map(str::trim) {
                Some(p) if !p.is_empty() => Some(PathBuf::from(p)),
                _ => return Err(SettingsError::MissingCircleDetectorSettings(pattern)),
            }
        } else {
            None
        };

        Ok(Self {
            pattern,
            board_size,
            point_spacing: spacing,
            source_kind,
            source_locator: raw.image_source_path.clone(),
            output_parameters_path: PathBuf::from(&raw.camera_parameters_file_path),
            required_observation_count,
            circle_detector_settings_path,
        })
    }

    /// Override the minimum observation count (e.g. from `--number`).
    pub fn with_required_observation_count(mut self, count: i64) -> Result<Self, SettingsError> {
        self.required_observation_count = required_count(count)?;
        Ok(self)
    }

    pub fn pattern(&self) -> GridPattern {
        self.pattern
    }

    pub fn board_size(&self) -> BoardSize {
        self.board_size
    }

    pub fn point_spacing(&self) -> f64 {
        self.point_spacing
    }

    pub fn image_source_kind(&self) -> ImageSourceKind {
        self.source_kind
    }

    pub fn image_source_locator(&self) -> &str {
        &self.source_locator
    }

    pub fn output_parameters_path(&self) -> &Path {
        &self.output_parameters_path
    }

    pub fn required_observation_count(&self) -> usize {
        self.required_observation_count
    }

    pub fn circle_detector_settings_path(&self) -> Option<&Path> {
        self.circle_detector_settings_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> SettingsFile {
        SettingsFile {
            calibration_grid_pattern: "chessboard".to_string(),
            calibration_board_size: [4, 6],
            distance_between_points: 0.0265,
            image_source_type: "directory".to_string(),
            image_source_path: "images".to_string(),
            camera_parameters_file_path: "camera.txt".to_string(),
            circle_detector_settings_path: None,
            required_images_count: None,
        }
    }

    #[test]
    fn accepts_valid_chessboard_settings() {
        let settings = CalibrationSettings::validate(&raw()).expect("valid");
        assert_eq!(settings.pattern(), GridPattern::Chessboard);
        assert_eq!(settings.board_size(), BoardSize { rows: 4, cols: 6 });
        assert_eq!(settings.image_source_kind(), ImageSourceKind::Directory);
        assert_eq!(
            settings.required_observation_count(),
            DEFAULT_REQUIRED_OBSERVATIONS
        );
        assert!(settings.circle_detector_settings_path().is_none());
    }

    #[test]
    fn rejects_unknown_pattern_and_source() {
        let mut r = raw();
        r.calibration_grid_pattern = "charuco".into();
        assert_eq!(
            CalibrationSettings::validate(&r),
            Err(SettingsError::UnsupportedPattern("charuco".into()))
        );

        let mut r = raw();
        r.image_source_type = "camera".into();
        assert_eq!(
            CalibrationSettings::validate(&r),
            Err(SettingsError::UnsupportedSourceKind("camera".into()))
        );
    }

    #[test]
    fn rejects_non_positive_geometry() {
        for size in [[0, 6], [4, -1]] {
            let mut r = raw();
            r.calibration_board_size = size;
            assert!(matches!(
                CalibrationSettings::validate(&r),
                Err(SettingsError::InvalidBoardSize { .. })
            ));
        }
        for size in [[i64::MAX, 4], [100_000, 100_000], [i64::MIN, 2]] {
            let mut r = raw();
            r.calibration_board_size = size;
            assert_eq!(
                CalibrationSettings::validate(&r),
                Err(SettingsError::InvalidBoardSize {
                    rows: size[0],
                    cols: size[1]
                })
            );
        }
        for spacing in [0.0, -0.01, f64::NAN] {
            let mut r = raw();
            r.distance_between_points = spacing;
            assert!(matches!(
                CalibrationSettings::validate(&r),
                Err(SettingsError::InvalidSpacing(_))
            ));
        }
    }

    #[test]
    fn board_size_is_bounded() {
        let largest = BoardSize::new(256, 256).expect("at the limit");
        assert_eq!(largest.point_count(), MAX_BOARD_POINTS);
        assert!(BoardSize::new(256, 257).is_err());
        let err = BoardSize::new(i64::MAX, 4).unwrap_err();
        assert!(err.to_string().contains("at most 65536 points"), "{err}");
    }

    #[test]
    fn circle_patterns_require_detector_settings() {
        let mut r = raw();
        r.calibration_grid_pattern = "asymmetric_circle_grid".into();
        assert_eq!(
            CalibrationSettings::validate(&r),
            Err(SettingsError::MissingCircleDetectorSettings(
                GridPattern::AsymmetricCircleGrid
            ))
        );

        r.circle_detector_settings_path = Some("blobs.json".into());
        let settings = CalibrationSettings::validate(&r).expect("valid");
        assert_eq!(
            settings.circle_detector_settings_path(),
            Some(Path::new("blobs.json"))
        );
    }

    #[test]
    fn chessboard_ignores_detector_settings_path() {
        let mut r = raw();
        r.circle_detector_settings_path = Some("blobs.json".into());
        let settings = CalibrationSettings::validate(&r).expect("valid");
        assert!(settings.circle_detector_settings_path().is_none());
    }

    #[test]
    fn required_count_precedence() {
        let mut r = raw();
        r.required_images_count = Some(20);
        let settings = CalibrationSettings::validate(&r).expect("valid");
        assert_eq!(settings.required_observation_count(), 20);

        let settings = settings
            .with_required_observation_count(5)
            .expect("override");
        assert_eq!(settings.required_observation_count(), 5);

        assert_eq!(
            CalibrationSettings::validate(&raw())
                .expect("valid")
                .with_required_observation_count(0),
            Err(SettingsError::InvalidRequiredCount(0))
        );
    }

    #[test]
    fn json_round_trip_uses_documented_field_names() {
        let json = r#"{
            "calibration_grid_pattern": "chessboard",
            "calibration_board_size": [4, 6],
            "distance_between_points": 0.0265,
            "image_source_type": "stream",
            "image_source_path": "frames/img_%03d.png",
            "camera_parameters_file_path": "camera.txt"
        }"#;
        let parsed: SettingsFile = serde_json::from_str(json).expect("parse");
        let settings = CalibrationSettings::validate(&parsed).expect("valid");
        assert_eq!(settings.image_source_kind(), ImageSourceKind::Stream);
        assert_eq!(settings.board_size().point_count(), 24);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        parsed.write_json(&path).expect("write");
        assert_eq!(SettingsFile::load_json(&path).expect("load"), parsed);
    }

    #[test]
    fn missing_settings_file_is_io_error() {
        let err = SettingsFile::load_json("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, SettingsIoError::Io { .. }));
    }
}
