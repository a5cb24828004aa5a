//! Plain-text parameter file.
//!
//! Layout, one token per line, no header:
//!
//! ```text
//! <camera matrix rows>
//! <camera matrix cols>
//! <camera matrix values, row-major>
//! <distortion rows>
//! <distortion cols>
//! <distortion values, row-major>
//! ```
//!
//! Values are written with Rust's shortest round-trip float formatting, so
//! `load(save(p))` reproduces the camera matrix and distortion coefficients
//! exactly. Poses are not part of the format.

use crate::params::{CameraParameters, DistortionCoefficients};
use nalgebra::{DMatrix, Matrix3};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("unable to access parameter file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed parameter file: {0}")]
    Parse(String),
}

/// Write a matrix as `rows`, `cols`, then every value row-major.
pub fn write_matrix<W: Write>(out: &mut W, m: &DMatrix<f64>) -> std::io::Result<()> {
    writeln!(out, "{}", m.nrows())?;
    writeln!(out, "{}", m.ncols())?;
    for r in 0..m.nrows() {
        for c in 0..m.ncols() {
            writeln!(out, "{}", m[(r, c)])?;
        }
    }
    Ok(())
}

/// Read one matrix block from a whitespace token stream.
pub fn read_matrix<'a, I>(tokens: &mut I, name: &str) -> Result<DMatrix<f64>, StoreError>
where
    I: Iterator<Item = &'a str>,
{
    let rows = read_dim(tokens, name, "row count")?;
    let cols = read_dim(tokens, name, "column count")?;
    let expected = rows
        .checked_mul(cols)
        .ok_or_else(|| StoreError::Parse(format!("{name} dimensions {rows}x{cols} overflow")))?;
    let mut values = Vec::with_capacity(expected.min(64));
    for idx in 0..expected {
        let token = tokens.next().ok_or_else(|| {
            StoreError::Parse(format!(
                "{name} declares {rows}x{cols} values but only {idx} are present"
            ))
        })?;
        let value: f64 = token.parse().map_err(|_| {
            StoreError::Parse(format!("{name} value #{idx} is not a number: \"{token}\""))
        })?;
        values.push(value);
    }
    Ok(DMatrix::from_row_slice(rows, cols, &values))
}

fn read_dim<'a, I>(tokens: &mut I, name: &str, what: &str) -> Result<usize, StoreError>
where
    I: Iterator<Item = &'a str>,
{
    let token = tokens
        .next()
        .ok_or_else(|| StoreError::Parse(format!("missing {name} {what}")))?;
    token
        .parse::<usize>()
        .map_err(|_| StoreError::Parse(format!("{name} {what} is not a count: \"{token}\"")))
}

pub fn save(params: &CameraParameters, path: impl AsRef<Path>) -> Result<(), StoreError> {
    let path = path.as_ref();
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let k = params.camera_matrix();
    let k = DMatrix::from_fn(3, 3, |r, c| k[(r, c)]);
    let dist = DMatrix::from_column_slice(
        params.distortion().len(),
        1,
        params.distortion().as_slice(),
    );

    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    write_matrix(&mut out, &k).map_err(io_err)?;
    write_matrix(&mut out, &dist).map_err(io_err)?;
    out.flush().map_err(io_err)?;

    log::info!("camera parameters saved to {}", path.display());
    Ok(())
}

/// Parse the text layout; the camera matrix must be 3x3 and the distortion
/// block a row or column vector of a supported length.
pub fn parse(text: &str) -> Result<CameraParameters, StoreError> {
    let mut tokens = text.split_whitespace();

    let k = read_matrix(&mut tokens, "camera matrix")?;
    if k.shape() != (3, 3) {
        return Err(StoreError::Parse(format!(
            "camera matrix must be 3x3, found {}x{}",
            k.nrows(),
            k.ncols()
        )));
    }
    let camera_matrix = Matrix3::from_fn(|r, c| k[(r, c)]);

    let d = read_matrix(&mut tokens, "distortion coefficients")?;
    if d.nrows() != 1 && d.ncols() != 1 {
        return Err(StoreError::Parse(format!(
            "distortion coefficients must be a vector, found {}x{}",
            d.nrows(),
            d.ncols()
        )));
    }
    let values: Vec<f64> = d.transpose().iter().copied().collect();
    let distortion =
        DistortionCoefficients::new(values).map_err(|e| StoreError::Parse(e.to_string()))?;

    CameraParameters::from_intrinsics(camera_matrix, distortion)
        .map_err(|e| StoreError::Parse(e.to_string()))
}

pub fn load(path: impl AsRef<Path>) -> Result<CameraParameters, StoreError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let params = parse(&text)?;
    log::debug!("camera parameters loaded from {}", path.display());
    Ok(params)
}
