//! Multi-threshold blob extraction for circle-grid targets.
//!
//! The image is binarised at a ladder of thresholds. Each binarisation is
//! split into 4-connected components, components are filtered by shape and
//! the surviving centres are grouped across thresholds. A blob is reported
//! once it was seen at `min_repeatability` thresholds.

use crate::DetectorConfigError;
use camera_calib_core::GrayImageView;
use kiddo::{KdTree, SquaredEuclidean};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Blob filter settings, stored as camelCase JSON next to the calibration
/// settings. Absent keys take the defaults below.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlobDetectorParams {
    pub threshold_step: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    /// Thresholds a blob must survive to be reported.
    pub min_repeatability: usize,
    pub min_dist_between_blobs: f64,

    pub filter_by_color: bool,
    /// 0 for dark blobs on a bright background, 255 for the opposite.
    pub blob_color: u8,

    pub filter_by_area: bool,
    pub min_area: f64,
    pub max_area: f64,

    pub filter_by_circularity: bool,
    pub min_circularity: f64,

    pub filter_by_inertia: bool,
    pub min_inertia_ratio: f64,

    pub filter_by_convexity: bool,
    pub min_convexity: f64,
}

impl Default for BlobDetectorParams {
    fn default() -> Self {
        Self {
            threshold_step: 10.0,
            min_threshold: 50.0,
            max_threshold: 220.0,
            min_repeatability: 2,
            min_dist_between_blobs: 10.0,
            filter_by_color: true,
            blob_color: 0,
            filter_by_area: true,
            min_area: 25.0,
            max_area: 5000.0,
            filter_by_circularity: false,
            min_circularity: 0.8,
            filter_by_inertia: true,
            min_inertia_ratio: 0.1,
            filter_by_convexity: true,
            min_convexity: 0.95,
        }
    }
}

impl BlobDetectorParams {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DetectorConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DetectorConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| DetectorConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    fn thresholds(&self) -> impl Iterator<Item = f64> + '_ {
        let step = if self.threshold_step > 0.0 {
            self.threshold_step
        } else {
            f64::INFINITY
        };
        std::iter::successors(Some(self.min_threshold), move |t| Some(t + step))
            .take_while(move |t| *t < self.max_threshold)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blob {
    pub center: Point2<f64>,
    /// Pixel count.
    pub area: f64,
    pub radius: f64,
}

/// Shape statistics of one connected component.
#[derive(Clone, Debug)]
pub(crate) struct Component {
    pub area: f64,
    pub center: Point2<f64>,
    pub radius: f64,
    pub circularity: f64,
    pub inertia_ratio: f64,
    pub convexity: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Polarity {
    Dark,
    Bright,
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

/// Lattice points covered by the convex hull of `pixels` (Pick's theorem).
fn hull_lattice_count(pixels: &[Point2<f64>]) -> f64 {
    let hull = crate::grid::convex_hull(pixels);
    if hull.len() < 3 {
        // degenerate: the pixels lie on one line
        return pixels.len() as f64;
    }
    let mut twice_area = 0.0;
    let mut boundary = 0i64;
    for (k, &i) in hull.iter().enumerate() {
        let a = pixels[i];
        let b = pixels[hull[(k + 1) % hull.len()]];
        twice_area += a.x * b.y - b.x * a.y;
        boundary += gcd((b.x - a.x) as i64, (b.y - a.y) as i64);
    }
    twice_area.abs() / 2.0 + boundary as f64 / 2.0 + 1.0
}

fn describe(
    image: &GrayImageView<'_>,
    members: &[usize],
    in_component: impl Fn(usize, usize) -> bool,
) -> Component {
    let w = image.width;
    let n = members.len() as f64;
    let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    let mut edges = 0usize;
    let mut boundary = Vec::new();

    for &idx in members {
        let (x, y) = (idx % w, idx / w);
        let (fx, fy) = (x as f64, y as f64);
        sx += fx;
        sy += fy;
        sxx += fx * fx;
        syy += fy * fy;
        sxy += fx * fy;

        let open = [
            !in_component(x - 1, y),
            !in_component(x + 1, y),
            !in_component(x, y - 1),
            !in_component(x, y + 1),
        ]
        .iter()
        .filter(|&&o| o)
        .count();
        if open > 0 {
            edges += open;
            boundary.push(Point2::new(fx, fy));
        }
    }

    let center = Point2::new(sx / n, sy / n);
    let mu20 = sxx / n - center.x * center.x;
    let mu02 = syy / n - center.y * center.y;
    let mu11 = sxy / n - center.x * center.y;
    let half_trace = 0.5 * (mu20 + mu02);
    let spread = (0.25 * (mu20 - mu02).powi(2) + mu11 * mu11).sqrt();
    let (l_max, l_min) = (half_trace + spread, half_trace - spread);
    let inertia_ratio = if l_max > 1e-12 { (l_min / l_max).max(0.0) } else { 1.0 };

    // unit pixel edges overestimate a smooth outline by 4/π
    let perimeter = edges as f64 * std::f64::consts::FRAC_PI_4;
    let circularity = 4.0 * std::f64::consts::PI * n / (perimeter * perimeter);

    let mean_boundary = boundary.iter().map(|p| (p - center).norm()).sum::<f64>()
        / boundary.len().max(1) as f64;
    let radius = mean_boundary + 0.5;

    Component {
        area: n,
        center,
        radius,
        circularity,
        inertia_ratio,
        convexity: n / hull_lattice_count(&boundary),
    }
}

/// 4-connected components of the binarised image that do not touch the
/// image border.
pub(crate) fn components(
    image: &GrayImageView<'_>,
    threshold: f64,
    polarity: Polarity,
) -> Vec<Component> {
    let (w, h) = (image.width, image.height);
    let on = |idx: usize| {
        let v = image.data[idx] as f64;
        match polarity {
            Polarity::Dark => v < threshold,
            Polarity::Bright => v >= threshold,
        }
    };

    let mut label = vec![0u32; w * h];
    let mut next = 0u32;
    let mut stack = Vec::new();
    let mut out = Vec::new();

    for start in 0..w * h {
        if label[start] != 0 || !on(start) {
            continue;
        }
        next += 1;
        label[start] = next;
        stack.push(start);
        let mut members = Vec::new();
        let mut touches_border = false;

        while let Some(idx) = stack.pop() {
            members.push(idx);
            let (x, y) = (idx % w, idx / w);
            if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                touches_border = true;
            }
            let mut visit = |nx: usize, ny: usize| {
                let n = ny * w + nx;
                if label[n] == 0 && on(n) {
                    label[n] = next;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(x - 1, y);
            }
            if x + 1 < w {
                visit(x + 1, y);
            }
            if y > 0 {
                visit(x, y - 1);
            }
            if y + 1 < h {
                visit(x, y + 1);
            }
        }

        if touches_border {
            continue;
        }
        let id = next;
        out.push(describe(image, &members, |x, y| label[y * w + x] == id));
    }
    out
}

fn passes(c: &Component, p: &BlobDetectorParams) -> bool {
    if p.filter_by_area && !(c.area >= p.min_area && c.area < p.max_area) {
        return false;
    }
    if p.filter_by_circularity && c.circularity < p.min_circularity {
        return false;
    }
    if p.filter_by_inertia && c.inertia_ratio < p.min_inertia_ratio {
        return false;
    }
    if p.filter_by_convexity && c.convexity < p.min_convexity {
        return false;
    }
    true
}

/// Blobs that survive the filters at enough thresholds, averaged over the
/// thresholds they were seen at.
pub fn detect_blobs(image: &GrayImageView<'_>, params: &BlobDetectorParams) -> Vec<Blob> {
    let polarities: &[Polarity] = match (params.filter_by_color, params.blob_color) {
        (true, 0) => &[Polarity::Dark],
        (true, _) => &[Polarity::Bright],
        (false, _) => &[Polarity::Dark, Polarity::Bright],
    };

    let mut groups: Vec<Vec<Component>> = Vec::new();
    for t in params.thresholds() {
        let current: Vec<Component> = polarities
            .iter()
            .flat_map(|&pol| components(image, t, pol))
            .filter(|c| passes(c, params))
            .collect();

        let coords: Vec<[f64; 2]> = groups.iter().map(|g| [g[0].center.x, g[0].center.y]).collect();
        let tree: KdTree<f64, 2> = (&coords).into();
        let mut fresh = Vec::new();
        for c in current {
            if !groups.is_empty() {
                let nn = tree.nearest_one::<SquaredEuclidean>(&[c.center.x, c.center.y]);
                let g = nn.item as usize;
                let dist = nn.distance.sqrt();
                let distinct = dist >= params.min_dist_between_blobs
                    && dist >= groups[g][0].radius
                    && dist >= c.radius;
                if !distinct {
                    groups[g].push(c);
                    continue;
                }
            }
            fresh.push(vec![c]);
        }
        groups.extend(fresh);
    }

    let blobs: Vec<Blob> = groups
        .into_iter()
        .filter(|g| g.len() >= params.min_repeatability.max(1))
        .map(|mut g| {
            let n = g.len() as f64;
            let (sx, sy, sa) = g.iter().fold((0.0, 0.0, 0.0), |(x, y, a), c| {
                (x + c.center.x, y + c.center.y, a + c.area)
            });
            g.sort_by(|a, b| a.radius.total_cmp(&b.radius));
            Blob {
                center: Point2::new(sx / n, sy / n),
                area: sa / n,
                radius: g[g.len() / 2].radius,
            }
        })
        .collect();
    debug!("blob detector kept {} blobs", blobs.len());
    blobs
}
