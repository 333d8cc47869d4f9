use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Approximate length of one degree of latitude, in meters
pub const METERS_PER_DEGREE: f64 = 111_319.49;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl FromStr for Polarization {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(FloodError::InvalidParameter(format!(
                "Invalid polarization: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Polarization {
    type Error = FloodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Orbit pass direction during acquisition
///
/// Input is accepted in any case. The archive stores the value upper-cased
/// (`ASCENDING` / `DESCENDING`), which is what [`PassDirection::archive_value`]
/// returns and what the type serializes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "UPPERCASE")]
pub enum PassDirection {
    Ascending,
    Descending,
}

impl PassDirection {
    /// Normalize free-form caller input to a pass direction
    pub fn normalize(input: &str) -> FloodResult<Self> {
        match input.trim().to_uppercase().as_str() {
            "ASCENDING" => Ok(PassDirection::Ascending),
            "DESCENDING" => Ok(PassDirection::Descending),
            _ => Err(FloodError::InvalidParameter(format!(
                "Invalid pass direction: {} (expected Ascending or Descending)",
                input
            ))),
        }
    }

    /// Value of the archive's `orbitProperties_pass` property
    pub fn archive_value(&self) -> &'static str {
        match self {
            PassDirection::Ascending => "ASCENDING",
            PassDirection::Descending => "DESCENDING",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            PassDirection::Ascending => PassDirection::Descending,
            PassDirection::Descending => PassDirection::Ascending,
        }
    }
}

impl std::fmt::Display for PassDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassDirection::Ascending => write!(f, "Ascending"),
            PassDirection::Descending => write!(f, "Descending"),
        }
    }
}

impl FromStr for PassDirection {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl TryFrom<String> for PassDirection {
    type Error = FloodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::normalize(&value)
    }
}

/// Calendar date window, half-open `[start, end)` like the archive's date filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateWindow")]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateWindow> for DateWindow {
    type Error = FloodError;

    fn try_from(raw: RawDateWindow) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl DateWindow {
    /// Create a window, requiring `start < end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> FloodResult<Self> {
        if start >= end {
            return Err(FloodError::InvalidDateOrdering(format!(
                "window start {} must be before end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse `YYYY-MM-DD:YYYY-MM-DD` (or `..` as separator)
    pub fn parse(input: &str) -> FloodResult<Self> {
        let (start, end) = input
            .split_once("..")
            .or_else(|| input.split_once(':'))
            .ok_or_else(|| {
                FloodError::InvalidParameter(format!(
                    "Date window '{}' must look like 2022-07-01:2022-07-30",
                    input
                ))
            })?;

        let parse_date = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| {
                FloodError::InvalidParameter(format!("Invalid date '{}': {}", s.trim(), e))
            })
        };

        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// True if `date` falls inside `[start, end)`
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Closed polygon bounding the analysis region
///
/// The ring is stored without the repeated closing vertex. Construction
/// rejects rings with fewer than three distinct vertices, zero area, or
/// crossing edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f64; 2]>", into = "Vec<[f64; 2]>")]
pub struct AreaOfInterest {
    ring: Vec<[f64; 2]>,
}

impl AreaOfInterest {
    /// Build an area from an ordered ring of (lon, lat) vertices
    pub fn new<I>(vertices: I) -> FloodResult<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut ring: Vec<[f64; 2]> = Vec::new();
        for (lon, lat) in vertices {
            if !lon.is_finite() || !lat.is_finite() {
                return Err(FloodError::InvalidGeometry(format!(
                    "non-finite vertex ({}, {})",
                    lon, lat
                )));
            }
            // Consecutive duplicates are zero-length edges
            if ring.last() != Some(&[lon, lat]) {
                ring.push([lon, lat]);
            }
        }

        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }

        let mut distinct = ring.clone();
        distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        distinct.dedup();
        if distinct.len() < 3 {
            return Err(FloodError::InvalidGeometry(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                distinct.len()
            )));
        }

        if signed_ring_area(&ring).abs() < 1e-14 {
            return Err(FloodError::InvalidGeometry(
                "polygon has zero area".to_string(),
            ));
        }

        if let Some((a, b)) = first_self_intersection(&ring) {
            return Err(FloodError::InvalidGeometry(format!(
                "polygon edges {} and {} intersect",
                a, b
            )));
        }

        Ok(Self { ring })
    }

    /// Rectangle from its bounds
    pub fn from_bounds(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> FloodResult<Self> {
        Self::new([
            (min_lon, min_lat),
            (max_lon, min_lat),
            (max_lon, max_lat),
            (min_lon, max_lat),
        ])
    }

    /// Vertices without the closing repeat
    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.ring
    }

    /// Vertices with the first one repeated at the end, GeoJSON style
    pub fn closed_ring(&self) -> Vec<[f64; 2]> {
        let mut ring = self.ring.clone();
        ring.push(self.ring[0]);
        ring
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for [lon, lat] in &self.ring {
            bbox.min_lon = bbox.min_lon.min(*lon);
            bbox.max_lon = bbox.max_lon.max(*lon);
            bbox.min_lat = bbox.min_lat.min(*lat);
            bbox.max_lat = bbox.max_lat.max(*lat);
        }
        bbox
    }

    /// Even-odd point in polygon test
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let n = self.ring.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.ring[i];
            let [xj, yj] = self.ring[j];
            if (yi > lat) != (yj > lat) && lon < (xj - xi) * (lat - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Planar area in square degrees
    pub fn area(&self) -> f64 {
        signed_ring_area(&self.ring).abs()
    }

    /// True if the point lies within [`BOUNDARY_TOLERANCE`] of an edge
    pub fn on_boundary(&self, lon: f64, lat: f64) -> bool {
        let n = self.ring.len();
        (0..n).any(|i| {
            point_segment_distance([lon, lat], self.ring[i], self.ring[(i + 1) % n]) <= BOUNDARY_TOLERANCE
        })
    }

    /// Inside or on the boundary
    pub fn covers(&self, lon: f64, lat: f64) -> bool {
        self.contains(lon, lat) || self.on_boundary(lon, lat)
    }

    /// True if the whole axis-aligned rectangle lies inside the polygon or on its boundary
    ///
    /// All four corners must be covered, no polygon vertex may sit strictly
    /// inside the rectangle, and no polygon edge may cross a rectangle edge.
    pub fn covers_rect(&self, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> bool {
        let corners = [
            [min_lon, min_lat],
            [max_lon, min_lat],
            [max_lon, max_lat],
            [min_lon, max_lat],
        ];
        if !corners.iter().all(|&[lon, lat]| self.covers(lon, lat)) {
            return false;
        }

        let strictly_inside = |[lon, lat]: [f64; 2]| {
            lon > min_lon + BOUNDARY_TOLERANCE
                && lon < max_lon - BOUNDARY_TOLERANCE
                && lat > min_lat + BOUNDARY_TOLERANCE
                && lat < max_lat - BOUNDARY_TOLERANCE
        };
        if self.ring.iter().any(|&v| strictly_inside(v)) {
            return false;
        }

        let n = self.ring.len();
        for i in 0..n {
            let (a, b) = (self.ring[i], self.ring[(i + 1) % n]);
            for k in 0..4 {
                if segments_cross(a, b, corners[k], corners[(k + 1) % 4]) {
                    return false;
                }
            }
        }
        true
    }
}

impl TryFrom<Vec<[f64; 2]>> for AreaOfInterest {
    type Error = FloodError;

    fn try_from(value: Vec<[f64; 2]>) -> Result<Self, Self::Error> {
        Self::new(value.into_iter().map(|[lon, lat]| (lon, lat)))
    }
}

impl From<AreaOfInterest> for Vec<[f64; 2]> {
    fn from(value: AreaOfInterest) -> Self {
        value.closed_ring()
    }
}

/// Shoelace area; positive for counter-clockwise rings
pub fn signed_ring_area(ring: &[[f64; 2]]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let [x1, y1] = ring[i];
        let [x2, y2] = ring[(i + 1) % n];
        sum += x1 * y2 - x2 * y1;
    }
    sum / 2.0
}

/// Distance in degrees under which a point counts as lying on a polygon edge
pub const BOUNDARY_TOLERANCE: f64 = 1e-9;

fn point_segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len2 = dx * dx + dy * dy;
    let t = if len2 > 0.0 {
        (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a[0] + t * dx, a[1] + t * dy);
    ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt()
}

/// Side of `r` relative to the line `p -> q`: 1 left, -1 right, 0 on the line within tolerance
fn side(p: [f64; 2], q: [f64; 2], r: [f64; 2]) -> i8 {
    let cross = (q[0] - p[0]) * (r[1] - p[1]) - (q[1] - p[1]) * (r[0] - p[0]);
    let scale = ((q[0] - p[0]).hypot(q[1] - p[1])).max(BOUNDARY_TOLERANCE);
    if cross.abs() <= BOUNDARY_TOLERANCE * scale {
        0
    } else if cross > 0.0 {
        1
    } else {
        -1
    }
}

/// Proper crossing: each segment has the other's endpoints strictly on opposite sides
fn segments_cross(a1: [f64; 2], a2: [f64; 2], b1: [f64; 2], b2: [f64; 2]) -> bool {
    let s1 = side(a1, a2, b1);
    let s2 = side(a1, a2, b2);
    let s3 = side(b1, b2, a1);
    let s4 = side(b1, b2, a2);
    s1 * s2 < 0 && s3 * s4 < 0
}

fn orientation(p: [f64; 2], q: [f64; 2], r: [f64; 2]) -> i8 {
    let value = (q[1] - p[1]) * (r[0] - q[0]) - (q[0] - p[0]) * (r[1] - q[1]);
    if value.abs() < 1e-15 {
        0
    } else if value > 0.0 {
        1
    } else {
        2
    }
}

fn on_segment(p: [f64; 2], q: [f64; 2], r: [f64; 2]) -> bool {
    q[0] <= p[0].max(r[0]) && q[0] >= p[0].min(r[0]) && q[1] <= p[1].max(r[1]) && q[1] >= p[1].min(r[1])
}

fn segments_intersect(p1: [f64; 2], q1: [f64; 2], p2: [f64; 2], q2: [f64; 2]) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == 0 && on_segment(p1, p2, q1))
        || (o2 == 0 && on_segment(p1, q2, q1))
        || (o3 == 0 && on_segment(p2, p1, q2))
        || (o4 == 0 && on_segment(p2, q1, q2))
}

/// First pair of non-adjacent edges that touch or cross
fn first_self_intersection(ring: &[[f64; 2]]) -> Option<(usize, usize)> {
    let n = ring.len();
    for i in 0..n {
        let (a1, a2) = (ring[i], ring[(i + 1) % n]);
        for j in (i + 1)..n {
            // Adjacent edges share a vertex by construction
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            let (b1, b2) = (ring[j], ring[(j + 1) % n]);
            if segments_intersect(a1, a2, b1, b2) {
                return Some((i, j));
            }
        }
    }
    None
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// GDAL coefficient order
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }
}

/// North-up geographic grid shared by every raster of a local evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

impl RasterGrid {
    /// Grid with square pixels of `pixel_size` degrees anchored at the top-left corner
    pub fn new(top_left_lon: f64, top_left_lat: f64, pixel_size: f64, rows: usize, cols: usize) -> Self {
        Self {
            transform: GeoTransform {
                top_left_x: top_left_lon,
                pixel_width: pixel_size,
                rotation_x: 0.0,
                top_left_y: top_left_lat,
                rotation_y: 0.0,
                pixel_height: -pixel_size,
            },
            rows,
            cols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Geographic position of a lattice point (pixel corner) at (`row`, `col`)
    pub fn corner(&self, row: f64, col: f64) -> (f64, f64) {
        let t = &self.transform;
        (
            t.top_left_x + col * t.pixel_width + row * t.rotation_x,
            t.top_left_y + col * t.rotation_y + row * t.pixel_height,
        )
    }

    /// Geographic position of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.corner(row as f64 + 0.5, col as f64 + 0.5)
    }

    /// Pixel spacing (dx, dy) in meters at the grid centre latitude
    pub fn pixel_size_meters(&self) -> (f64, f64) {
        let (_, center_lat) = self.corner(self.rows as f64 / 2.0, self.cols as f64 / 2.0);
        let dx = self.transform.pixel_width.abs() * METERS_PER_DEGREE * center_lat.to_radians().cos();
        let dy = self.transform.pixel_height.abs() * METERS_PER_DEGREE;
        (dx, dy)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let (x0, y0) = self.corner(0.0, 0.0);
        let (x1, y1) = self.corner(self.rows as f64, self.cols as f64);
        BoundingBox {
            min_lon: x0.min(x1),
            max_lon: x0.max(x1),
            min_lat: y0.min(y1),
            max_lat: y0.max(y1),
        }
    }
}

/// A vector polygon: exterior ring plus holes, all rings closed
///
/// Exterior rings run counter-clockwise and holes clockwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<[f64; 2]>,
    pub holes: Vec<Vec<[f64; 2]>>,
}

impl Polygon {
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for [lon, lat] in &self.exterior {
            bbox.min_lon = bbox.min_lon.min(*lon);
            bbox.max_lon = bbox.max_lon.max(*lon);
            bbox.min_lat = bbox.min_lat.min(*lat);
            bbox.max_lat = bbox.max_lat.max(*lat);
        }
        bbox
    }

    /// Exterior area minus holes, in square degrees
    pub fn area(&self) -> f64 {
        let holes: f64 = self.holes.iter().map(|h| signed_ring_area(h).abs()).sum();
        signed_ring_area(&self.exterior).abs() - holes
    }
}

/// Materialized vector result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    pub polygons: Vec<Polygon>,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn total_area(&self) -> f64 {
        self.polygons.iter().map(Polygon::area).sum()
    }
}

/// Error types for flood mapping
#[derive(Debug, thiserror::Error)]
pub enum FloodError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid date ordering: {0}")]
    InvalidDateOrdering(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Remote computation failed: {0}")]
    RemoteComputation(String),

    #[error("Export too large: {0}")]
    ExportTooLarge(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl FloodError {
    /// User-facing advice for failures a caller can act on
    pub fn remediation_hint(&self) -> Option<&'static str> {
        match self {
            FloodError::RemoteComputation(_) => Some(
                "No satellite image found for the selected dates. Try changing the pass \
                 direction. If that does not work, choose different dates: the satellite \
                 probably did not cover the area of interest in the before or after window.",
            ),
            FloodError::ExportTooLarge(_) => Some(
                "The image is too big to be exported to file. Select a smaller area of \
                 interest (side <~ 150km) or a coarser scale and repeat the analysis.",
            ),
            FloodError::InvalidDateOrdering(_) => {
                Some("Make sure that the dates were inserted correctly.")
            }
            FloodError::InvalidGeometry(_) => Some("No valid region selected."),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FloodError {
    fn from(err: reqwest::Error) -> Self {
        FloodError::Http(err.to_string())
    }
}

/// Result type for flood mapping operations
pub type FloodResult<T> = Result<T, FloodError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_direction_is_case_insensitive() {
        assert_eq!(PassDirection::normalize("ascending").unwrap(), PassDirection::Ascending);
        assert_eq!(PassDirection::normalize(" DeScEnDiNg ").unwrap(), PassDirection::Descending);
        assert_eq!(PassDirection::Ascending.archive_value(), "ASCENDING");
        assert!(PassDirection::normalize("sideways").is_err());

        let json = serde_json::to_string(&PassDirection::Descending).unwrap();
        assert_eq!(json, "\"DESCENDING\"");
        let parsed: PassDirection = serde_json::from_str("\"Ascending\"").unwrap();
        assert_eq!(parsed, PassDirection::Ascending);
    }

    #[test]
    fn test_polarization_parsing() {
        assert_eq!("vh".parse::<Polarization>().unwrap(), Polarization::VH);
        assert_eq!(Polarization::VV.to_string(), "VV");
        assert!("XX".parse::<Polarization>().is_err());
    }

    #[test]
    fn test_date_window_is_half_open() {
        let window = DateWindow::parse("2022-07-01:2022-07-30").unwrap();
        assert!(window.contains(NaiveDate::from_ymd_opt(2022, 7, 1).unwrap()));
        assert!(window.contains(NaiveDate::from_ymd_opt(2022, 7, 29).unwrap()));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2022, 7, 30).unwrap()));
        assert_eq!(window.num_days(), 29);

        assert!(DateWindow::parse("2022-07-30..2022-07-01").is_err());
        assert!(DateWindow::parse("2022-07-01").is_err());
    }

    #[test]
    fn test_area_of_interest_validation() {
        let square = AreaOfInterest::from_bounds(101.0, 3.0, 101.1, 3.1).unwrap();
        assert_eq!(square.vertices().len(), 4);
        assert!(square.contains(101.05, 3.05));
        assert!(!square.contains(101.2, 3.05));

        // Explicitly closed ring is accepted
        let closed = AreaOfInterest::new([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]).unwrap();
        assert_eq!(closed.vertices().len(), 3);

        let too_few = AreaOfInterest::new([(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]);
        assert!(matches!(too_few, Err(FloodError::InvalidGeometry(_))));

        let collinear = AreaOfInterest::new([(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]);
        assert!(matches!(collinear, Err(FloodError::InvalidGeometry(_))));

        // Bow tie
        let bow_tie = AreaOfInterest::new([(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0)]);
        assert!(matches!(bow_tie, Err(FloodError::InvalidGeometry(_))));
    }

    #[test]
    fn test_reversed_date_window_rejected_by_serde() {
        let reversed = serde_json::json!({"start": "2022-07-30", "end": "2022-07-01"});
        assert!(serde_json::from_value::<DateWindow>(reversed).is_err());

        let window: DateWindow =
            serde_json::from_value(serde_json::json!({"start": "2022-07-01", "end": "2022-07-30"})).unwrap();
        assert_eq!(window.num_days(), 29);
        assert_eq!(serde_json::to_value(window).unwrap()["start"], "2022-07-01");
    }

    #[test]
    fn test_covers_rect_against_triangle() {
        let triangle = AreaOfInterest::new([(0.0, 0.0), (4.0, 0.0), (0.0, 4.0)]).unwrap();

        // Below the hypotenuse, sharing edges with the triangle
        assert!(triangle.covers_rect(0.0, 0.0, 1.0, 1.0));
        assert!(triangle.covers_rect(1.0, 1.0, 2.0, 2.0));
        // Upper-right corner (2, 2.5) lies outside
        assert!(!triangle.covers_rect(1.0, 1.0, 2.0, 2.5));
        assert!(!triangle.covers_rect(3.0, 1.0, 4.0, 2.0));

        assert!(triangle.covers(2.0, 2.0));
        assert!(!triangle.covers(2.1, 2.0));
    }

    #[test]
    fn test_covers_rect_rejects_notch() {
        // Square with a thin notch cut through from the top down to y = 0.5
        let notched = AreaOfInterest::new([
            (0.0, 0.0),
            (4.0, 0.0),
            (4.0, 4.0),
            (2.1, 4.0),
            (2.1, 0.5),
            (1.9, 0.5),
            (1.9, 4.0),
            (0.0, 4.0),
        ])
        .unwrap();

        assert!(notched.covers_rect(0.0, 0.0, 1.0, 1.0));
        // All four corners are inside, but the notch runs through the middle
        assert!(!notched.covers_rect(1.0, 1.0, 3.0, 3.0));
    }

    #[test]
    fn test_area_of_interest_serde_roundtrip_closes_ring() {
        let square = AreaOfInterest::from_bounds(0.0, 0.0, 1.0, 1.0).unwrap();
        let json = serde_json::to_value(&square).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 5);
        let back: AreaOfInterest = serde_json::from_value(json).unwrap();
        assert_eq!(back, square);
    }

    #[test]
    fn test_raster_grid_geometry() {
        let grid = RasterGrid::new(101.0, 3.004, 0.0001, 40, 40);
        let bbox = grid.bounding_box();
        assert!((bbox.min_lat - 3.0).abs() < 1e-9);
        assert!((bbox.max_lon - 101.004).abs() < 1e-9);

        let (lon, lat) = grid.pixel_center(0, 0);
        assert!((lon - 101.00005).abs() < 1e-9);
        assert!((lat - 3.00395).abs() < 1e-9);

        let (dx, dy) = grid.pixel_size_meters();
        assert!(dx > 11.0 && dx < 11.2);
        assert!(dy > 11.1 && dy < 11.2);
    }

    #[test]
    fn test_remediation_hints() {
        assert!(FloodError::RemoteComputation("empty".into())
            .remediation_hint()
            .unwrap()
            .contains("pass direction"));
        assert!(FloodError::ExportTooLarge("big".into())
            .remediation_hint()
            .unwrap()
            .contains("smaller area"));
        assert!(FloodError::Config("x".into()).remediation_hint().is_none());
    }
}
