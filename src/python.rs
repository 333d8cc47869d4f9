//! Python bindings
//!
//! The flood-mapping user interface lives on the Python side; it calls into
//! these functions with plain strings, tuples and numpy arrays.

use chrono::NaiveDate;
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::core::flood_extent::{
    FloodExtentPipeline, FloodRequest, ELEVATION_ASSET, ELEVATION_BAND, SEASONALITY_BAND, SURFACE_WATER_ASSET,
};
use crate::engine::{GeoCompute, LocalEngine, SceneRecord};
use crate::io::geojson;
use crate::types::{AreaOfInterest, DateWindow, FloodError, PassDirection, Polarization, RasterGrid};

fn to_py_err(err: FloodError) -> PyErr {
    let message = match err.remediation_hint() {
        Some(hint) => format!("{} ({})", err, hint),
        None => err.to_string(),
    };
    match err {
        FloodError::InvalidGeometry(_)
        | FloodError::InvalidDateOrdering(_)
        | FloodError::InvalidParameter(_) => PyValueError::new_err(message),
        _ => PyRuntimeError::new_err(message),
    }
}

/// Convert PyReadonlyArray2 to ndarray Array2
fn numpy_to_array2(arr: PyReadonlyArray2<f32>) -> ndarray::Array2<f32> {
    arr.as_array().to_owned()
}

fn parse_date(value: &str) -> PyResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| PyValueError::new_err(format!("invalid date '{}': {}", value, e)))
}

fn build_request(
    ring: Vec<(f64, f64)>,
    before: (String, String),
    after: (String, String),
    threshold: f64,
    polarization: &str,
    pass_direction: &str,
) -> PyResult<FloodRequest> {
    let aoi = AreaOfInterest::new(ring).map_err(to_py_err)?;
    let before = DateWindow::new(parse_date(&before.0)?, parse_date(&before.1)?).map_err(to_py_err)?;
    let after = DateWindow::new(parse_date(&after.0)?, parse_date(&after.1)?).map_err(to_py_err)?;
    let polarization: Polarization = polarization.parse().map_err(to_py_err)?;
    let pass_direction = PassDirection::normalize(pass_direction).map_err(to_py_err)?;

    let request = FloodRequest::new(aoi, before, after)
        .with_threshold(threshold)
        .with_polarization(polarization)
        .with_pass_direction(pass_direction);
    request.validate().map_err(to_py_err)?;
    Ok(request)
}

/// Check `before_start < before_end <= after_start < after_end`
#[pyfunction]
fn validate_dates(before_start: &str, before_end: &str, after_start: &str, after_end: &str) -> PyResult<bool> {
    let before = DateWindow::new(parse_date(before_start)?, parse_date(before_end)?).map_err(to_py_err)?;
    let after = DateWindow::new(parse_date(after_start)?, parse_date(after_end)?).map_err(to_py_err)?;
    Ok(before.end() <= after.start())
}

/// JSON expression graph of a flood extent request
#[pyfunction]
#[pyo3(signature = (ring, before, after, threshold=1.25, polarization="VH", pass_direction="Ascending"))]
fn flood_extent_graph(
    ring: Vec<(f64, f64)>,
    before: (String, String),
    after: (String, String),
    threshold: f64,
    polarization: &str,
    pass_direction: &str,
) -> PyResult<String> {
    let request = build_request(ring, before, after, threshold, polarization, pass_direction)?;
    let extent = FloodExtentPipeline::new().derive_flood_extent(&request);
    serde_json::to_string(&extent).map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

/// Run the flood workflow on in-memory arrays sharing one north-up grid
///
/// Returns a dict with the flood `mask` (1.0 flooded, NaN elsewhere), the
/// polygons as a GeoJSON string, and the flooded pixel count.
#[pyfunction]
#[pyo3(signature = (before, after, seasonality, elevation, top_left_lon, top_left_lat, pixel_size, threshold=1.25))]
#[allow(clippy::too_many_arguments)]
fn derive_flood_extent_arrays(
    py: Python,
    before: PyReadonlyArray2<f32>,
    after: PyReadonlyArray2<f32>,
    seasonality: PyReadonlyArray2<f32>,
    elevation: PyReadonlyArray2<f32>,
    top_left_lon: f64,
    top_left_lat: f64,
    pixel_size: f64,
    threshold: f64,
) -> PyResult<PyObject> {
    let before = numpy_to_array2(before);
    let (rows, cols) = before.dim();
    let grid = RasterGrid::new(top_left_lon, top_left_lat, pixel_size, rows, cols);
    let footprint = grid.bounding_box();

    let before_date = NaiveDate::from_ymd_opt(2000, 1, 1).ok_or_else(|| PyRuntimeError::new_err("invalid date"))?;
    let after_date = NaiveDate::from_ymd_opt(2000, 1, 2).ok_or_else(|| PyRuntimeError::new_err("invalid date"))?;

    let mut engine = LocalEngine::new(grid);
    engine
        .add_scene(
            SceneRecord::sentinel1_grd("before", before_date, PassDirection::Ascending, footprint)
                .with_band(Polarization::VH, before),
        )
        .map_err(to_py_err)?;
    engine
        .add_scene(
            SceneRecord::sentinel1_grd("after", after_date, PassDirection::Ascending, footprint)
                .with_band(Polarization::VH, numpy_to_array2(after)),
        )
        .map_err(to_py_err)?;
    engine
        .add_dataset(SURFACE_WATER_ASSET, SEASONALITY_BAND, numpy_to_array2(seasonality))
        .map_err(to_py_err)?;
    engine
        .add_dataset(ELEVATION_ASSET, ELEVATION_BAND, numpy_to_array2(elevation))
        .map_err(to_py_err)?;

    let aoi = AreaOfInterest::from_bounds(footprint.min_lon, footprint.min_lat, footprint.max_lon, footprint.max_lat)
        .map_err(to_py_err)?;
    let before_window = DateWindow::new(before_date, after_date).map_err(to_py_err)?;
    let after_window = DateWindow::new(after_date, after_date.succ_opt().unwrap_or(after_date)).map_err(to_py_err)?;
    let request = FloodRequest::new(aoi.clone(), before_window, after_window).with_threshold(threshold);

    let pipeline = FloodExtentPipeline::new();
    let extent = pipeline.derive_flood_extent(&request);

    let mask = engine.evaluate(&extent.raster).map_err(to_py_err)?;
    let polygons = engine.compute_vectors(&extent.vectors).map_err(to_py_err)?;
    let flooded_pixels = mask.nonzero_count();

    let mask_values = ndarray::Zip::from(&mask.values)
        .and(&mask.valid)
        .map_collect(|&v, &ok| if ok { v } else { f32::NAN });

    let result = PyDict::new(py);
    result.set_item("mask", mask_values.to_pyarray(py))?;
    result.set_item("polygons", geojson::to_geojson(&polygons).to_string())?;
    result.set_item("polygon_count", polygons.len())?;
    result.set_item("flooded_pixels", flooded_pixels)?;

    Ok(result.into())
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(validate_dates, m)?)?;
    m.add_function(wrap_pyfunction!(flood_extent_graph, m)?)?;
    m.add_function(wrap_pyfunction!(derive_flood_extent_arrays, m)?)?;
    Ok(())
}
