//! Raster output for locally evaluated images

use std::fmt::Write as _;
use std::path::Path;

use crate::core::raster::MaskedRaster;
use crate::types::{FloodError, FloodResult, RasterGrid};

/// No-data marker for ASCII grids
pub const ASCII_NODATA: f32 = -9999.0;

/// Write an ESRI ASCII grid; masked pixels become [`ASCII_NODATA`]
pub fn write_ascii_grid<P: AsRef<Path>>(path: P, raster: &MaskedRaster, grid: &RasterGrid) -> FloodResult<()> {
    let path = path.as_ref();
    let (rows, cols) = raster.dim();
    if (rows, cols) != grid.shape() {
        return Err(FloodError::Processing(format!(
            "raster {:?} does not match grid {:?}",
            (rows, cols),
            grid.shape()
        )));
    }

    let t = &grid.transform;
    if t.rotation_x != 0.0 || t.rotation_y != 0.0 {
        return Err(FloodError::Processing("ASCII grids cannot store rotated transforms".to_string()));
    }

    let (x_ll, y_ll) = grid.corner(rows as f64, 0.0);
    let dx = t.pixel_width.abs();
    let dy = t.pixel_height.abs();

    let mut text = String::new();
    let _ = writeln!(text, "ncols {}", cols);
    let _ = writeln!(text, "nrows {}", rows);
    let _ = writeln!(text, "xllcorner {}", x_ll);
    let _ = writeln!(text, "yllcorner {}", y_ll);
    if (dx - dy).abs() <= f64::EPSILON * dx.max(1.0) {
        let _ = writeln!(text, "cellsize {}", dx);
    } else {
        let _ = writeln!(text, "dx {}", dx);
        let _ = writeln!(text, "dy {}", dy);
    }
    let _ = writeln!(text, "NODATA_value {}", ASCII_NODATA);

    for i in 0..rows {
        let line: Vec<String> = (0..cols)
            .map(|j| {
                let value = if raster.valid[[i, j]] {
                    raster.values[[i, j]]
                } else {
                    ASCII_NODATA
                };
                value.to_string()
            })
            .collect();
        text.push_str(&line.join(" "));
        text.push('\n');
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    log::debug!("Wrote {}x{} ASCII grid to {}", rows, cols, path.display());
    Ok(())
}

/// Write a single-band float GeoTIFF in EPSG:4326; masked pixels become NaN
#[cfg(feature = "gdal")]
pub fn write_geotiff<P: AsRef<Path>>(path: P, raster: &MaskedRaster, grid: &RasterGrid) -> FloodResult<()> {
    use gdal::DriverManager;

    let path = path.as_ref();
    let (height, width) = raster.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;

    let mut dataset = driver.create_with_band_type::<f32, _>(path, width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&grid.transform.to_gdal())?;
    dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(4326)?)?;

    let flat_data: Vec<f32> = raster
        .values
        .iter()
        .zip(raster.valid.iter())
        .map(|(&v, &ok)| if ok { v } else { f32::NAN })
        .collect();
    let buffer = gdal::raster::Buffer::new((width, height), flat_data);

    let mut rasterband = dataset.rasterband(1)?;
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(f32::NAN as f64))?;

    log::debug!("Wrote {}x{} GeoTIFF to {}", height, width, path.display());
    Ok(())
}
