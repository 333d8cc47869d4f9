//! In-memory evaluator over a scene catalog on a single raster grid

use chrono::NaiveDate;
use ndarray::Array2;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::core::expr::{CollectionQuery, Image, ImageExpr, KernelUnits, Vectors, IW_MODE, S1_GRD_COLLECTION};
use crate::core::raster::{self, MaskedRaster};
use crate::core::vectorize::polygonize;
use crate::engine::{
    GeoCompute, ImageExportTask, ImageFormat, JobId, JobStatus, TableExportTask, TableFormat,
};
use crate::io::{geojson, raster_file};
use crate::types::{
    AreaOfInterest, BoundingBox, FeatureCollection, FloodError, FloodResult, PassDirection, Polarization,
    RasterGrid,
};

/// One archive tile resampled onto the engine grid
#[derive(Debug, Clone)]
pub struct SceneRecord {
    pub id: String,
    pub product: String,
    pub instrument_mode: String,
    pub pass_direction: PassDirection,
    pub resolution_meters: u32,
    pub acquired: NaiveDate,
    pub footprint: BoundingBox,
    /// Backscatter per polarization channel; non-finite values are no-data
    pub bands: HashMap<Polarization, Array2<f32>>,
}

impl SceneRecord {
    /// Interferometric wide swath GRD tile at 10 m
    pub fn sentinel1_grd(
        id: impl Into<String>,
        acquired: NaiveDate,
        pass_direction: PassDirection,
        footprint: BoundingBox,
    ) -> Self {
        Self {
            id: id.into(),
            product: S1_GRD_COLLECTION.to_string(),
            instrument_mode: IW_MODE.to_string(),
            pass_direction,
            resolution_meters: 10,
            acquired,
            footprint,
            bands: HashMap::new(),
        }
    }

    pub fn with_band(mut self, polarization: Polarization, data: Array2<f32>) -> Self {
        self.bands.insert(polarization, data);
        self
    }

    /// Archive filter: product, mode, polarization, pass, resolution, date and footprint
    pub fn matches(&self, query: &CollectionQuery) -> bool {
        self.product == query.product
            && self.instrument_mode == query.instrument_mode
            && self.bands.contains_key(&query.polarization)
            && self.pass_direction == query.pass_direction
            && self.resolution_meters == query.resolution_meters
            && query.window.contains(self.acquired)
            && self.footprint.intersects(&query.bounds.bounding_box())
    }
}

/// Reference evaluator for the expression graph
///
/// Exports complete synchronously on submission and are written to the
/// configured export directory.
pub struct LocalEngine {
    grid: RasterGrid,
    scenes: Vec<SceneRecord>,
    datasets: HashMap<(String, String), Array2<f32>>,
    export_dir: Option<PathBuf>,
    jobs: Mutex<HashMap<JobId, JobStatus>>,
    next_job: AtomicU64,
}

impl LocalEngine {
    pub fn new(grid: RasterGrid) -> Self {
        Self {
            grid,
            scenes: Vec::new(),
            datasets: HashMap::new(),
            export_dir: None,
            jobs: Mutex::new(HashMap::new()),
            next_job: AtomicU64::new(1),
        }
    }

    pub fn with_export_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.export_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    fn check_shape(&self, what: &str, data: &Array2<f32>) -> FloodResult<()> {
        if data.dim() != self.grid.shape() {
            return Err(FloodError::InvalidParameter(format!(
                "{} has shape {:?}, engine grid is {:?}",
                what,
                data.dim(),
                self.grid.shape()
            )));
        }
        Ok(())
    }

    pub fn add_scene(&mut self, scene: SceneRecord) -> FloodResult<()> {
        for (pol, data) in &scene.bands {
            self.check_shape(&format!("scene {} band {}", scene.id, pol), data)?;
        }
        log::debug!("Catalog scene {} acquired {}", scene.id, scene.acquired);
        self.scenes.push(scene);
        Ok(())
    }

    /// Register a static dataset band; non-finite values are no-data
    pub fn add_dataset(&mut self, id: impl Into<String>, band: impl Into<String>, data: Array2<f32>) -> FloodResult<()> {
        let id = id.into();
        let band = band.into();
        self.check_shape(&format!("dataset {}/{}", id, band), &data)?;
        self.datasets.insert((id, band), data);
        Ok(())
    }

    /// Evaluate an image on the engine grid
    pub fn evaluate(&self, image: &Image) -> FloodResult<MaskedRaster> {
        self.eval(image.expr())
    }

    fn eval(&self, expr: &ImageExpr) -> FloodResult<MaskedRaster> {
        match expr {
            ImageExpr::Mosaic { collection } => self.mosaic(collection),
            ImageExpr::Clip { image, geometry } => {
                let mut raster = self.eval(image)?;
                self.clip_to(&mut raster, geometry);
                Ok(raster)
            }
            ImageExpr::FocalMean {
                image,
                radius,
                kernel,
                units,
            } => {
                let raster = self.eval(image)?;
                let (radius_rows, radius_cols) = match units {
                    KernelUnits::Pixels => (*radius, *radius),
                    KernelUnits::Meters => {
                        let (dx, dy) = self.grid.pixel_size_meters();
                        (radius / dy, radius / dx)
                    }
                };
                Ok(raster::focal_mean(&raster, radius_rows, radius_cols, *kernel))
            }
            ImageExpr::Binary { operator, left, right } => {
                raster::binary(*operator, &self.eval(left)?, &self.eval(right)?)
            }
            ImageExpr::Constant { value } => Ok(MaskedRaster::filled(self.grid.shape(), *value as f32)),
            ImageExpr::Where { image, test, value } => {
                raster::replace_where(&self.eval(image)?, &self.eval(test)?, *value as f32)
            }
            ImageExpr::UpdateMask { image, mask } => raster::update_mask(&self.eval(image)?, &self.eval(mask)?),
            ImageExpr::ConnectedPixelCount {
                image,
                max_size,
                eight_connected,
            } => Ok(raster::connected_pixel_count(&self.eval(image)?, *max_size, *eight_connected)),
            ImageExpr::Dataset { id, band } => {
                let data = self
                    .datasets
                    .get(&(id.clone(), band.clone()))
                    .ok_or_else(|| FloodError::RemoteComputation(format!("Image asset '{}' band '{}' not found", id, band)))?;
                Ok(MaskedRaster::from_values(data.clone()))
            }
            ImageExpr::Slope { elevation, units } => {
                raster::terrain_slope(&self.eval(elevation)?, self.grid.pixel_size_meters(), *units)
            }
        }
    }

    /// Last-valid-wins composite in acquisition order
    fn mosaic(&self, query: &CollectionQuery) -> FloodResult<MaskedRaster> {
        let mut matching: Vec<&SceneRecord> = self.scenes.iter().filter(|s| s.matches(query)).collect();
        matching.sort_by_key(|s| s.acquired);

        if matching.is_empty() {
            return Err(FloodError::RemoteComputation(format!(
                "Image.mosaic: collection is empty ({} {} {} {})",
                query.product, query.polarization, query.pass_direction, query.window
            )));
        }

        log::debug!(
            "Mosaic of {} scenes for {} ({})",
            matching.len(),
            query.window,
            query.band()
        );

        let mut composite = MaskedRaster::masked(self.grid.shape());
        for scene in matching {
            if let Some(band) = scene.bands.get(&query.polarization) {
                for ((i, j), &value) in band.indexed_iter() {
                    if value.is_finite() {
                        composite.values[[i, j]] = value;
                        composite.valid[[i, j]] = true;
                    }
                }
            }
        }

        Ok(composite)
    }

    /// Mask pixels whose centre lies outside the geometry
    fn clip_to(&self, raster: &mut MaskedRaster, geometry: &AreaOfInterest) {
        let grid = self.grid;
        raster.restrict(|i, j| {
            let (lon, lat) = grid.pixel_center(i, j);
            geometry.contains(lon, lat)
        });
    }

    /// Mask pixels whose square is not entirely inside the geometry
    fn restrict_to_whole_pixels(&self, raster: &mut MaskedRaster, geometry: &AreaOfInterest) {
        let grid = self.grid;
        let before = raster.valid_count();
        raster.restrict(|i, j| {
            let (x0, y0) = grid.corner(i as f64, j as f64);
            let (x1, y1) = grid.corner(i as f64 + 1.0, j as f64 + 1.0);
            geometry.covers_rect(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
        });
        log::debug!(
            "Vectorization drops {} pixels straddling the area boundary",
            before - raster.valid_count()
        );
    }

    fn warn_on_scale(&self, scale: f64) {
        let (dx, dy) = self.grid.pixel_size_meters();
        let native = (dx + dy) / 2.0;
        if (scale - native).abs() > native * 0.5 {
            log::warn!(
                "Requested scale {:.1} m differs from the local grid ({:.1} m); evaluating at grid resolution",
                scale,
                native
            );
        }
    }

    fn vectors_of(&self, vectors: &Vectors) -> FloodResult<FeatureCollection> {
        let mut raster = self.evaluate(&vectors.image)?;
        self.restrict_to_whole_pixels(&mut raster, &vectors.geometry);
        self.warn_on_scale(vectors.scale);
        Ok(polygonize(&raster, &self.grid, vectors.eight_connected))
    }

    fn next_job_id(&self) -> JobId {
        JobId(format!("local-{}", self.next_job.fetch_add(1, Ordering::SeqCst)))
    }

    fn record_job(&self, status: JobStatus) -> FloodResult<JobId> {
        let id = self.next_job_id();
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| FloodError::Processing("job table lock poisoned".to_string()))?;
        jobs.insert(id.clone(), status);
        Ok(id)
    }

    fn export_dir(&self) -> Result<&Path, String> {
        self.export_dir
            .as_deref()
            .ok_or_else(|| "no export directory configured for the local engine".to_string())
    }

    fn run_image_export(&self, task: &ImageExportTask) -> Result<PathBuf, String> {
        let dir = self.export_dir()?;
        let mut raster = self.evaluate(&task.image).map_err(|e| e.to_string())?;
        self.clip_to(&mut raster, &task.region);

        if task.crs != "EPSG:4326" {
            log::warn!("Local export ignores CRS {}; writing in EPSG:4326", task.crs);
        }

        match task.format {
            ImageFormat::GeoTiff => {
                #[cfg(feature = "gdal")]
                {
                    let path = dir.join(format!("{}.tif", task.file_name_prefix));
                    raster_file::write_geotiff(&path, &raster, &self.grid).map_err(|e| e.to_string())?;
                    Ok(path)
                }
                #[cfg(not(feature = "gdal"))]
                {
                    let path = dir.join(format!("{}.asc", task.file_name_prefix));
                    raster_file::write_ascii_grid(&path, &raster, &self.grid).map_err(|e| e.to_string())?;
                    Ok(path)
                }
            }
        }
    }

    fn run_table_export(&self, task: &TableExportTask) -> Result<PathBuf, String> {
        let dir = self.export_dir()?;
        match task.format {
            TableFormat::Shapefile => Err("shapefile output is not supported by the local engine".to_string()),
            TableFormat::GeoJson => {
                let features = self.vectors_of(&task.collection).map_err(|e| e.to_string())?;
                let path = dir.join(format!("{}.{}", task.file_name_prefix, task.format.extension()));
                geojson::write_geojson(&path, &features).map_err(|e| e.to_string())?;
                Ok(path)
            }
        }
    }

    fn finish_job(&self, description: &str, outcome: Result<PathBuf, String>) -> FloodResult<JobId> {
        let status = match outcome {
            Ok(path) => {
                log::info!("Export {} written to {}", description, path.display());
                JobStatus::Completed
            }
            Err(message) => {
                log::warn!("Export {} failed: {}", description, message);
                JobStatus::Failed { message: Some(message) }
            }
        };
        self.record_job(status)
    }
}

impl GeoCompute for LocalEngine {
    fn compute_vectors(&self, vectors: &Vectors) -> FloodResult<FeatureCollection> {
        self.vectors_of(vectors)
    }

    fn count_pixels(&self, image: &Image, region: &AreaOfInterest, scale: f64) -> FloodResult<u64> {
        let mut raster = self.evaluate(image)?;
        self.clip_to(&mut raster, region);
        self.warn_on_scale(scale);
        Ok(raster.nonzero_count() as u64)
    }

    fn submit_image_export(&self, task: &ImageExportTask) -> FloodResult<JobId> {
        let outcome = self.run_image_export(task);
        self.finish_job(&task.description, outcome)
    }

    fn submit_table_export(&self, task: &TableExportTask) -> FloodResult<JobId> {
        let outcome = self.run_table_export(task);
        self.finish_job(&task.description, outcome)
    }

    fn job_status(&self, id: &JobId) -> FloodResult<JobStatus> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| FloodError::Processing("job table lock poisoned".to_string()))?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| FloodError::RemoteComputation(format!("unknown job {}", id)))
    }

    fn image_download_url(
        &self,
        _image: &Image,
        _region: &AreaOfInterest,
        _scale: f64,
        _format: ImageFormat,
    ) -> FloodResult<String> {
        Err(FloodError::RemoteComputation(
            "download URLs are not available from the local engine".to_string(),
        ))
    }

    fn table_download_url(&self, _vectors: &Vectors, _format: TableFormat) -> FloodResult<String> {
        Err(FloodError::RemoteComputation(
            "download URLs are not available from the local engine".to_string(),
        ))
    }
}
