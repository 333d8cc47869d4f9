use serde::{Deserialize, Serialize};

use crate::core::expr::{
    CollectionQuery, Image, ImageCollection, KernelShape, KernelUnits, SlopeUnits, VectorParams, Vectors,
    IW_MODE, S1_GRD_COLLECTION,
};
use crate::engine::GeoCompute;
use crate::types::{
    AreaOfInterest, DateWindow, FeatureCollection, FloodError, FloodResult, PassDirection, Polarization,
};

/// Global surface water occurrence dataset
pub const SURFACE_WATER_ASSET: &str = "JRC/GSW1_4/GlobalSurfaceWater";
/// Months per year a pixel is water covered
pub const SEASONALITY_BAND: &str = "seasonality";
/// Void-filled global elevation model
pub const ELEVATION_ASSET: &str = "WWF/HydroSHEDS/03VFDEM";
pub const ELEVATION_BAND: &str = "b1";

/// Nominal resolution of the archive's ground-range-detected tiles (meters)
pub const S1_RESOLUTION_METERS: u32 = 10;

/// Tunable parameters of the change-detection workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodParams {
    /// Default after/before ratio above which a pixel is a flood candidate
    pub threshold: f64,
    /// Speckle filter radius in meters
    pub smoothing_radius: f64,
    /// Seasonality (months) at or above which water is considered permanent
    pub permanent_water_months: f64,
    /// Regions of this many pixels or fewer are treated as noise
    pub noise_max_pixels: u32,
    /// Upper bound for connected pixel counting
    pub connectivity_max_size: u32,
    /// Pixels with slope at or above this value are dropped
    pub max_slope: f64,
    pub slope_units: SlopeUnits,
    /// Vectorization scale in meters
    pub vector_scale: f64,
    pub tile_scale: u32,
}

impl Default for FloodParams {
    fn default() -> Self {
        Self {
            threshold: 1.25,
            smoothing_radius: 50.0,
            permanent_water_months: 10.0,
            noise_max_pixels: 8,
            connectivity_max_size: 100,
            max_slope: 5.0,
            slope_units: SlopeUnits::Degrees,
            vector_scale: 10.0,
            tile_scale: 2,
        }
    }
}

impl FloodParams {
    pub fn validate(&self) -> FloodResult<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "threshold must be a positive number, got {}",
                self.threshold
            )));
        }
        if !self.smoothing_radius.is_finite() || self.smoothing_radius < 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "smoothing radius must be non-negative, got {}",
                self.smoothing_radius
            )));
        }
        if !(0.0..=12.0).contains(&self.permanent_water_months) {
            return Err(FloodError::InvalidParameter(format!(
                "permanent water months must be within 0..=12, got {}",
                self.permanent_water_months
            )));
        }
        if self.connectivity_max_size <= self.noise_max_pixels {
            return Err(FloodError::InvalidParameter(format!(
                "connectivity max size ({}) must exceed the noise limit ({})",
                self.connectivity_max_size, self.noise_max_pixels
            )));
        }
        if !self.max_slope.is_finite() || self.max_slope <= 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "max slope must be positive, got {}",
                self.max_slope
            )));
        }
        if !self.vector_scale.is_finite() || self.vector_scale <= 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "vector scale must be positive, got {}",
                self.vector_scale
            )));
        }
        if self.tile_scale == 0 {
            return Err(FloodError::InvalidParameter("tile scale must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// One flood-extent invocation: the area, the two windows and the sensor choices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodRequest {
    pub aoi: AreaOfInterest,
    pub before: DateWindow,
    pub after: DateWindow,
    pub threshold: f64,
    pub polarization: Polarization,
    pub pass_direction: PassDirection,
}

impl FloodRequest {
    /// Request with the default threshold, VH polarization and ascending passes
    pub fn new(aoi: AreaOfInterest, before: DateWindow, after: DateWindow) -> Self {
        Self {
            aoi,
            before,
            after,
            threshold: FloodParams::default().threshold,
            polarization: Polarization::VH,
            pass_direction: PassDirection::Ascending,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_polarization(mut self, polarization: Polarization) -> Self {
        self.polarization = polarization;
        self
    }

    pub fn with_pass_direction(mut self, pass_direction: PassDirection) -> Self {
        self.pass_direction = pass_direction;
        self
    }

    /// Check `before.start < before.end <= after.start < after.end` and the threshold
    ///
    /// The pipeline assumes this holds; callers validate before deriving.
    pub fn validate(&self) -> FloodResult<()> {
        if self.before.end() > self.after.start() {
            return Err(FloodError::InvalidDateOrdering(format!(
                "before window {} must end on or before the after window {} starts",
                self.before, self.after
            )));
        }
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "threshold must be a positive number, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Lazy output of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodExtent {
    pub vectors: Vectors,
    pub raster: Image,
    pub before_filtered: Image,
    pub after_filtered: Image,
}

impl FloodExtent {
    /// Materialize the flood polygons
    pub fn polygons(&self, engine: &dyn GeoCompute) -> FloodResult<FeatureCollection> {
        engine.compute_vectors(&self.vectors)
    }

    /// Count flooded pixels inside `region` at the vectorization scale
    pub fn flooded_pixel_count(&self, engine: &dyn GeoCompute, region: &AreaOfInterest) -> FloodResult<u64> {
        engine.count_pixels(&self.raster, region, self.vectors.scale)
    }
}

/// Materialized summary of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodReport {
    pub features: FeatureCollection,
    pub flooded_pixels: u64,
    pub flooded_area_sq_deg: f64,
    pub graph_nodes: usize,
}

/// Builds the change-detection expression graph
#[derive(Debug, Clone, Default)]
pub struct FloodExtentPipeline {
    params: FloodParams,
}

impl FloodExtentPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: FloodParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FloodParams {
        &self.params
    }

    /// Search the ground-range-detected archive for one window
    ///
    /// An empty result is not an error here; it fails once something is evaluated.
    pub fn retrieve_image_collection(
        &self,
        area: &AreaOfInterest,
        window: &DateWindow,
        polarization: Polarization,
        pass_direction: PassDirection,
    ) -> ImageCollection {
        ImageCollection::search(CollectionQuery {
            product: S1_GRD_COLLECTION.to_string(),
            instrument_mode: IW_MODE.to_string(),
            polarization,
            pass_direction,
            resolution_meters: S1_RESOLUTION_METERS,
            window: *window,
            bounds: area.clone(),
        })
    }

    /// Last-value-wins composite clipped to the area
    pub fn build_mosaic(&self, collection: &ImageCollection, area: &AreaOfInterest) -> Image {
        collection.mosaic().clip(area)
    }

    /// Circular focal mean with the radius in meters
    pub fn smooth(&self, image: &Image, radius: f64) -> Image {
        image.focal_mean(radius, KernelShape::Circle, KernelUnits::Meters)
    }

    /// `after / before > threshold`
    pub fn candidate_flood(&self, before: &Image, after: &Image, threshold: f64) -> Image {
        after.divide(before).gt(threshold)
    }

    /// Zero out permanent water, then mask everything that is not flooded
    pub fn mask_permanent_water(&self, candidate: &Image) -> Image {
        let seasonality = Image::dataset(SURFACE_WATER_ASSET, SEASONALITY_BAND);
        let permanent = seasonality.gte(self.params.permanent_water_months);
        let permanent = permanent.update_mask(&permanent);

        let flooded = candidate.replace_where(&permanent, 0.0);
        flooded.update_mask(&flooded)
    }

    /// Drop connected regions of `noise_max_pixels` pixels or fewer
    pub fn reduce_noise(&self, flooded: &Image) -> Image {
        let connections = flooded.connected_pixel_count(self.params.connectivity_max_size, true);
        flooded.update_mask(&connections.gt(self.params.noise_max_pixels as f64))
    }

    /// Slope of the static elevation model
    pub fn slope_layer(&self) -> Image {
        Image::dataset(ELEVATION_ASSET, ELEVATION_BAND).slope(self.params.slope_units)
    }

    /// Keep pixels where `slope < max_slope`
    pub fn mask_by_slope(&self, flooded: &Image, slope: &Image) -> Image {
        flooded.update_mask(&slope.lt(self.params.max_slope))
    }

    pub fn mask_slopes(&self, flooded: &Image) -> Image {
        self.mask_by_slope(flooded, &self.slope_layer())
    }

    /// Polygon outline of the flood mask, four-connected, inside the area
    pub fn vectorize(&self, flooded: &Image, area: &AreaOfInterest) -> Vectors {
        flooded.reduce_to_vectors(VectorParams {
            scale: self.params.vector_scale,
            geometry: area.clone(),
            eight_connected: false,
            best_effort: true,
            tile_scale: self.params.tile_scale,
        })
    }

    /// Build the full flood-extent graph for a request
    ///
    /// Nothing is evaluated. The request is assumed valid; see [`FloodRequest::validate`].
    pub fn derive_flood_extent(&self, request: &FloodRequest) -> FloodExtent {
        let aoi = &request.aoi;

        let before_collection =
            self.retrieve_image_collection(aoi, &request.before, request.polarization, request.pass_direction);
        let after_collection =
            self.retrieve_image_collection(aoi, &request.after, request.polarization, request.pass_direction);

        let before_filtered = self.smooth(&self.build_mosaic(&before_collection, aoi), self.params.smoothing_radius);
        let after_filtered = self.smooth(&self.build_mosaic(&after_collection, aoi), self.params.smoothing_radius);

        let candidate = self.candidate_flood(&before_filtered, &after_filtered, request.threshold);
        let flooded = self.mask_permanent_water(&candidate);
        let flooded = self.reduce_noise(&flooded);
        let flooded = self.mask_slopes(&flooded);

        let vectors = self.vectorize(&flooded, aoi);

        log::debug!(
            "Flood extent graph: {} raster nodes, before {}, after {}, {} {}",
            flooded.node_count(),
            request.before,
            request.after,
            request.polarization,
            request.pass_direction
        );

        FloodExtent {
            vectors,
            raster: flooded,
            before_filtered,
            after_filtered,
        }
    }

    /// Validate, derive and materialize the polygons and flooded pixel count
    pub fn run(&self, engine: &dyn GeoCompute, request: &FloodRequest) -> FloodResult<FloodReport> {
        self.params.validate()?;
        request.validate()?;

        log::info!(
            "Deriving flood extent: before {}, after {}, threshold {}, {} {}",
            request.before,
            request.after,
            request.threshold,
            request.polarization,
            request.pass_direction
        );

        let extent = self.derive_flood_extent(request);
        let features = extent.polygons(engine)?;
        let flooded_pixels = extent.flooded_pixel_count(engine, &request.aoi)?;

        log::info!(
            "Flood extent: {} polygons, {} flooded pixels",
            features.len(),
            flooded_pixels
        );

        Ok(FloodReport {
            flooded_area_sq_deg: features.total_area(),
            features,
            flooded_pixels,
            graph_nodes: extent.raster.node_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::{BinaryOp, ImageExpr};

    fn request() -> FloodRequest {
        FloodRequest::new(
            AreaOfInterest::from_bounds(101.0, 3.0, 101.1, 3.1).unwrap(),
            DateWindow::parse("2022-07-01:2022-07-15").unwrap(),
            DateWindow::parse("2022-07-15:2022-07-30").unwrap(),
        )
    }

    #[test]
    fn test_request_date_ordering() {
        assert!(request().validate().is_ok());

        let mut overlapping = request();
        overlapping.after = DateWindow::parse("2022-07-10:2022-07-30").unwrap();
        assert!(matches!(overlapping.validate(), Err(FloodError::InvalidDateOrdering(_))));
    }

    #[test]
    fn test_params_validation() {
        assert!(FloodParams::default().validate().is_ok());

        let params = FloodParams {
            connectivity_max_size: 8,
            ..FloodParams::default()
        };
        assert!(matches!(params.validate(), Err(FloodError::InvalidParameter(_))));
    }

    #[test]
    fn test_graph_is_deterministic() {
        let pipeline = FloodExtentPipeline::new();
        assert_eq!(
            pipeline.derive_flood_extent(&request()),
            pipeline.derive_flood_extent(&request())
        );
    }

    #[test]
    fn test_candidate_is_strict_ratio_threshold() {
        let pipeline = FloodExtentPipeline::new();
        let extent = pipeline.derive_flood_extent(&request().with_threshold(1.5));

        let before = extent.before_filtered.clone();
        let after = extent.after_filtered.clone();
        let candidate = pipeline.candidate_flood(&before, &after, 1.5);
        match candidate.expr() {
            ImageExpr::Binary { operator, left, right } => {
                assert_eq!(*operator, BinaryOp::GreaterThan);
                assert_eq!(**right, ImageExpr::Constant { value: 1.5 });
                assert!(matches!(**left, ImageExpr::Binary { operator: BinaryOp::Divide, .. }));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_vectors_use_four_connectivity() {
        let extent = FloodExtentPipeline::new().derive_flood_extent(&request());
        assert!(!extent.vectors.eight_connected);
        assert!(extent.vectors.best_effort);
        assert_eq!(extent.vectors.scale, 10.0);
        assert_eq!(extent.vectors.tile_scale, 2);
        assert_eq!(extent.vectors.image, extent.raster);
    }

    #[test]
    fn test_params_from_partial_toml() {
        let params: FloodParams = toml::from_str("threshold = 1.5\nslope_units = \"percent\"").unwrap();
        assert_eq!(params.threshold, 1.5);
        assert_eq!(params.slope_units, SlopeUnits::Percent);
        assert_eq!(params.noise_max_pixels, 8);
    }
}
