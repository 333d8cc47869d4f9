//! Lazy image expression graph
//!
//! Every operator on [`Image`] returns a new, unevaluated node. Nothing touches
//! pixels until an engine is asked for concrete output (vectors, pixel counts,
//! exports). The tree serializes to the JSON wire format posted to the
//! compute service.

use serde::{Deserialize, Serialize};

use crate::types::{AreaOfInterest, DateWindow, PassDirection, Polarization};

/// Sentinel-1 ground-range-detected archive
pub const S1_GRD_COLLECTION: &str = "COPERNICUS/S1_GRD";

/// Interferometric wide swath instrument mode
pub const IW_MODE: &str = "IW";

/// Parameters of a remote archive search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionQuery {
    pub product: String,
    pub instrument_mode: String,
    pub polarization: Polarization,
    pub pass_direction: PassDirection,
    pub resolution_meters: u32,
    pub window: DateWindow,
    pub bounds: AreaOfInterest,
}

impl CollectionQuery {
    /// Band selected from each matching tile
    pub fn band(&self) -> String {
        self.polarization.to_string()
    }
}

/// Neighbourhood kernel shape for focal operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelShape {
    Circle,
    Square,
}

/// Units of a kernel radius
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelUnits {
    Meters,
    Pixels,
}

/// Units of a terrain slope layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlopeUnits {
    Degrees,
    Percent,
}

/// Pixelwise binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Divide,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
}

/// One node of the lazy image graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ImageExpr {
    /// Last-value-wins composite of every tile matching a search
    Mosaic { collection: CollectionQuery },
    /// Mask everything outside a geometry
    Clip {
        image: Box<ImageExpr>,
        geometry: AreaOfInterest,
    },
    FocalMean {
        image: Box<ImageExpr>,
        radius: f64,
        kernel: KernelShape,
        units: KernelUnits,
    },
    Binary {
        operator: BinaryOp,
        left: Box<ImageExpr>,
        right: Box<ImageExpr>,
    },
    Constant { value: f64 },
    /// Replace pixels of `image` by `value` where `test` is unmasked and non-zero
    Where {
        image: Box<ImageExpr>,
        test: Box<ImageExpr>,
        value: f64,
    },
    /// Mask pixels of `image` where `mask` is masked or zero
    UpdateMask {
        image: Box<ImageExpr>,
        mask: Box<ImageExpr>,
    },
    ConnectedPixelCount {
        image: Box<ImageExpr>,
        max_size: u32,
        eight_connected: bool,
    },
    /// Static archive asset looked up by identifier
    Dataset { id: String, band: String },
    /// Terrain slope of an elevation image
    Slope {
        elevation: Box<ImageExpr>,
        units: SlopeUnits,
    },
}

impl ImageExpr {
    /// Number of nodes in this subtree
    pub fn node_count(&self) -> usize {
        match self {
            ImageExpr::Mosaic { .. } | ImageExpr::Constant { .. } | ImageExpr::Dataset { .. } => 1,
            ImageExpr::Clip { image, .. }
            | ImageExpr::FocalMean { image, .. }
            | ImageExpr::ConnectedPixelCount { image, .. } => 1 + image.node_count(),
            ImageExpr::Slope { elevation, .. } => 1 + elevation.node_count(),
            ImageExpr::Binary { left, right, .. } => 1 + left.node_count() + right.node_count(),
            ImageExpr::Where { image, test, .. } => 1 + image.node_count() + test.node_count(),
            ImageExpr::UpdateMask { image, mask } => 1 + image.node_count() + mask.node_count(),
        }
    }
}

/// Handle to a lazy raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Image {
    expr: ImageExpr,
}

impl Image {
    pub fn from_expr(expr: ImageExpr) -> Self {
        Self { expr }
    }

    /// Static dataset band, e.g. a surface water or elevation layer
    pub fn dataset(id: impl Into<String>, band: impl Into<String>) -> Self {
        Self::from_expr(ImageExpr::Dataset {
            id: id.into(),
            band: band.into(),
        })
    }

    pub fn constant(value: f64) -> Self {
        Self::from_expr(ImageExpr::Constant { value })
    }

    pub fn expr(&self) -> &ImageExpr {
        &self.expr
    }

    pub fn node_count(&self) -> usize {
        self.expr.node_count()
    }

    fn boxed(&self) -> Box<ImageExpr> {
        Box::new(self.expr.clone())
    }

    pub fn clip(&self, geometry: &AreaOfInterest) -> Image {
        Self::from_expr(ImageExpr::Clip {
            image: self.boxed(),
            geometry: geometry.clone(),
        })
    }

    pub fn focal_mean(&self, radius: f64, kernel: KernelShape, units: KernelUnits) -> Image {
        Self::from_expr(ImageExpr::FocalMean {
            image: self.boxed(),
            radius,
            kernel,
            units,
        })
    }

    fn binary(&self, operator: BinaryOp, right: &Image) -> Image {
        Self::from_expr(ImageExpr::Binary {
            operator,
            left: self.boxed(),
            right: right.boxed(),
        })
    }

    pub fn divide(&self, other: &Image) -> Image {
        self.binary(BinaryOp::Divide, other)
    }

    /// 1 where the pixel is strictly greater than `value`, else 0
    pub fn gt(&self, value: f64) -> Image {
        self.binary(BinaryOp::GreaterThan, &Image::constant(value))
    }

    pub fn gte(&self, value: f64) -> Image {
        self.binary(BinaryOp::GreaterOrEqual, &Image::constant(value))
    }

    pub fn lt(&self, value: f64) -> Image {
        self.binary(BinaryOp::LessThan, &Image::constant(value))
    }

    pub fn replace_where(&self, test: &Image, value: f64) -> Image {
        Self::from_expr(ImageExpr::Where {
            image: self.boxed(),
            test: test.boxed(),
            value,
        })
    }

    pub fn update_mask(&self, mask: &Image) -> Image {
        Self::from_expr(ImageExpr::UpdateMask {
            image: self.boxed(),
            mask: mask.boxed(),
        })
    }

    pub fn connected_pixel_count(&self, max_size: u32, eight_connected: bool) -> Image {
        Self::from_expr(ImageExpr::ConnectedPixelCount {
            image: self.boxed(),
            max_size,
            eight_connected,
        })
    }

    /// Treat this image as elevation and derive its slope
    pub fn slope(&self, units: SlopeUnits) -> Image {
        Self::from_expr(ImageExpr::Slope {
            elevation: self.boxed(),
            units,
        })
    }

    /// Request polygons for the unmasked pixels of this image
    pub fn reduce_to_vectors(&self, params: VectorParams) -> Vectors {
        Vectors {
            image: self.clone(),
            scale: params.scale,
            geometry_type: GeometryType::Polygon,
            geometry: params.geometry,
            eight_connected: params.eight_connected,
            best_effort: params.best_effort,
            tile_scale: params.tile_scale,
        }
    }
}

/// Lazy result of an archive search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCollection {
    query: CollectionQuery,
}

impl ImageCollection {
    pub fn search(query: CollectionQuery) -> Self {
        Self { query }
    }

    pub fn query(&self) -> &CollectionQuery {
        &self.query
    }

    /// Composite every tile; later tiles overwrite earlier ones
    pub fn mosaic(&self) -> Image {
        Image::from_expr(ImageExpr::Mosaic {
            collection: self.query.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryType {
    Polygon,
}

/// Arguments to [`Image::reduce_to_vectors`]
#[derive(Debug, Clone)]
pub struct VectorParams {
    pub scale: f64,
    pub geometry: AreaOfInterest,
    pub eight_connected: bool,
    pub best_effort: bool,
    pub tile_scale: u32,
}

/// Lazy raster-to-polygon conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vectors {
    pub image: Image,
    pub scale: f64,
    pub geometry_type: GeometryType,
    pub geometry: AreaOfInterest,
    pub eight_connected: bool,
    pub best_effort: bool,
    pub tile_scale: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DateWindow;

    fn query() -> CollectionQuery {
        CollectionQuery {
            product: S1_GRD_COLLECTION.to_string(),
            instrument_mode: IW_MODE.to_string(),
            polarization: Polarization::VH,
            pass_direction: PassDirection::Ascending,
            resolution_meters: 10,
            window: DateWindow::parse("2022-07-01:2022-07-30").unwrap(),
            bounds: AreaOfInterest::from_bounds(101.0, 3.0, 101.1, 3.1).unwrap(),
        }
    }

    #[test]
    fn test_builders_do_not_mutate_operands() {
        let base = ImageCollection::search(query()).mosaic();
        let smoothed = base.focal_mean(50.0, KernelShape::Circle, KernelUnits::Meters);
        let ratio = smoothed.divide(&base);

        assert_eq!(base.node_count(), 1);
        assert_eq!(smoothed.node_count(), 2);
        assert_eq!(ratio.node_count(), 4);
    }

    #[test]
    fn test_wire_format_is_tagged() {
        let image = Image::dataset("JRC/GSW1_4/GlobalSurfaceWater", "seasonality").gte(10.0);
        let json = serde_json::to_value(&image).unwrap();

        assert_eq!(json["op"], "binary");
        assert_eq!(json["operator"], "greater_or_equal");
        assert_eq!(json["left"]["op"], "dataset");
        assert_eq!(json["right"]["value"], 10.0);

        let back: Image = serde_json::from_value(json).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn test_mosaic_carries_normalized_query() {
        let json = serde_json::to_value(ImageCollection::search(query()).mosaic()).unwrap();
        assert_eq!(json["collection"]["pass_direction"], "ASCENDING");
        assert_eq!(json["collection"]["polarization"], "VH");
        assert_eq!(json["collection"]["instrument_mode"], "IW");
    }
}
