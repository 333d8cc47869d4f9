//! Core flood mapping modules

pub mod expr;
pub mod flood_extent;
pub mod raster;
pub mod vectorize;

// Re-export main types
pub use expr::{
    BinaryOp, CollectionQuery, Image, ImageCollection, ImageExpr, KernelShape, KernelUnits, SlopeUnits,
    VectorParams, Vectors,
};
pub use flood_extent::{FloodExtent, FloodExtentPipeline, FloodParams, FloodReport, FloodRequest};
pub use raster::MaskedRaster;
pub use vectorize::polygonize;
