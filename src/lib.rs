//! sarflood: Sentinel-1 change-detection flood mapping
//!
//! Builds a lazy expression graph that compares radar backscatter before and
//! after a flood event over an area of interest, removes permanent water,
//! speckle-sized detections and steep terrain, and outlines what remains as
//! polygons. The graph is evaluated by a [`engine::GeoCompute`] implementation:
//! the hosted compute service over HTTP, or the in-memory local engine.

pub mod config;
pub mod core;
pub mod engine;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use crate::config::Config;
pub use crate::core::{FloodExtent, FloodExtentPipeline, FloodParams, FloodReport, FloodRequest, Image, ImageCollection};
pub use crate::engine::{GeoCompute, JobId, JobStatus, LocalEngine, RemoteEngine};
pub use crate::io::{export_results, wait_for_jobs, ExportOptions, WaitOutcome};
pub use crate::types::{
    AreaOfInterest, DateWindow, FeatureCollection, FloodError, FloodResult, PassDirection, Polarization, Polygon,
    RasterGrid,
};
