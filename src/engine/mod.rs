//! Evaluators for the lazy expression graph
//!
//! [`GeoCompute`] is the surface the flood pipeline needs from a geospatial
//! compute service: trigger evaluation of a vector request, count pixels,
//! submit asynchronous exports and poll them. [`remote::RemoteEngine`] talks to
//! the hosted service over HTTP; [`local::LocalEngine`] evaluates graphs in
//! memory against a small scene catalog.

pub mod local;
pub mod remote;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::expr::{Image, Vectors};
use crate::types::{AreaOfInterest, FeatureCollection, FloodResult};

pub use local::{LocalEngine, SceneRecord};
pub use remote::RemoteEngine;

/// Identifier of an export job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of an export job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed { message: Option<String> },
    Cancelled,
}

impl JobStatus {
    /// Completed, failed and cancelled jobs will not change state again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed { message: Some(m) } => write!(f, "failed: {}", m),
            JobStatus::Failed { message: None } => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    #[serde(rename = "GEO_TIFF")]
    GeoTiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableFormat {
    #[serde(rename = "SHP")]
    Shapefile,
    #[serde(rename = "GEO_JSON")]
    GeoJson,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Shapefile => "shp",
            TableFormat::GeoJson => "geojson",
        }
    }
}

/// Raster export to durable storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageExportTask {
    pub image: Image,
    pub description: String,
    pub file_name_prefix: String,
    pub region: AreaOfInterest,
    pub scale: f64,
    pub crs: String,
    pub format: ImageFormat,
}

/// Vector export to durable storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableExportTask {
    pub collection: Vectors,
    pub description: String,
    pub file_name_prefix: String,
    pub format: TableFormat,
}

/// Consumed interface of a lazily evaluated geospatial compute service
pub trait GeoCompute: Send + Sync {
    /// Evaluate a vector request into polygons
    fn compute_vectors(&self, vectors: &Vectors) -> FloodResult<FeatureCollection>;

    /// Number of unmasked, non-zero pixels of `image` inside `region`
    fn count_pixels(&self, image: &Image, region: &AreaOfInterest, scale: f64) -> FloodResult<u64>;

    fn submit_image_export(&self, task: &ImageExportTask) -> FloodResult<JobId>;

    fn submit_table_export(&self, task: &TableExportTask) -> FloodResult<JobId>;

    fn job_status(&self, id: &JobId) -> FloodResult<JobStatus>;

    /// Direct download link for a rendered raster
    fn image_download_url(
        &self,
        image: &Image,
        region: &AreaOfInterest,
        scale: f64,
        format: ImageFormat,
    ) -> FloodResult<String>;

    /// Direct download link for a rendered vector collection
    fn table_download_url(&self, vectors: &Vectors, format: TableFormat) -> FloodResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed { message: None }.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_formats_use_service_names() {
        assert_eq!(serde_json::to_string(&ImageFormat::GeoTiff).unwrap(), "\"GEO_TIFF\"");
        assert_eq!(serde_json::to_string(&TableFormat::Shapefile).unwrap(), "\"SHP\"");
        assert_eq!(TableFormat::GeoJson.extension(), "geojson");
    }
}
