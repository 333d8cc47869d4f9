//! I/O modules for exporting, downloading and writing flood results

pub mod download;
pub mod export;
pub mod geojson;
pub mod raster_file;

pub use download::{download_results, DownloadedFiles};
pub use export::{export_results, submit_exports, wait_for_jobs, wait_for_jobs_async, ExportJobs, ExportOptions, WaitOutcome};
pub use geojson::{read_aoi, write_geojson};
