//! Direct download of the flood raster and polygons
//!
//! Unlike exports, downloads are rendered synchronously by the service and are
//! subject to its size limit; a refusal surfaces as [`FloodError::ExportTooLarge`].

use chrono::Local;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zip::ZipArchive;

use crate::core::flood_extent::FloodExtent;
use crate::engine::{GeoCompute, ImageFormat, TableFormat};
use crate::types::{AreaOfInterest, FloodError, FloodResult};

/// Files written by [`download_results`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFiles {
    pub raster: PathBuf,
    pub vector: PathBuf,
}

/// Timestamp used in downloaded file names
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d_%H-%M").to_string()
}

pub fn raster_file_name(prefix: &str, timestamp: &str) -> String {
    format!("{}_raster_{}.tif", prefix, timestamp)
}

pub fn vector_file_name(prefix: &str, timestamp: &str) -> String {
    format!("{}_vector_{}.geojson", prefix, timestamp)
}

/// Check if content is ZIP format by examining magic bytes
pub fn is_zip_content(content: &[u8]) -> bool {
    content.len() >= 4 && content[0..4] == [0x50, 0x4B, 0x03, 0x04]
}

/// First GeoTIFF member of a ZIP archive
pub fn extract_tif_from_zip(zip_data: &[u8]) -> FloodResult<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(zip_data))
        .map_err(|e| FloodError::Processing(format!("Failed to open ZIP archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| FloodError::Processing(format!("Failed to read ZIP entry {}: {}", i, e)))?;

        let name = file.name().to_lowercase();
        if name.ends_with(".tif") || name.ends_with(".tiff") {
            log::debug!("Extracting GeoTIFF: {}", file.name());
            let mut buffer = Vec::new();
            std::io::copy(&mut file, &mut buffer)?;
            return Ok(buffer);
        }
    }

    Err(FloodError::Processing("No GeoTIFF found in ZIP archive".to_string()))
}

fn fetch(client: &reqwest::blocking::Client, url: &str) -> FloodResult<Vec<u8>> {
    log::debug!("Downloading from: {}", url);
    let response = client.get(url).send()?;

    if !response.status().is_success() {
        return Err(FloodError::Http(format!(
            "HTTP {} {}: {}",
            response.status().as_u16(),
            response.status().canonical_reason().unwrap_or(""),
            url
        )));
    }

    let content = response.bytes()?;
    log::debug!("Downloaded {} bytes", content.len());
    Ok(content.to_vec())
}

fn write_file(path: &Path, content: &[u8]) -> FloodResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;

    let metadata = std::fs::metadata(path)?;
    if metadata.len() == 0 {
        return Err(FloodError::Processing(format!("{} is empty", path.display())));
    }
    Ok(())
}

/// Fetch the flood raster (GeoTIFF) and polygons (GeoJSON) into `output_dir`
pub fn download_results(
    engine: &dyn GeoCompute,
    extent: &FloodExtent,
    region: &AreaOfInterest,
    output_dir: &Path,
    prefix: &str,
    scale: f64,
) -> FloodResult<DownloadedFiles> {
    let raster_url = engine.image_download_url(&extent.raster, region, scale, ImageFormat::GeoTiff)?;
    let vector_url = engine.table_download_url(&extent.vectors, TableFormat::GeoJson)?;

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(300))
        .user_agent(concat!("sarflood/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FloodError::Http(format!("Failed to create HTTP client: {}", e)))?;

    let stamp = timestamp();

    let raster_bytes = fetch(&client, &raster_url)?;
    let raster_bytes = if is_zip_content(&raster_bytes) {
        extract_tif_from_zip(&raster_bytes)?
    } else {
        raster_bytes
    };
    let raster = output_dir.join(raster_file_name(prefix, &stamp));
    write_file(&raster, &raster_bytes)?;
    log::info!("Flood raster saved to {}", raster.display());

    let vector_bytes = fetch(&client, &vector_url)?;
    let vector = output_dir.join(vector_file_name(prefix, &stamp));
    write_file(&vector, &vector_bytes)?;
    log::info!("Flood polygons saved to {}", vector.display());

    Ok(DownloadedFiles { raster, vector })
}
