//! Export of flood results to durable storage
//!
//! Four independent jobs are submitted (before scene, after scene, flood
//! raster, flood polygons) and then polled until every job reaches a terminal
//! state or the wait times out. Jobs still running at the timeout are left
//! alone on the service.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::flood_extent::FloodExtent;
use crate::engine::{GeoCompute, ImageExportTask, ImageFormat, JobId, JobStatus, TableExportTask, TableFormat};
use crate::types::{AreaOfInterest, FloodError, FloodResult};

pub const BEFORE_DESCRIPTION: &str = "export_before_s1_scene";
pub const AFTER_DESCRIPTION: &str = "export_flooded_s1_scene";
pub const RASTER_DESCRIPTION: &str = "export_flood_extents_raster";
pub const POLYGONS_DESCRIPTION: &str = "export_flood_extents_polygons";

/// Export settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Output pixel size in meters
    pub scale: f64,
    pub crs: String,
    pub table_format: TableFormat,
    /// Zero waits forever
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            scale: 30.0,
            crs: "EPSG:4326".to_string(),
            table_format: TableFormat::Shapefile,
            timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Handles of the four submitted jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJobs {
    pub before: JobId,
    pub after: JobId,
    pub raster: JobId,
    pub polygons: JobId,
}

impl ExportJobs {
    pub fn ids(&self) -> Vec<JobId> {
        vec![
            self.before.clone(),
            self.after.clone(),
            self.raster.clone(),
            self.polygons.clone(),
        ]
    }
}

/// Result of a bounded wait
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// Every job reached a terminal state (completed, failed or cancelled)
    Finished {
        statuses: Vec<(JobId, JobStatus)>,
        elapsed: Duration,
    },
    /// The timeout elapsed first; the jobs keep running remotely
    TimedOut {
        statuses: Vec<(JobId, JobStatus)>,
        elapsed: Duration,
    },
}

impl WaitOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, WaitOutcome::Finished { .. })
    }

    pub fn statuses(&self) -> &[(JobId, JobStatus)] {
        match self {
            WaitOutcome::Finished { statuses, .. } | WaitOutcome::TimedOut { statuses, .. } => statuses,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            WaitOutcome::Finished { elapsed, .. } | WaitOutcome::TimedOut { elapsed, .. } => *elapsed,
        }
    }

    /// Jobs that ended in failure
    pub fn failed(&self) -> Vec<&JobId> {
        self.statuses()
            .iter()
            .filter(|(_, s)| matches!(s, JobStatus::Failed { .. }))
            .map(|(id, _)| id)
            .collect()
    }

    /// Jobs not yet in a terminal state
    pub fn pending(&self) -> Vec<&JobId> {
        self.statuses()
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(id, _)| id)
            .collect()
    }
}

/// The four export tasks for a flood extent, named after `prefix`
pub fn build_export_tasks(
    extent: &FloodExtent,
    region: &AreaOfInterest,
    prefix: &str,
    options: &ExportOptions,
) -> ([ImageExportTask; 3], TableExportTask) {
    let image_task = |image: &crate::core::expr::Image, description: &str, suffix: &str| ImageExportTask {
        image: image.clone(),
        description: description.to_string(),
        file_name_prefix: format!("{}_{}", prefix, suffix),
        region: region.clone(),
        scale: options.scale,
        crs: options.crs.clone(),
        format: ImageFormat::GeoTiff,
    };

    let images = [
        image_task(&extent.before_filtered, BEFORE_DESCRIPTION, "s1_before"),
        image_task(&extent.after_filtered, AFTER_DESCRIPTION, "s1_after"),
        image_task(&extent.raster, RASTER_DESCRIPTION, "raster"),
    ];

    let table = TableExportTask {
        collection: extent.vectors.clone(),
        description: POLYGONS_DESCRIPTION.to_string(),
        file_name_prefix: format!("{}_polygons", prefix),
        format: options.table_format,
    };

    (images, table)
}

/// Submit the four export jobs without waiting on them
pub fn submit_exports(
    engine: &dyn GeoCompute,
    extent: &FloodExtent,
    region: &AreaOfInterest,
    prefix: &str,
    options: &ExportOptions,
) -> FloodResult<ExportJobs> {
    if prefix.is_empty() {
        return Err(FloodError::InvalidParameter("export prefix must not be empty".to_string()));
    }

    let ([before, after, raster], table) = build_export_tasks(extent, region, prefix, options);

    let jobs = ExportJobs {
        before: engine.submit_image_export(&before)?,
        after: engine.submit_image_export(&after)?,
        raster: engine.submit_image_export(&raster)?,
        polygons: engine.submit_table_export(&table)?,
    };

    log::info!(
        "Submitted exports for '{}': {}, {}, {}, {}",
        prefix,
        jobs.before,
        jobs.after,
        jobs.raster,
        jobs.polygons
    );
    Ok(jobs)
}

/// Submit the four exports and wait for them
pub fn export_results(
    engine: &dyn GeoCompute,
    extent: &FloodExtent,
    region: &AreaOfInterest,
    prefix: &str,
    options: &ExportOptions,
) -> FloodResult<WaitOutcome> {
    let jobs = submit_exports(engine, extent, region, prefix, options)?;
    wait_for_jobs(engine, &jobs.ids(), options.timeout, options.poll_interval)
}

fn poll_all(engine: &dyn GeoCompute, ids: &[JobId]) -> FloodResult<Vec<(JobId, JobStatus)>> {
    ids.iter()
        .map(|id| Ok((id.clone(), engine.job_status(id)?)))
        .collect()
}

fn all_terminal(statuses: &[(JobId, JobStatus)]) -> bool {
    statuses.iter().all(|(_, s)| s.is_terminal())
}

fn log_progress(statuses: &[(JobId, JobStatus)], elapsed: Duration) {
    let done = statuses.iter().filter(|(_, s)| s.is_terminal()).count();
    log::debug!(
        "Export status after {:.0}s: {}/{} finished",
        elapsed.as_secs_f64(),
        done,
        statuses.len()
    );
}

fn timed_out(timeout: Duration, elapsed: Duration) -> bool {
    !timeout.is_zero() && elapsed >= timeout
}

/// Poll job statuses until all are terminal or `timeout` elapses (zero = forever)
///
/// Statuses are always read at least once. Jobs are never cancelled.
pub fn wait_for_jobs(
    engine: &dyn GeoCompute,
    ids: &[JobId],
    timeout: Duration,
    poll_interval: Duration,
) -> FloodResult<WaitOutcome> {
    let start = Instant::now();

    loop {
        let statuses = poll_all(engine, ids)?;
        let elapsed = start.elapsed();
        log_progress(&statuses, elapsed);

        if all_terminal(&statuses) {
            log::info!("All {} export jobs finished after {:.1}s", ids.len(), elapsed.as_secs_f64());
            return Ok(WaitOutcome::Finished { statuses, elapsed });
        }
        if timed_out(timeout, elapsed) {
            log::warn!(
                "Stopped waiting for exports after {:.0}s; jobs continue on the service",
                elapsed.as_secs_f64()
            );
            return Ok(WaitOutcome::TimedOut { statuses, elapsed });
        }

        let nap = if timeout.is_zero() {
            poll_interval
        } else {
            poll_interval.min(timeout - elapsed)
        };
        std::thread::sleep(nap);
    }
}

/// Async form of [`wait_for_jobs`]; status calls run on the blocking pool
pub async fn wait_for_jobs_async(
    engine: Arc<dyn GeoCompute>,
    ids: Vec<JobId>,
    timeout: Duration,
    poll_interval: Duration,
) -> FloodResult<WaitOutcome> {
    let start = tokio::time::Instant::now();
    let ids = Arc::new(ids);

    loop {
        let statuses = {
            let engine = Arc::clone(&engine);
            let ids = Arc::clone(&ids);
            tokio::task::spawn_blocking(move || poll_all(engine.as_ref(), &ids))
                .await
                .map_err(|e| FloodError::Processing(format!("status poll task failed: {}", e)))??
        };
        let elapsed = start.elapsed();
        log_progress(&statuses, elapsed);

        if all_terminal(&statuses) {
            return Ok(WaitOutcome::Finished { statuses, elapsed });
        }
        if timed_out(timeout, elapsed) {
            log::warn!(
                "Stopped waiting for exports after {:.0}s; jobs continue on the service",
                elapsed.as_secs_f64()
            );
            return Ok(WaitOutcome::TimedOut { statuses, elapsed });
        }

        let nap = if timeout.is_zero() {
            poll_interval
        } else {
            poll_interval.min(timeout - elapsed)
        };
        tokio::time::sleep(nap).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flood_extent::{FloodExtentPipeline, FloodRequest};
    use crate::types::DateWindow;

    #[test]
    fn test_task_naming() {
        let aoi = AreaOfInterest::from_bounds(101.0, 3.0, 101.1, 3.1).unwrap();
        let extent = FloodExtentPipeline::new().derive_flood_extent(&FloodRequest::new(
            aoi.clone(),
            DateWindow::parse("2022-07-01:2022-07-15").unwrap(),
            DateWindow::parse("2022-07-15:2022-07-30").unwrap(),
        ));

        let (images, table) = build_export_tasks(&extent, &aoi, "kuantan", &ExportOptions::default());

        let names: Vec<(&str, &str)> = images
            .iter()
            .map(|t| (t.description.as_str(), t.file_name_prefix.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("export_before_s1_scene", "kuantan_s1_before"),
                ("export_flooded_s1_scene", "kuantan_s1_after"),
                ("export_flood_extents_raster", "kuantan_raster"),
            ]
        );
        assert!(images.iter().all(|t| t.scale == 30.0 && t.crs == "EPSG:4326"));
        assert_eq!(table.description, "export_flood_extents_polygons");
        assert_eq!(table.file_name_prefix, "kuantan_polygons");
        assert_eq!(table.format, TableFormat::Shapefile);
        assert_eq!(images[2].image, extent.raster);
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = WaitOutcome::TimedOut {
            statuses: vec![
                (JobId::new("a"), JobStatus::Completed),
                (JobId::new("b"), JobStatus::Failed { message: None }),
                (JobId::new("c"), JobStatus::Running),
            ],
            elapsed: Duration::from_secs(1),
        };
        assert!(!outcome.is_finished());
        assert_eq!(outcome.failed(), vec![&JobId::new("b")]);
        assert_eq!(outcome.pending(), vec![&JobId::new("c")]);
    }
}
