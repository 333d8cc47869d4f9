use chrono::NaiveDate;
use ndarray::Array2;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sarflood::core::expr::{Image, Vectors};
use sarflood::core::flood_extent::{
    FloodExtent, FloodExtentPipeline, FloodRequest, ELEVATION_ASSET, ELEVATION_BAND, SEASONALITY_BAND,
    SURFACE_WATER_ASSET,
};
use sarflood::engine::{
    GeoCompute, ImageExportTask, ImageFormat, JobId, JobStatus, LocalEngine, SceneRecord, TableExportTask,
    TableFormat,
};
use sarflood::io::export::{export_results, wait_for_jobs, wait_for_jobs_async, ExportOptions, WaitOutcome};
use sarflood::types::{
    AreaOfInterest, DateWindow, FeatureCollection, FloodError, FloodResult, PassDirection, Polarization, RasterGrid,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Engine whose jobs walk through scripted states, one step per status call
struct MockEngine {
    scripts: Mutex<VecDeque<Vec<JobStatus>>>,
    jobs: Mutex<HashMap<JobId, VecDeque<JobStatus>>>,
    submitted: Mutex<Vec<(String, String)>>,
    status_calls: Mutex<usize>,
}

impl MockEngine {
    fn new(scripts: Vec<Vec<JobStatus>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            jobs: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            status_calls: Mutex::new(0),
        }
    }

    fn uniform(script: Vec<JobStatus>) -> Self {
        Self::new(vec![script; 4])
    }

    fn submit(&self, description: &str, prefix: &str) -> FloodResult<JobId> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![JobStatus::Completed]);
        let mut jobs = self.jobs.lock().unwrap();
        let id = JobId::new(format!("job-{}", jobs.len() + 1));
        jobs.insert(id.clone(), script.into());
        self.submitted
            .lock()
            .unwrap()
            .push((description.to_string(), prefix.to_string()));
        Ok(id)
    }

    fn add_job(&self, script: Vec<JobStatus>) -> JobId {
        let mut jobs = self.jobs.lock().unwrap();
        let id = JobId::new(format!("job-{}", jobs.len() + 1));
        jobs.insert(id.clone(), script.into());
        id
    }
}

impl GeoCompute for MockEngine {
    fn compute_vectors(&self, _vectors: &Vectors) -> FloodResult<FeatureCollection> {
        Ok(FeatureCollection::default())
    }

    fn count_pixels(&self, _image: &Image, _region: &AreaOfInterest, _scale: f64) -> FloodResult<u64> {
        Ok(0)
    }

    fn submit_image_export(&self, task: &ImageExportTask) -> FloodResult<JobId> {
        self.submit(&task.description, &task.file_name_prefix)
    }

    fn submit_table_export(&self, task: &TableExportTask) -> FloodResult<JobId> {
        self.submit(&task.description, &task.file_name_prefix)
    }

    fn job_status(&self, id: &JobId) -> FloodResult<JobStatus> {
        *self.status_calls.lock().unwrap() += 1;
        let mut jobs = self.jobs.lock().unwrap();
        let script = jobs
            .get_mut(id)
            .ok_or_else(|| FloodError::RemoteComputation(format!("unknown job {}", id)))?;
        // The last state sticks
        if script.len() > 1 {
            Ok(script.pop_front().unwrap())
        } else {
            Ok(script.front().cloned().unwrap_or(JobStatus::Pending))
        }
    }

    fn image_download_url(
        &self,
        _image: &Image,
        _region: &AreaOfInterest,
        _scale: f64,
        _format: ImageFormat,
    ) -> FloodResult<String> {
        Err(FloodError::RemoteComputation("not supported".to_string()))
    }

    fn table_download_url(&self, _vectors: &Vectors, _format: TableFormat) -> FloodResult<String> {
        Err(FloodError::RemoteComputation("not supported".to_string()))
    }
}

fn aoi() -> AreaOfInterest {
    AreaOfInterest::from_bounds(101.0, 3.0, 101.004, 3.004).expect("valid bounds")
}

fn extent() -> FloodExtent {
    FloodExtentPipeline::new().derive_flood_extent(&FloodRequest::new(
        aoi(),
        DateWindow::parse("2022-07-01:2022-07-15").expect("before window"),
        DateWindow::parse("2022-07-15:2022-07-30").expect("after window"),
    ))
}

fn fast_options() -> ExportOptions {
    ExportOptions {
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
        ..ExportOptions::default()
    }
}

#[test]
fn test_all_jobs_complete() {
    init_logging();

    let engine = MockEngine::uniform(vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]);
    let outcome = export_results(&engine, &extent(), &aoi(), "kuantan", &fast_options()).expect("export");

    assert!(outcome.is_finished());
    assert_eq!(outcome.statuses().len(), 4);
    assert!(outcome.statuses().iter().all(|(_, s)| *s == JobStatus::Completed));

    let submitted = engine.submitted.lock().unwrap().clone();
    assert_eq!(
        submitted,
        vec![
            ("export_before_s1_scene".to_string(), "kuantan_s1_before".to_string()),
            ("export_flooded_s1_scene".to_string(), "kuantan_s1_after".to_string()),
            ("export_flood_extents_raster".to_string(), "kuantan_raster".to_string()),
            ("export_flood_extents_polygons".to_string(), "kuantan_polygons".to_string()),
        ]
    );
}

#[test]
fn test_failed_job_still_finishes_wait() {
    init_logging();

    let failed = JobStatus::Failed {
        message: Some("quota exceeded".to_string()),
    };
    let engine = MockEngine::new(vec![
        vec![JobStatus::Running, JobStatus::Completed],
        vec![JobStatus::Completed],
        vec![JobStatus::Running, JobStatus::Running, failed],
        vec![JobStatus::Running, JobStatus::Completed],
    ]);

    let outcome = export_results(&engine, &extent(), &aoi(), "kuantan", &fast_options()).expect("export");

    assert!(outcome.is_finished());
    assert_eq!(outcome.failed(), vec![&JobId::new("job-3")]);
    assert!(outcome.pending().is_empty());
}

#[test]
fn test_wait_times_out_without_error() {
    init_logging();

    let engine = MockEngine::new(vec![]);
    let ids = vec![
        engine.add_job(vec![JobStatus::Completed]),
        engine.add_job(vec![JobStatus::Running]),
    ];

    let outcome = wait_for_jobs(&engine, &ids, Duration::from_millis(40), Duration::from_millis(10)).expect("wait");

    match &outcome {
        WaitOutcome::TimedOut { statuses, elapsed } => {
            assert_eq!(statuses[1].1, JobStatus::Running);
            assert!(*elapsed >= Duration::from_millis(40));
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert_eq!(outcome.pending(), vec![&JobId::new("job-2")]);
}

#[test]
fn test_statuses_read_at_least_once() {
    init_logging();

    let engine = MockEngine::new(vec![]);
    let ids = vec![engine.add_job(vec![JobStatus::Completed])];

    let outcome = wait_for_jobs(&engine, &ids, Duration::from_nanos(1), Duration::from_millis(10)).expect("wait");
    assert!(outcome.is_finished());
    assert_eq!(*engine.status_calls.lock().unwrap(), 1);
}

#[test]
fn test_zero_timeout_waits_until_finished() {
    init_logging();

    let engine = MockEngine::new(vec![]);
    let mut script = vec![JobStatus::Running; 6];
    script.push(JobStatus::Cancelled);
    let ids = vec![engine.add_job(script)];

    let outcome = wait_for_jobs(&engine, &ids, Duration::ZERO, Duration::from_millis(2)).expect("wait");
    assert!(outcome.is_finished());
    assert_eq!(outcome.statuses()[0].1, JobStatus::Cancelled);
}

#[test]
fn test_status_errors_propagate() {
    init_logging();

    let engine = MockEngine::new(vec![]);
    let result = wait_for_jobs(&engine, &[JobId::new("missing")], Duration::from_secs(1), Duration::from_millis(5));
    assert!(matches!(result, Err(FloodError::RemoteComputation(_))));
}

#[tokio::test]
async fn test_async_wait_matches_blocking_contract() {
    init_logging();

    let engine = Arc::new(MockEngine::new(vec![]));
    let ids = vec![
        engine.add_job(vec![JobStatus::Running, JobStatus::Completed]),
        engine.add_job(vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]),
    ];

    let outcome = wait_for_jobs_async(engine.clone(), ids, Duration::from_secs(5), Duration::from_millis(5))
        .await
        .expect("async wait");
    assert!(outcome.is_finished());

    let stuck = vec![engine.add_job(vec![JobStatus::Running])];
    let outcome = wait_for_jobs_async(engine, stuck, Duration::from_millis(30), Duration::from_millis(5))
        .await
        .expect("async wait");
    assert!(!outcome.is_finished());
}

fn local_engine(dir: &std::path::Path) -> LocalEngine {
    let grid = RasterGrid::new(101.0, 3.004, 0.0001, 40, 40);
    let footprint = grid.bounding_box();
    let flooded = |i: usize, j: usize| (10..30).contains(&i) && (10..30).contains(&j);

    let mut engine = LocalEngine::new(grid).with_export_dir(dir);
    engine
        .add_scene(
            SceneRecord::sentinel1_grd(
                "before",
                NaiveDate::from_ymd_opt(2022, 7, 5).expect("date"),
                PassDirection::Ascending,
                footprint,
            )
            .with_band(Polarization::VH, Array2::from_elem((40, 40), -15.0)),
        )
        .expect("before scene");
    engine
        .add_scene(
            SceneRecord::sentinel1_grd(
                "after",
                NaiveDate::from_ymd_opt(2022, 7, 20).expect("date"),
                PassDirection::Ascending,
                footprint,
            )
            .with_band(
                Polarization::VH,
                Array2::from_shape_fn((40, 40), |(i, j)| if flooded(i, j) { -25.0 } else { -15.0 }),
            ),
        )
        .expect("after scene");
    engine
        .add_dataset(SURFACE_WATER_ASSET, SEASONALITY_BAND, Array2::zeros((40, 40)))
        .expect("seasonality");
    engine
        .add_dataset(ELEVATION_ASSET, ELEVATION_BAND, Array2::zeros((40, 40)))
        .expect("elevation");
    engine
}

#[test]
fn test_local_engine_writes_exports() {
    init_logging();

    let dir = tempfile::tempdir().expect("tempdir");
    let engine = local_engine(dir.path());
    let options = ExportOptions {
        table_format: TableFormat::GeoJson,
        ..fast_options()
    };

    let outcome = export_results(&engine, &extent(), &aoi(), "synthetic", &options).expect("export");
    assert!(outcome.is_finished());
    assert!(outcome.failed().is_empty(), "failed: {:?}", outcome.statuses());

    let mut files: Vec<String> = std::fs::read_dir(dir.path())
        .expect("read export dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    println!("Exported files: {:?}", files);

    assert_eq!(files.len(), 4);
    assert!(files.iter().any(|f| f == "synthetic_polygons.geojson"));
    for stem in ["synthetic_raster", "synthetic_s1_after", "synthetic_s1_before"] {
        assert!(files.iter().any(|f| f.starts_with(stem)), "missing {}", stem);
    }

    let polygons = sarflood::io::geojson::read_geojson(dir.path().join("synthetic_polygons.geojson")).expect("geojson");
    assert_eq!(polygons.len(), 1);
}

#[test]
fn test_local_shapefile_export_fails_but_wait_finishes() {
    init_logging();

    let dir = tempfile::tempdir().expect("tempdir");
    let engine = local_engine(dir.path());

    let outcome = export_results(&engine, &extent(), &aoi(), "synthetic", &fast_options()).expect("export");
    assert!(outcome.is_finished());
    assert_eq!(outcome.failed().len(), 1);
}
