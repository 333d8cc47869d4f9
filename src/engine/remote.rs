//! HTTP client for the hosted compute service
//!
//! Expression graphs are posted as JSON to project-scoped endpoints under
//! `{base_url}/v1/projects/{project}/`. Export submissions return long-running
//! operations whose names double as [`JobId`]s.

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::core::expr::{Image, Vectors};
use crate::engine::{
    GeoCompute, ImageExportTask, ImageFormat, JobId, JobStatus, TableExportTask, TableFormat,
};
use crate::io::geojson;
use crate::types::{AreaOfInterest, FeatureCollection, FloodError, FloodResult};

/// Messages the service uses when a request exceeds its materialization limits
fn size_limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(total request size|pixel grid dimensions|too many pixels).*(must be less than or equal to|exceeds)")
            .expect("static regex")
    })
}

/// Map a service error message onto the error taxonomy
pub fn classify_error(message: &str) -> FloodError {
    if size_limit_pattern().is_match(message) {
        FloodError::ExportTooLarge(message.to_string())
    } else {
        FloodError::RemoteComputation(message.to_string())
    }
}

/// Map an operation state onto [`JobStatus`]
pub fn parse_state(state: &str, error: Option<String>) -> FloodResult<JobStatus> {
    match state {
        "PENDING" => Ok(JobStatus::Pending),
        "RUNNING" | "CANCELLING" => Ok(JobStatus::Running),
        "SUCCEEDED" => Ok(JobStatus::Completed),
        "FAILED" => Ok(JobStatus::Failed { message: error }),
        "CANCELLED" => Ok(JobStatus::Cancelled),
        other => Err(FloodError::RemoteComputation(format!("unknown operation state '{}'", other))),
    }
}

/// Count of unmasked, non-zero pixels: zeros are masked out before the count reducer
pub fn count_request(image: &Image, region: &AreaOfInterest, scale: f64) -> Value {
    json!({
        "expression": {
            "reducer": "count",
            "image": image.update_mask(image),
            "geometry": region,
            "scale": scale,
        }
    })
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    metadata: Option<OperationMetadata>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct OperationMetadata {
    state: String,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    result: u64,
}

#[derive(Debug, Deserialize)]
struct UrlResponse {
    url: String,
}

/// [`GeoCompute`] over the hosted service
pub struct RemoteEngine {
    client: reqwest::blocking::Client,
    base_url: String,
    project: String,
    token: Option<String>,
}

impl RemoteEngine {
    pub fn new(
        base_url: impl Into<String>,
        project: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> FloodResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sarflood/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FloodError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project: project.into(),
            token,
        })
    }

    /// Build from configuration; the bearer token is read from `token_env`
    pub fn from_config(config: &EngineConfig) -> FloodResult<Self> {
        if config.project.is_empty() {
            return Err(FloodError::Config("engine.project is not set".to_string()));
        }
        let token = std::env::var(&config.token_env).ok();
        if token.is_none() {
            log::warn!("{} is not set; sending unauthenticated requests", config.token_env);
        }
        Self::new(
            config.base_url.clone(),
            config.project.clone(),
            token,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn project_url(&self, method: &str) -> String {
        format!("{}/v1/projects/{}/{}", self.base_url, self.project, method)
    }

    fn authorized(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn handle(response: reqwest::blocking::Response) -> FloodResult<Value> {
        let status = response.status();
        let text = response.text()?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status.as_u16(), text.trim()));
            log::debug!("Service error ({}): {}", status, message);
            return Err(classify_error(&message));
        }

        Ok(serde_json::from_str(&text)?)
    }

    fn post(&self, method: &str, body: &Value) -> FloodResult<Value> {
        let url = self.project_url(method);
        log::debug!("POST {}", url);
        let response = self.authorized(self.client.post(&url)).json(body).send()?;
        Self::handle(response)
    }

    fn get(&self, path: &str) -> FloodResult<Value> {
        let url = format!("{}/v1/{}", self.base_url, path);
        log::debug!("GET {}", url);
        let response = self.authorized(self.client.get(&url)).send()?;
        Self::handle(response)
    }

    fn submit(&self, method: &str, body: &Value) -> FloodResult<JobId> {
        let operation: Operation = serde_json::from_value(self.post(method, body)?)?;
        log::info!("Submitted export {}", operation.name);
        Ok(JobId(operation.name))
    }
}

impl GeoCompute for RemoteEngine {
    fn compute_vectors(&self, vectors: &Vectors) -> FloodResult<FeatureCollection> {
        log::info!("Computing vectors ({} graph nodes)", vectors.image.node_count());
        let value = self.post("table:computeFeatures", &json!({ "expression": vectors }))?;
        geojson::feature_collection_from_value(&value)
    }

    fn count_pixels(&self, image: &Image, region: &AreaOfInterest, scale: f64) -> FloodResult<u64> {
        let body = count_request(image, region, scale);
        let response: CountResponse = serde_json::from_value(self.post("value:compute", &body)?)?;
        Ok(response.result)
    }

    fn submit_image_export(&self, task: &ImageExportTask) -> FloodResult<JobId> {
        self.submit("image:export", &serde_json::to_value(task)?)
    }

    fn submit_table_export(&self, task: &TableExportTask) -> FloodResult<JobId> {
        self.submit("table:export", &serde_json::to_value(task)?)
    }

    fn job_status(&self, id: &JobId) -> FloodResult<JobStatus> {
        let operation: Operation = serde_json::from_value(self.get(id.as_str())?)?;
        let state = operation
            .metadata
            .map(|m| m.state)
            .unwrap_or_else(|| "PENDING".to_string());
        parse_state(&state, operation.error.map(|e| e.message))
    }

    fn image_download_url(
        &self,
        image: &Image,
        region: &AreaOfInterest,
        scale: f64,
        format: ImageFormat,
    ) -> FloodResult<String> {
        let body = json!({
            "expression": image,
            "region": region,
            "scale": scale,
            "format": format,
        });
        let response: UrlResponse = serde_json::from_value(self.post("image:downloadUrl", &body)?)?;
        Ok(response.url)
    }

    fn table_download_url(&self, vectors: &Vectors, format: TableFormat) -> FloodResult<String> {
        let body = json!({ "expression": vectors, "format": format });
        let response: UrlResponse = serde_json::from_value(self.post("table:downloadUrl", &body)?)?;
        Ok(response.url)
    }
}
