//! SAM2 segmentation backends.
//!
//! Two ways of turning point prompts into a mask, chosen by configuration:
//! a local prediction script run as a child process, or a remote inference
//! service reached over HTTP. Both implement [`mask::Segmenter`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mask::{MaskError, PointPrompt, Segmenter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum Sam2Error {
    #[error("Failed to start prediction script: {0}")]
    Spawn(std::io::Error),

    #[error("Prediction script failed ({status}): {stderr}")]
    ScriptFailed { status: String, stderr: String },

    #[error("Segmentation timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference service error: {0}")]
    Remote(String),

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Sam2Error> for MaskError {
    fn from(err: Sam2Error) -> Self {
        MaskError::CollaboratorUnavailable(err.to_string())
    }
}

fn default_python() -> String {
    "python".to_string()
}

fn default_local_timeout() -> u64 {
    120
}

fn default_remote_timeout() -> u64 {
    60
}

/// Which backend produces masks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmenterConfig {
    /// Run `script --input <json> --output <png>` with a local interpreter
    Local {
        #[serde(default = "default_python")]
        python: String,
        script: PathBuf,
        /// Run through `uv run python` from this uv binary instead
        #[serde(default)]
        uv_env: Option<String>,
        #[serde(default = "default_local_timeout")]
        timeout_secs: u64,
    },
    /// POST prompts to an inference service
    Remote {
        url: String,
        #[serde(default = "default_remote_timeout")]
        timeout_secs: u64,
    },
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::Remote {
            url: "http://127.0.0.1:8000/predict".to_string(),
            timeout_secs: default_remote_timeout(),
        }
    }
}

fn points_json(points: &[PointPrompt]) -> serde_json::Value {
    points
        .iter()
        .map(|p| json!({ "x": p.x, "y": p.y, "label": p.label.as_i32() }))
        .collect()
}

/// Runs a SAM2 prediction script as a child process.
#[derive(Debug, Clone)]
pub struct ProcessSegmenter {
    python: String,
    script_path: PathBuf,
    uv_env_path: Option<String>,
    timeout: Duration,
}

impl ProcessSegmenter {
    pub fn new(script_path: impl Into<PathBuf>, uv_env_path: Option<String>) -> Self {
        Self {
            python: default_python(),
            script_path: script_path.into(),
            uv_env_path,
            timeout: Duration::from_secs(default_local_timeout()),
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the script and return the mask bytes it wrote.
    pub async fn predict(&self, image_path: &Path, points: &[PointPrompt]) -> Result<Vec<u8>, Sam2Error> {
        let temp_input = tempfile::NamedTempFile::new()?;
        let temp_output = tempfile::NamedTempFile::new()?;

        serde_json::to_writer(&temp_input, &json!({
            "image_path": image_path,
            "points": points_json(points),
        }))?;

        let mut cmd = if let Some(uv_path) = &self.uv_env_path {
            let mut c = TokioCommand::new(uv_path);
            c.arg("run")
             .arg(&self.python)
             .arg(&self.script_path);
            c
        } else {
            let mut c = TokioCommand::new(&self.python);
            c.arg(&self.script_path);
            c
        };

        cmd.arg("--input")
            .arg(temp_input.path())
            .arg("--output")
            .arg(temp_output.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Running prediction script {:?}", self.script_path);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| Sam2Error::Timeout(self.timeout))?
            .map_err(Sam2Error::Spawn)?;

        if !output.status.success() {
            return Err(Sam2Error::ScriptFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let bytes = tokio::fs::read(temp_output.path()).await?;
        if bytes.is_empty() {
            return Err(Sam2Error::MalformedReply("script wrote no mask".to_string()));
        }
        Ok(bytes)
    }
}

impl Segmenter for ProcessSegmenter {
    async fn segment(&self, image_path: &Path, points: &[PointPrompt]) -> mask::Result<Vec<u8>> {
        self.predict(image_path, points).await.map_err(|e| {
            warn!("Local segmentation failed: {}", e);
            e.into()
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[derive(Debug, Deserialize)]
struct RemoteReply {
    mask_png_b64: Option<String>,
    error: Option<String>,
}

/// Decode an inference service reply into mask bytes.
pub fn parse_reply(body: &[u8]) -> Result<Vec<u8>, Sam2Error> {
    let reply: RemoteReply =
        serde_json::from_slice(body).map_err(|e| Sam2Error::MalformedReply(e.to_string()))?;
    if let Some(error) = reply.error {
        return Err(Sam2Error::Remote(error));
    }
    let encoded = reply
        .mask_png_b64
        .ok_or_else(|| Sam2Error::MalformedReply("missing mask_png_b64".to_string()))?;
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Sam2Error::MalformedReply(format!("invalid base64: {e}")))
}

/// Forwards prompts to a remote inference service.
#[derive(Debug, Clone)]
pub struct RemoteSegmenter {
    client: reqwest::Client,
    url: String,
}

impl RemoteSegmenter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, Sam2Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn predict(&self, image_path: &Path, points: &[PointPrompt]) -> Result<Vec<u8>, Sam2Error> {
        let image = tokio::fs::read(image_path).await?;
        let body = json!({
            "image_b64": STANDARD.encode(image),
            "points": points_json(points),
        });

        debug!("Forwarding {} points to {}", points.len(), self.url);
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(Sam2Error::Remote(format!(
                "{}: {}",
                status,
                String::from_utf8_lossy(&bytes).trim()
            )));
        }
        parse_reply(&bytes)
    }
}

impl Segmenter for RemoteSegmenter {
    async fn segment(&self, image_path: &Path, points: &[PointPrompt]) -> mask::Result<Vec<u8>> {
        self.predict(image_path, points).await.map_err(|e| {
            warn!("Remote segmentation failed: {}", e);
            e.into()
        })
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// The configured backend.
#[derive(Debug, Clone)]
pub enum SegmenterBackend {
    Local(ProcessSegmenter),
    Remote(RemoteSegmenter),
}

impl SegmenterBackend {
    pub fn from_config(config: &SegmenterConfig) -> Result<Self, Sam2Error> {
        Ok(match config {
            SegmenterConfig::Local { python, script, uv_env, timeout_secs } => Self::Local(
                ProcessSegmenter::new(script.clone(), uv_env.clone())
                    .with_python(python.clone())
                    .with_timeout(Duration::from_secs(*timeout_secs)),
            ),
            SegmenterConfig::Remote { url, timeout_secs } => {
                Self::Remote(RemoteSegmenter::new(url.clone(), Duration::from_secs(*timeout_secs))?)
            }
        })
    }
}

impl Segmenter for SegmenterBackend {
    async fn segment(&self, image_path: &Path, points: &[PointPrompt]) -> mask::Result<Vec<u8>> {
        match self {
            Self::Local(s) => s.segment(image_path, points).await,
            Self::Remote(s) => s.segment(image_path, points).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Local(s) => s.name(),
            Self::Remote(s) => s.name(),
        }
    }
}
