use mask::{CompositorConfig, Coordinator, PointLabel, PointPrompt};
use sam2::SegmenterConfig;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;


#[derive(Error, Debug)]
pub enum AnnotatorError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Opacity must be within 0.0..=1.0, got {0}")]
    InvalidOpacity(f32),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}


/// Annotator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotatorConfig {
    /// Holds `masks/`, `logs/` and `images/`
    pub data_root: PathBuf,
    #[serde(default)]
    pub render: CompositorConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            render: CompositorConfig::default(),
            segmenter: SegmenterConfig::default(),
        }
    }
}

impl AnnotatorConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, AnnotatorError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, AnnotatorError> {
        let config: AnnotatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, AnnotatorError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load configuration from JSON string
    pub fn from_json(content: &str) -> Result<Self, AnnotatorError> {
        let config: AnnotatorConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AnnotatorError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(AnnotatorError::UnsupportedFileFormat),
        }
    }

    /// Save configuration to a TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AnnotatorError> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, AnnotatorError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    /// Save configuration to a JSON file
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AnnotatorError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, AnnotatorError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    fn validate(&self) -> Result<(), AnnotatorError> {
        if !(0.0..=1.0).contains(&self.render.opacity) {
            return Err(AnnotatorError::InvalidOpacity(self.render.opacity));
        }
        Ok(())
    }

    /// Coordinator over this configuration's data root
    pub fn coordinator(&self) -> Coordinator {
        Coordinator::open(&self.data_root, self.render)
    }
}

/// Parse `x,y` or `x,y,label` where label is `pos`/`1` or `neg`/`0`.
pub fn parse_point(point_str: &str) -> Result<PointPrompt, String> {
    let parts: Vec<&str> = point_str.split(',').map(str::trim).collect();
    let (x, y, label) = match parts.as_slice() {
        [x, y] => (x, y, PointLabel::Positive),
        [x, y, label] => {
            let label = match *label {
                "pos" | "positive" | "1" => PointLabel::Positive,
                "neg" | "negative" | "0" => PointLabel::Negative,
                other => return Err(format!("Invalid point label: {}", other)),
            };
            (x, y, label)
        }
        _ => return Err(format!("Invalid point format: {}", point_str)),
    };
    let x: f32 = x.parse().map_err(|_| format!("Invalid x in point: {}", point_str))?;
    let y: f32 = y.parse().map_err(|_| format!("Invalid y in point: {}", point_str))?;
    Ok(PointPrompt { x, y, label })
}
