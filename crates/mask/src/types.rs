use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};
use uuid::Uuid;

use crate::error::{MaskError, Result};

/// Annotation attempt for one image. Several queries may coexist per image.
pub type QueryId = i64;

/// Review batch identifier.
pub type ChunkId = i64;

/// Position of an item inside its chunk.
pub type ItemIndex = i64;

/// Latest action per item index, derived by replaying a chunk journal.
pub type StatusProjection = BTreeMap<ItemIndex, ReviewAction>;

/// RGB triple used when painting a mask layer.
pub type MaskColor = [u8; 3];

/// Opaque identifier of a stored mask artifact; also its filename stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MaskId(String);

impl MaskId {
    /// Fresh random id (32 lowercase hex characters).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accept a caller-supplied id. Anything that could not have been produced
    /// by [`MaskId::generate`] as a bare filename stem is treated as unknown.
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(MaskError::not_found(format!("mask {raw:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Review decision recorded against a chunk item.
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq, Eq, Hash
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReviewAction {
    Done,
    Skip,
}

impl ReviewAction {
    /// Parse a wire action, rejecting anything outside `{done, skip}`.
    pub fn parse(raw: &str) -> Result<Self> {
        raw.parse()
            .map_err(|_| MaskError::InvalidAction(raw.to_string()))
    }
}

/// One immutable journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub chunk_id: ChunkId,
    pub index: ItemIndex,
    pub image_name: String,
    pub query_id: QueryId,
    pub action: ReviewAction,
    pub timestamp: DateTime<Utc>,
}

/// Positive or negative hint for the segmentation collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PointLabel {
    #[default]
    Positive,
    Negative,
}

impl PointLabel {
    /// Numeric label as segmentation models expect it.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Positive => 1,
            Self::Negative => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PointPrompt {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub label: PointLabel,
}

/// A registered source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// Reject image names that are not a single plain path component.
pub fn validate_image_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(MaskError::InvalidName(name.to_string()));
    }
    Ok(())
}
