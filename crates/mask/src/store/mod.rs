//! Durable per-(image, query) mask collections.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<image name>/<query id>/masks.json   ordered list of live ids
//! <root>/<image name>/<query id>/<id>.png     one 8-bit mask per id
//! ```
//!
//! The index is the source of truth. A mask file is always written before
//! the index references it, and an entry leaves the index before its file is
//! removed. An interrupted save or delete can leave an orphaned file but never
//! an index entry without a file.

pub mod index;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{MaskError, Result};
use crate::io::encode_png;
use crate::locks::KeyedLocks;
use crate::types::{MaskId, QueryId, validate_image_name};

pub use index::{INDEX_FILE, MaskIndex};

const MASK_EXTENSION: &str = "png";

pub struct MaskStore {
    root: PathBuf,
    /// One writer lock per namespace directory.
    locks: KeyedLocks<PathBuf>,
}

impl MaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `mask` and append its fresh id to the collection.
    pub fn save(&self, image_name: &str, query_id: QueryId, mask: &GrayImage) -> Result<MaskId> {
        let dir = self.namespace(image_name, query_id)?;
        let bytes = encode_png(&DynamicImage::ImageLuma8(mask.clone()))?;
        self.locks.with(&dir, || self.save_locked(&dir, image_name, query_id, &bytes))
    }

    fn save_locked(&self, dir: &Path, image_name: &str, query_id: QueryId, bytes: &[u8]) -> Result<MaskId> {
        fs::create_dir_all(dir)?;
        let mut index = MaskIndex::load_or_default(dir)?;

        let mut id = MaskId::generate();
        while index.contains(&id) || mask_path(dir, &id).exists() {
            debug!("Mask id collision on {}, regenerating", id);
            id = MaskId::generate();
        }

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(mask_path(dir, &id))?;

        index.push(id.clone());
        index.save(dir)?;

        info!(
            "Saved mask {} for {}#{} ({} in collection)",
            id,
            image_name,
            query_id,
            index.len()
        );
        Ok(id)
    }

    /// Remove a mask's index entry, then its file. Unknown ids are a no-op.
    ///
    /// The index is rewritten first so a failure at any point leaves at worst
    /// an orphaned file.
    pub fn delete(&self, image_name: &str, query_id: QueryId, id: &MaskId) -> Result<()> {
        let dir = self.namespace(image_name, query_id)?;
        self.locks.with(&dir, || self.delete_locked(&dir, image_name, query_id, id))
    }

    fn delete_locked(&self, dir: &Path, image_name: &str, query_id: QueryId, id: &MaskId) -> Result<()> {
        let mut index = MaskIndex::load_or_default(dir)?;
        let indexed = index.remove(id);
        if indexed {
            index.save(dir)?;
        }

        match fs::remove_file(mask_path(dir, id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if indexed {
            info!("Deleted mask {} from {}#{}", id, image_name, query_id);
        } else {
            debug!("Delete of unknown mask {} in {}#{}", id, image_name, query_id);
        }
        Ok(())
    }

    /// Current ids in insertion order.
    pub fn list(&self, image_name: &str, query_id: QueryId) -> Result<Vec<MaskId>> {
        let dir = self.namespace(image_name, query_id)?;
        Ok(MaskIndex::load_or_default(&dir)?.into_ids())
    }

    /// Load one mask. A missing backing file is `NotFound`.
    pub fn load(&self, image_name: &str, query_id: QueryId, id: &MaskId) -> Result<GrayImage> {
        let dir = self.namespace(image_name, query_id)?;
        let bytes = match fs::read(mask_path(&dir, id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MaskError::not_found(format!(
                    "mask {id} for {image_name}#{query_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let image = image::load_from_memory(&bytes)
            .map_err(|e| MaskError::Decode(format!("mask {id}: {e}")))?;
        Ok(image.to_luma8())
    }

    fn namespace(&self, image_name: &str, query_id: QueryId) -> Result<PathBuf> {
        validate_image_name(image_name)?;
        Ok(self.root.join(image_name).join(query_id.to_string()))
    }
}

fn mask_path(dir: &Path, id: &MaskId) -> PathBuf {
    dir.join(format!("{}.{}", id, MASK_EXTENSION))
}
