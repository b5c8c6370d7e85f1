use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::types::MaskId;

/// Filename of the ordered id list inside a namespace.
pub const INDEX_FILE: &str = "masks.json";

/// Ordered, duplicate-free list of live mask ids for one (image, query) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaskIndex {
    ids: Vec<MaskId>,
}

impl MaskIndex {
    /// Read the index in `dir`, or an empty index if none was written yet.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        match fs::read(dir.join(INDEX_FILE)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the index in `dir` via a temporary file and rename, so readers
    /// see either the old or the new list and never a truncated one.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(INDEX_FILE))?;
        Ok(())
    }

    pub fn ids(&self) -> &[MaskId] {
        &self.ids
    }

    pub fn contains(&self, id: &MaskId) -> bool {
        self.ids.contains(id)
    }

    /// Append unless already present. Returns whether the id was added.
    pub fn push(&mut self, id: MaskId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Remove if present. Returns whether anything changed.
    pub fn remove(&mut self, id: &MaskId) -> bool {
        let before = self.ids.len();
        self.ids.retain(|existing| existing != id);
        before != self.ids.len()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn into_ids(self) -> Vec<MaskId> {
        self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_index_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = MaskIndex::load_or_default(dir.path()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_push_rejects_duplicates_and_keeps_order() {
        let mut index = MaskIndex::default();
        let a = MaskId::parse("a1").unwrap();
        let b = MaskId::parse("b2").unwrap();
        assert!(index.push(a.clone()));
        assert!(index.push(b.clone()));
        assert!(!index.push(a.clone()));
        assert_eq!(index.ids(), &[a.clone(), b.clone()]);

        assert!(index.remove(&a));
        assert!(!index.remove(&a));
        assert_eq!(index.ids(), &[b]);
    }

    #[test]
    fn test_save_writes_plain_json_array() {
        let dir = TempDir::new().unwrap();
        let mut index = MaskIndex::default();
        index.push(MaskId::parse("abc").unwrap());
        index.save(dir.path()).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap();
        assert_eq!(raw, r#"["abc"]"#);
        assert_eq!(MaskIndex::load_or_default(dir.path()).unwrap(), index);

        // no temporary files left behind
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
