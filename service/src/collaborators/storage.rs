use redact_core::{BlobLocator, FileRecord, Result};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

/// 本地目录存储
///
/// 记录中的 `enc_filename` 为相对于根目录的路径。
#[derive(Debug, Clone)]
pub struct FsBlobLocator {
    root: PathBuf,
    temp_subdir: String,
}

impl FsBlobLocator {
    pub fn new(root: impl Into<PathBuf>, temp_subdir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            temp_subdir: temp_subdir.into(),
        }
    }
}

impl BlobLocator for FsBlobLocator {
    fn path_for(&self, record: &FileRecord) -> PathBuf {
        self.root.join(&record.enc_filename)
    }

    fn allocate(&self, subdir: &str) -> Result<(String, PathBuf)> {
        let dir = self.root.join(subdir);
        fs::create_dir_all(&dir)?;
        let name = format!("{}.bin", Uuid::new_v4().simple());
        let relative = format!("{}/{}", subdir.trim_end_matches('/'), name);
        Ok((relative, dir.join(name)))
    }

    fn scratch_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join(&self.temp_subdir);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
