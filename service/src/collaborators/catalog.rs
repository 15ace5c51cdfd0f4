use redact_core::{Catalog, FileRecord, RedactError, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// 内存文件目录
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: Mutex<BTreeMap<String, FileRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<MutexGuard<'_, BTreeMap<String, FileRecord>>> {
        self.records
            .lock()
            .map_err(|_| RedactError::Catalog("catalog lock poisoned".to_string()))
    }

    /// 以指定 ID 写入记录，ID 已存在时报错
    pub fn insert_with_id(&self, id: impl Into<String>, record: FileRecord) -> Result<String> {
        let id = id.into();
        let mut records = self.records()?;
        if records.contains_key(&id) {
            return Err(RedactError::Catalog(format!("duplicate record id {}", id)));
        }
        records.insert(id.clone(), record);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.records().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Catalog for MemoryCatalog {
    fn lookup(&self, id: &str) -> Result<Option<FileRecord>> {
        Ok(self.records()?.get(id).cloned())
    }

    fn insert(&self, record: FileRecord) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.insert_with_id(id, record)
    }
}
