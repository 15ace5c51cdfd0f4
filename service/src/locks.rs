//! 按文档 ID 分片的互斥锁
//!
//! 同一父文档的脱敏请求串行执行；不同文档可能落在同一分片，只会多等一会儿。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

pub struct DocumentLocks {
    stripes: Vec<Mutex<()>>,
}

impl DocumentLocks {
    pub fn new(stripes: usize) -> Self {
        let count = stripes.max(1);
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    fn index(&self, file_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        file_id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// 获取文档锁；前一个持有者 panic 时锁仍然可用
    pub fn lock(&self, file_id: &str) -> MutexGuard<'_, ()> {
        let stripe = &self.stripes[self.index(file_id)];
        stripe.lock().unwrap_or_else(|poisoned| {
            log::warn!("[Redact] 文档锁曾被异常释放，继续使用");
            poisoned.into_inner()
        })
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }
}

impl Default for DocumentLocks {
    fn default() -> Self {
        Self::new(64)
    }
}
