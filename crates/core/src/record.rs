//! 文件记录
//!
//! 记录由目录服务持久化；脱敏产物的记录只创建一次，之后不可修改。

use crate::document::RedactionRegion;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 请求方身份（统一为小写）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 脱敏审计信息，用于还原监管链
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedactionMeta {
    pub patterns: Vec<String>,
    pub custom_terms: Vec<String>,
    pub regions: Vec<RedactionRegion>,
    pub removed_terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub owner: Principal,
    pub original_name: String,
    /// 相对于存储根目录的加密文件路径
    pub enc_filename: String,
    /// 明文字节数
    pub size: u64,
    /// 创建时间（Unix 毫秒）
    pub created_at: i64,
    pub aad: Option<String>,
    pub sha256: String,
    pub cid: Option<String>,
    pub anchor_tx: Option<String>,
    pub folder: Option<String>,
    /// 脱敏产物指向其父记录
    pub parent_file_id: Option<String>,
    pub redaction_meta: Option<RedactionMeta>,
}

impl FileRecord {
    /// AAD 的字节形式，`None` 视为空
    pub fn aad_bytes(&self) -> &[u8] {
        self.aad.as_deref().map(str::as_bytes).unwrap_or(&[])
    }
}
