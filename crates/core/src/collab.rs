//! 外部协作方接口
//!
//! 鉴权、目录存储、加密文件定位、内容寻址发布和锚定都不在本仓库实现范围内，
//! 这里只定义流程所依赖的最小接口。

use crate::error::ExternalServiceError;
use crate::record::{FileRecord, Principal};
use crate::{RedactError, Result};
use std::path::{Path, PathBuf};

pub type ContentId = String;
pub type AnchorReference = String;

/// 文件记录目录
pub trait Catalog: Send + Sync {
    fn lookup(&self, id: &str) -> Result<Option<FileRecord>>;

    /// 插入新记录并返回其 ID
    fn insert(&self, record: FileRecord) -> Result<String>;
}

/// 加密文件存储位置
pub trait BlobLocator: Send + Sync {
    /// 记录对应的加密文件路径
    fn path_for(&self, record: &FileRecord) -> PathBuf;

    /// 在 `subdir` 下分配新的加密文件，返回 (相对路径, 绝对路径)
    fn allocate(&self, subdir: &str) -> Result<(String, PathBuf)>;

    /// 临时明文文件所在目录
    fn scratch_dir(&self) -> Result<PathBuf>;
}

/// 内容寻址发布（尽力而为）
pub trait Publisher: Send + Sync {
    fn publish(&self, path: &Path) -> std::result::Result<ContentId, ExternalServiceError>;
}

/// 外部锚定（尽力而为）
pub trait Anchor: Send + Sync {
    fn anchor(
        &self,
        hash_hex: &str,
        size: u64,
        content_id: Option<&str>,
    ) -> std::result::Result<AnchorReference, ExternalServiceError>;
}

/// 身份与授权
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> std::result::Result<Principal, RedactError>;

    fn authorize(&self, principal: &Principal, record: &FileRecord) -> bool {
        &record.owner == principal
    }
}
