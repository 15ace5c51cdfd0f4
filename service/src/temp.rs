//! 临时文件守卫
//!
//! 文件由 tempfile 以独占方式创建，权限 0600。守卫离开作用域时删除文件，
//! 删除失败只记录日志。

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempPath};

#[derive(Debug)]
pub struct TempArtifact {
    path: Option<TempPath>,
}

impl TempArtifact {
    /// 在 `dir` 下创建空文件：`<prefix>_<随机>_<name>`
    pub fn create_in(dir: &Path, prefix: &str, original_name: &str) -> io::Result<Self> {
        let prefix = format!("{}_", prefix);
        let suffix = format!("_{}", sanitize_name(original_name));
        let file = Builder::new().prefix(&prefix).suffix(&suffix).tempfile_in(dir)?;
        Ok(Self {
            path: Some(file.into_temp_path()),
        })
    }

    /// 守护一个尚未写出的路径，例如新的加密文件
    pub fn guard(path: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(Self {
            path: Some(TempPath::try_from_path(path)?),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// 保留文件，不再删除
    pub fn keep(mut self) -> io::Result<PathBuf> {
        match self.path.take() {
            Some(path) => path.keep().map_err(|e| e.error),
            None => Ok(PathBuf::new()),
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let display = path.to_path_buf();
        match path.close() {
            Ok(()) => log::debug!("[Cleanup] 已删除 {:?}", display),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("[Cleanup] 删除临时文件失败 {:?}: {}", display, e),
        }
    }
}

/// 去掉路径分隔符等字符，只保留文件名部分
pub fn sanitize_name(original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}
